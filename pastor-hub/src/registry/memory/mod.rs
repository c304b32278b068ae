mod alert;
mod event;
mod fence;
mod node;
mod order;

pub use alert::InMemoryAlertRegistry;
pub use event::InMemoryEventRegistry;
pub use fence::InMemoryFenceRegistry;
pub use node::InMemoryNodeRegistry;
pub use order::InMemoryOrderRegistry;

fn newest_first<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    items.reverse();
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}
