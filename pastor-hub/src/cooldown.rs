use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use pastor_core::NodeId;
use serde::Deserialize;

use crate::clock::{Clock, elapsed_ms, window_floor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownMode {
    /// Suppress repeat notifications inside the window.
    #[default]
    Enforce,
    /// Record every notification but never suppress.
    PassThrough,
}

/// Per-node last-notification cache. Process-local, lost on restart.
pub struct CooldownTracker {
    mode: CooldownMode,
    window: Duration,
    clock: Arc<dyn Clock>,
    last_sent: DashMap<NodeId, Timestamp>,
}

impl CooldownTracker {
    pub fn new(mode: CooldownMode, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode,
            window,
            clock,
            last_sent: DashMap::new(),
        }
    }

    pub fn mode(&self) -> CooldownMode {
        self.mode
    }

    /// Whether a notification for `node` may go out now. A `true` answer
    /// records the current time; a suppressed one leaves the entry alone.
    pub fn should_notify(&self, node: &NodeId) -> bool {
        let now = self.clock.now();
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);

        match self.mode {
            CooldownMode::PassThrough => {
                let _ = self.last_sent.insert(node.clone(), now);
                true
            }
            CooldownMode::Enforce => {
                // The entry guard makes check-and-record atomic per node.
                let mut entry = self.last_sent.entry(node.clone()).or_insert(Timestamp::MIN);
                if *entry != Timestamp::MIN && elapsed_ms(*entry, now) < window_ms {
                    return false;
                }
                *entry = now;
                true
            }
        }
    }

    /// Drops entries older than the window. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let floor = window_floor(self.clock.now(), self.window);
        let before = self.last_sent.len();
        self.last_sent.retain(|_, sent| *sent >= floor);
        before.saturating_sub(self.last_sent.len())
    }

    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}
