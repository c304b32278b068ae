pub mod api;
pub mod broadcast;
pub mod client;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod geofence;
pub mod ingest;
pub mod notify;
pub mod orders;
pub mod registry;
