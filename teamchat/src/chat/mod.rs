//! Session state and its synchronization with the backend.

mod health;
mod store;

pub use health::HealthMonitor;
pub use store::{SessionStore, StoreEvent, OFFLINE_BANNER};
