pub mod channels;
pub mod config;
pub mod notify;
pub mod policy;
pub mod shared;
pub mod stats;
pub mod tickets;
pub mod webhook;

pub use config::AppConfig;
pub use shared::state::AppState;
pub use tickets::{MessageRouter, RoutingAction, RoutingError, RoutingResult};
