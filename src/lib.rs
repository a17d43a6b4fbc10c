// Library crate for integration tests
// Re-exports all modules needed for testing

pub mod analysis;
pub mod config;
pub mod connection;
pub mod control;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod event_loop;
pub mod indicators;
pub mod logging;
pub mod state;
pub mod storage;
pub mod types;
pub mod utils;
pub mod venue;

pub use config::BotConfig;
pub use connection::Connection;
pub use engine::ScalpingEngine;
pub use event_bus::EventBus;
pub use state::SharedState;
