//! Core engine wiring
//!
//! Configuration and the dependency container shared by all services.

pub mod config;
pub mod state;

pub use config::Config;
pub use state::EngineState;
