pub mod config;
pub mod core;
pub mod error;
pub mod execution;
pub mod logging;
pub mod market;
pub mod store;
pub mod transport;

pub use lodestar_core as types;
pub use error::{EngineError, ReconcileError};
