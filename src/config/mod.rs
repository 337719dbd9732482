/// Configuration management with hot-reload

pub mod manager;
pub mod settings;

pub use manager::ConfigManager;
pub use settings::*;
