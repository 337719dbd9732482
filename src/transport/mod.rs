pub mod event_bus;
pub mod events;
pub mod journal;

pub use event_bus::*;
pub use events::*;
pub use journal::*;
