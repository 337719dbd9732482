pub mod limits;
pub mod types;

pub use limits::*;
pub use types::*;
