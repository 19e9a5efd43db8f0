//! Domain types shared by the coordinator, notifier, and harness

pub mod events;
pub mod outcome;
pub mod types;

pub use events::*;
pub use outcome::*;
pub use types::*;
