//! Application layer wiring the coordination components together

pub mod coordinator;

pub use coordinator::{Coordinator, CoordinatorOptions};
