//! Application layer: the coordinator, binding tracker, and engine.

pub mod binding;
pub mod coordinator;
pub mod engine;

pub use binding::BindingTracker;
pub use coordinator::{FetchCoordinator, FetchOutcome, FetchTicket, WaiterId};
pub use engine::{EngineConfig, ImageEngine, ImageEvent};
