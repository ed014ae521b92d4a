//! Decision loop orchestration.
//!
//! [`Engine`] runs one cycle at a time; [`Scheduler`] repeats it on the
//! analysis interval and drives the push-mode trailing loop next to it.

pub mod cycle;
pub mod engine;
pub mod scheduler;

pub use cycle::{CycleReport, SymbolOutcome, SymbolReport};
pub use engine::{Engine, EngineComponents, EngineSettings};
pub use scheduler::Scheduler;
