//! The import pipeline: item state machine, persistence boundary, task
//! queue and the orchestrator that drives them.

pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod store;

pub use orchestrator::Orchestrator;
pub use queue::{StageHandler, TaskQueue};
pub use state::{can_transition, derive_job_status, transition, Stage, StatusCounts};
pub use store::{ImportStore, MemoryStore, UpsertPolicy};
