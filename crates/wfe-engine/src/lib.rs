pub mod engine;
pub mod topo;

pub use engine::{AuditObserver, Engine, EngineConfig, EngineDefaults, PhaseCompleteHook, Status, WorkflowResult};
pub use topo::{topological_sort, TaskLike};
