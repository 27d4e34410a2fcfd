// ABOUTME: Orchestrator module: the agent loop plus the task board, working set, and run control it owns.
// ABOUTME: Observers follow a run through the typed event bus.

pub mod context;
pub mod control;
pub mod engine;
pub mod events;
pub mod tasks;
pub mod working_set;

pub use context::{ContextBuilder, PlainContextBuilder};
pub use control::{RunControl, RunState};
pub use engine::{Orchestrator, StopReason, TurnOutcome};
pub use events::{EventBus, OrchestratorEvent, PauseSnapshot, Step};
pub use tasks::{Task, TaskBoard, TaskChange, TaskStatus};
pub use working_set::{FileSnapshot, WorkingSet};
