// ABOUTME: Session persistence: the per-workspace JSONL log of orchestrator steps.
// ABOUTME: Logs live under ~/.local/share/baton/sessions/<workspace_hash>/.

pub mod log;

pub use log::{LogEntry, StepLogger, workspace_hash};
