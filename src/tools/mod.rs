// ABOUTME: Tool execution: the dispatcher, anchor matching, patches, processes, and media contracts.
// ABOUTME: Every tool returns a ToolResult; failures become error text instead of propagating.

pub mod dispatcher;
pub mod fuzzy;
pub mod media;
pub mod patch;
pub mod process;
pub mod types;

pub use dispatcher::ToolDispatcher;
pub use media::{MediaService, SearchHit, SearchService};
pub use process::{BackgroundStart, CommandOutput, ProcessManager, StoppedProcess};
pub use types::{StructuredAction, ToolResult};
