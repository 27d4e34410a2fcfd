// ABOUTME: History module: token usage accounting, transcript formatting, and compression.
// ABOUTME: Compression summarizes older entries through an auxiliary model call.

pub mod compression;
pub mod transcript;
pub mod usage;

pub use compression::{compress_history, needs_compression};
pub use transcript::{HistoryEntry, Role, format_transcript};
pub use usage::{AgentUsage, StatsSnapshot, UsageTracker};
