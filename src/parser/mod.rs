// ABOUTME: Parser module: extracts tool tags, task markers, checklists, and JSON from agent text.
// ABOUTME: Every extractor treats "nothing found" as a normal result, never as an error.

pub mod json;
pub mod markers;
pub mod tags;

pub use json::*;
pub use markers::*;
pub use tags::*;
