// ABOUTME: Layered approval gate for tool side effects.
// ABOUTME: Ask modes per proposal kind, a command allowlist, and a pluggable reviewer service.

pub mod allowlist;
pub mod engine;
pub mod policy;
pub mod service;
pub mod types;

pub use allowlist::*;
pub use engine::*;
pub use policy::*;
pub use service::*;
pub use types::*;
