// ABOUTME: Library root for baton: re-exports all modules for integration testing.
// ABOUTME: The binary entry point is in main.rs, which uses this crate as a library.

pub mod approval;
pub mod config;
pub mod detector;
pub mod error;
pub mod fs;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod registry;
pub mod session;
pub mod tools;
