//! CLI module
//!
//! This module provides the command-line interface for Query Hub,
//! including the REPL implementation and command handlers.

pub mod commands;
pub mod render;
pub mod repl;

// Re-exports
pub use repl::Repl;
