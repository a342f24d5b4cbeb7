//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - One-shot command execution with error handling
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting
//! - `template` - `{{placeholder}}` rendering

pub mod command;
pub mod io;
pub mod shell;
pub(crate) mod template;
