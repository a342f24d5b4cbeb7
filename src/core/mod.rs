pub mod compose;
pub mod defaults;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod executor;
pub mod health;
pub mod pipeline;
pub mod ssh;
pub mod version;

pub use error::{Error, ErrorCode, Result};
