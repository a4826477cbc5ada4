//! Domain layer - Core call rules
//!
//! This layer contains:
//! - The call session aggregate and its value objects
//! - Agent tool contracts
//! - Audio clip handling
//! - Ports for credentials and call persistence

pub mod audio;
pub mod call;
pub mod shared;
pub mod tool;

// Re-export commonly used types
pub use shared::{CallError, Result};
