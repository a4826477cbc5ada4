//! callme - "Call me" voice agent session orchestrator
//!
//! Drives one call from caller-name entry through microphone selection,
//! credential fetch, ringing and a live WebRTC session with a realtime
//! voice agent, then persists the call record.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
