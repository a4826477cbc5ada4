//! Interface layer - User-facing front ends
//!
//! This layer handles:
//! - Console command parsing
//! - Rendering call snapshots

pub mod console;
