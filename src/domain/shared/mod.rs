//! Shared kernel - types used by every part of the call flow

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::CallError;
pub use result::Result;
pub use value_objects::*;
