//! Application layer - Call orchestration
//!
//! This layer drives the call session through its lifecycle.
//! It's responsible for:
//! - Serializing UI commands and I/O completions through one state machine
//! - Routing agent tool calls
//! - Owning and releasing per-call resources
//! - Publishing snapshots to observers

pub mod controller;
pub mod dispatcher;
mod machine;
pub mod metrics;

pub use controller::{CallController, CallSnapshot, Collaborators, MachineSettings};
pub use dispatcher::{DispatchOutcome, FunctionCallDispatcher};
