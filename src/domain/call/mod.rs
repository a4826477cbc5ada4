//! Call bounded context - one caller talking to the voice agent

pub mod aggregate;
pub mod credential;
pub mod instructions;
pub mod profile;
pub mod record;
pub mod repository;
pub mod value_object;

pub use aggregate::CallSession;
pub use credential::{CredentialProvider, SessionCredential};
pub use instructions::{compose_instructions, DEFAULT_INSTRUCTIONS};
pub use profile::UserProfile;
pub use record::{CallRecord, CallRecordPayload};
pub use repository::CallStore;
pub use value_object::{
    CallState, CapturedDetails, DetailField, InputDevice, Speaker, TranscriptEntry,
};
