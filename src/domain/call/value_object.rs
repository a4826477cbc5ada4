//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Waiting for the caller to type their name
    CollectingCallerName,
    /// Microphone access requested; waiting for a device to be selected
    RequestingMicrophone,
    /// Device chosen; waiting to fetch the session credential
    AwaitingCredential,
    /// Ring tone playing while the peer session negotiates
    Ringing,
    /// Connected to the agent
    Active,
    /// Waiting for the agent's final transcript
    Closing,
}

impl CallState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: &CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            // stop() is legal from anywhere
            (_, Idle) => true,

            (Idle, CollectingCallerName) => true,
            (CollectingCallerName, RequestingMicrophone) => true,
            (RequestingMicrophone, AwaitingCredential) => true,
            (AwaitingCredential, Ringing) => true,
            (Ringing, Active) => true,
            (Active, Closing) => true,

            _ => false,
        }
    }

    /// True while a session holds resources
    pub fn is_live(&self) -> bool {
        !matches!(self, CallState::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::CollectingCallerName => "CollectingCallerName",
            CallState::RequestingMicrophone => "RequestingMicrophone",
            CallState::AwaitingCredential => "AwaitingCredential",
            CallState::Ringing => "Ringing",
            CallState::Active => "Active",
            CallState::Closing => "Closing",
        }
    }
}

impl Default for CallState {
    fn default() -> Self {
        CallState::Idle
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One of the caller details the agent can confirm on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailField {
    Phone,
    Email,
    Reason,
}

impl DetailField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailField::Phone => "phone",
            DetailField::Email => "email",
            DetailField::Reason => "reason",
        }
    }
}

/// Details captured by the agent during the call.
///
/// Each field is replaced wholesale by the latest confirmed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedDetails {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub reason: Option<String>,
}

impl CapturedDetails {
    pub fn set(&mut self, field: DetailField, value: String) {
        let slot = match field {
            DetailField::Phone => &mut self.phone,
            DetailField::Email => &mut self.email,
            DetailField::Reason => &mut self.reason,
        };
        *slot = Some(value);
    }

    pub fn get(&self, field: DetailField) -> Option<&str> {
        match field {
            DetailField::Phone => self.phone.as_deref(),
            DetailField::Email => self.email.as_deref(),
            DetailField::Reason => self.reason.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.reason.is_none()
    }
}

/// Who spoke a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    #[serde(alias = "user")]
    Caller,
    #[serde(alias = "assistant")]
    Agent,
}

/// One turn of the final transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    #[serde(alias = "itemId")]
    pub turn_id: String,
    #[serde(alias = "from")]
    pub speaker: Speaker,
    #[serde(alias = "content")]
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(turn_id: impl Into<String>, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            speaker,
            text: text.into(),
        }
    }
}

/// An audio input the caller can pick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    pub id: String,
    pub label: String,
}

impl InputDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        use CallState::*;

        assert!(Idle.can_transition_to(&CollectingCallerName));
        assert!(CollectingCallerName.can_transition_to(&RequestingMicrophone));
        assert!(RequestingMicrophone.can_transition_to(&AwaitingCredential));
        assert!(AwaitingCredential.can_transition_to(&Ringing));
        assert!(Ringing.can_transition_to(&Active));
        assert!(Active.can_transition_to(&Closing));
        assert!(Closing.can_transition_to(&Idle));
    }

    #[test]
    fn test_stop_is_legal_from_every_state() {
        use CallState::*;

        for state in [
            Idle,
            CollectingCallerName,
            RequestingMicrophone,
            AwaitingCredential,
            Ringing,
            Active,
            Closing,
        ] {
            assert!(state.can_transition_to(&Idle), "{state} -> Idle");
        }
    }

    #[test]
    fn test_invalid_state_transitions() {
        use CallState::*;

        assert!(!Idle.can_transition_to(&Active));
        assert!(!CollectingCallerName.can_transition_to(&Ringing));
        assert!(!AwaitingCredential.can_transition_to(&Active));
        assert!(!Ringing.can_transition_to(&Closing));
        assert!(!Closing.can_transition_to(&Active));
    }

    #[test]
    fn test_captured_details_overwrite() {
        let mut details = CapturedDetails::default();
        assert!(details.is_empty());

        details.set(DetailField::Phone, "555-0100".to_string());
        details.set(DetailField::Phone, "555-0199".to_string());

        assert_eq!(details.get(DetailField::Phone), Some("555-0199"));
        assert_eq!(details.email, None);
        assert!(!details.is_empty());
    }

    #[test]
    fn test_transcript_entry_accepts_both_shapes() {
        let canonical: TranscriptEntry =
            serde_json::from_str(r#"{"turnId":"t1","speaker":"caller","text":"Hello"}"#).unwrap();
        let legacy: TranscriptEntry =
            serde_json::from_str(r#"{"itemId":"t1","from":"user","content":"Hello"}"#).unwrap();

        assert_eq!(canonical, legacy);
        assert_eq!(canonical.speaker, Speaker::Caller);

        let json = serde_json::to_value(&canonical).unwrap();
        assert_eq!(json["turnId"], "t1");
        assert_eq!(json["speaker"], "caller");
    }
}
