//! Call session aggregate root

use crate::domain::call::instructions::compose_instructions;
use crate::domain::call::profile::UserProfile;
use crate::domain::call::record::CallRecord;
use crate::domain::call::value_object::{
    CallState, CapturedDetails, DetailField, InputDevice, TranscriptEntry,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use chrono::{DateTime, Utc};

/// Call session aggregate root
///
/// Holds the state of one call attempt and enforces its transition rules.
/// Resources (media, peer session, timers) are owned by the orchestrator; the
/// aggregate only records what the UI can observe.
#[derive(Debug, Clone)]
pub struct CallSession {
    id: SessionId,
    state: CallState,
    caller_name: String,
    devices: Vec<InputDevice>,
    selected_device_id: Option<String>,
    /// Device access failed or no device has shown up yet
    waiting_for_device: bool,
    duration_seconds: u64,
    instructions: Option<String>,
    details: CapturedDetails,
    closing: bool,
    opened_at: DateTime<Utc>,
}

impl CallSession {
    /// Start a new call attempt in `CollectingCallerName`
    pub fn open() -> Self {
        Self {
            id: SessionId::new(),
            state: CallState::CollectingCallerName,
            caller_name: String::new(),
            devices: Vec::new(),
            selected_device_id: None,
            waiting_for_device: false,
            duration_seconds: 0,
            instructions: None,
            details: CapturedDetails::default(),
            closing: false,
            opened_at: Utc::now(),
        }
    }

    /// Set the caller name; only allowed before the name step is left
    pub fn set_caller_name(&mut self, name: &str) -> Result<()> {
        if self.state != CallState::CollectingCallerName {
            return Err(CallError::InvalidStateTransition(format!(
                "Caller name is fixed once the call leaves {}",
                CallState::CollectingCallerName
            )));
        }
        self.caller_name = name.to_string();
        Ok(())
    }

    /// Leave the name step: validate the name and compose the instructions
    pub fn begin_microphone_request(
        &mut self,
        template: &str,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.caller_name.trim().is_empty() {
            return Err(CallError::ValidationError(
                "Caller name must not be empty".to_string(),
            ));
        }
        self.transition_to(CallState::RequestingMicrophone)?;

        if self.instructions.is_none() {
            self.instructions = Some(compose_instructions(
                template,
                &self.caller_name,
                now,
                profile,
            ));
        }
        self.waiting_for_device = true;
        Ok(())
    }

    /// Record the enumerated inputs, preselecting the first one
    pub fn set_devices(&mut self, devices: Vec<InputDevice>) {
        let selection_still_valid = self
            .selected_device_id
            .as_ref()
            .map(|id| devices.iter().any(|d| &d.id == id))
            .unwrap_or(false);

        if !selection_still_valid {
            self.selected_device_id = devices.first().map(|d| d.id.clone());
        }
        self.waiting_for_device = devices.is_empty();
        self.devices = devices;
    }

    /// Keep the UI in its waiting state after a failed access request
    pub fn mark_waiting_for_device(&mut self) {
        self.waiting_for_device = true;
    }

    /// Choose the input device; mutable until negotiation starts
    pub fn select_device(&mut self, device_id: &str) -> Result<()> {
        if !matches!(
            self.state,
            CallState::RequestingMicrophone | CallState::AwaitingCredential
        ) {
            return Err(CallError::InvalidStateTransition(format!(
                "Cannot change input device in state {}",
                self.state
            )));
        }
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(CallError::ValidationError(format!(
                "Unknown input device: {}",
                device_id
            )));
        }
        self.selected_device_id = Some(device_id.to_string());
        Ok(())
    }

    /// Move past the microphone step once a device is selected
    pub fn confirm_device(&mut self) -> Result<()> {
        if self.state == CallState::RequestingMicrophone && self.selected_device_id.is_none() {
            return Err(CallError::ValidationError(
                "No input device selected yet".to_string(),
            ));
        }
        self.transition_to(CallState::AwaitingCredential)
    }

    pub fn start_ringing(&mut self) -> Result<()> {
        self.transition_to(CallState::Ringing)
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition_to(CallState::Active)?;
        self.duration_seconds = 0;
        Ok(())
    }

    pub fn begin_closing(&mut self) -> Result<()> {
        self.transition_to(CallState::Closing)?;
        self.closing = true;
        Ok(())
    }

    /// One clock tick; ignored outside `Active`
    pub fn tick(&mut self) -> u64 {
        if self.state == CallState::Active {
            self.duration_seconds += 1;
        }
        self.duration_seconds
    }

    /// Store an agent-confirmed detail
    pub fn capture(&mut self, field: DetailField, value: String) {
        self.details.set(field, value);
    }

    /// Tear the session down to `Idle`, producing the record to persist.
    ///
    /// A record is produced only when both the caller name and the call
    /// target are known.
    pub fn finish(
        &mut self,
        transcript: Vec<TranscriptEntry>,
        call_target: Option<&str>,
    ) -> Option<CallRecord> {
        let duration_seconds = self.duration_seconds;
        self.duration_seconds = 0;
        self.closing = false;
        self.state = CallState::Idle;

        let caller_name = self.caller_name.trim();
        let user_id = call_target?;
        if caller_name.is_empty() {
            return None;
        }

        Some(CallRecord {
            timestamp: Utc::now(),
            duration_seconds,
            user_id: user_id.to_string(),
            caller_name: caller_name.to_string(),
            details: self.details.clone(),
            transcript,
        })
    }

    fn transition_to(&mut self, new_state: CallState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(CallError::InvalidStateTransition(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            )));
        }

        self.state = new_state;
        Ok(())
    }

    // Getters
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn caller_name(&self) -> &str {
        &self.caller_name
    }

    pub fn devices(&self) -> &[InputDevice] {
        &self.devices
    }

    pub fn selected_device_id(&self) -> Option<&str> {
        self.selected_device_id.as_deref()
    }

    pub fn is_waiting_for_device(&self) -> bool {
        self.waiting_for_device
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn details(&self) -> &CapturedDetails {
        &self.details
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}
