//! Call controller
//!
//! The handle the UI layer holds. Operations are forwarded to the state
//! machine task; observers read the latest published snapshot.

use crate::application::machine::{CallStateMachine, Command, Reply};
use crate::config::Config;
use crate::domain::call::credential::CredentialProvider;
use crate::domain::call::instructions::DEFAULT_INSTRUCTIONS;
use crate::domain::call::profile::UserProfile;
use crate::domain::call::repository::CallStore;
use crate::domain::call::value_object::{CallState, CapturedDetails, InputDevice};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::media::capture::MediaCapture;
use crate::infrastructure::media::ring::RingTone;
use crate::infrastructure::protocols::webrtc::SessionNegotiator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

const COMMAND_BUFFER: usize = 32;

/// External services the machine drives
#[derive(Clone)]
pub struct Collaborators {
    pub capture: Arc<dyn MediaCapture>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub negotiator: Arc<dyn SessionNegotiator>,
    pub store: Arc<dyn CallStore>,
    pub ring: Arc<dyn RingTone>,
}

/// Tunables for one controller
#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub instructions_template: String,
    pub profile: UserProfile,
    pub voice: String,
    pub transcription_model: Option<String>,
    pub ring_duration: Duration,
    pub ring_fade: Duration,
    pub device_retry_interval: Duration,
    pub device_retry_attempts: u32,
    pub transcript_timeout: Duration,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            instructions_template: DEFAULT_INSTRUCTIONS.to_string(),
            profile: UserProfile::default(),
            voice: "verse".to_string(),
            transcription_model: Some("whisper-1".to_string()),
            ring_duration: Duration::from_millis(5000),
            ring_fade: Duration::from_millis(1000),
            device_retry_interval: Duration::from_millis(500),
            device_retry_attempts: 10,
            transcript_timeout: Duration::from_secs(15),
        }
    }
}

impl MachineSettings {
    pub fn from_config(config: &Config) -> Self {
        let transcription_model = Some(config.agent.transcription_model.trim())
            .filter(|model| !model.is_empty())
            .map(str::to_string);

        Self {
            instructions_template: config.agent.instructions.clone(),
            profile: config.profile.clone(),
            voice: config.agent.voice.clone(),
            transcription_model,
            ring_duration: Duration::from_millis(config.ring.duration_ms),
            ring_fade: Duration::from_millis(config.ring.fade_ms),
            device_retry_interval: Duration::from_millis(config.media.device_retry_ms),
            device_retry_attempts: config.media.device_retry_attempts,
            transcript_timeout: Duration::from_millis(config.agent.transcript_timeout_ms),
        }
    }
}

/// Everything an observer can see about the current call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub session_id: Option<SessionId>,
    pub state: CallState,
    pub caller_name: String,
    pub devices: Vec<InputDevice>,
    pub selected_device_id: Option<String>,
    pub waiting_for_device: bool,
    pub last_error: Option<String>,
    pub duration_seconds: u64,
    pub captured_details: CapturedDetails,
}

/// Cloneable handle to one call state machine
#[derive(Clone)]
pub struct CallController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallController {
    /// Start the machine task. It runs until every handle is dropped.
    pub fn spawn(collaborators: Collaborators, settings: MachineSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::default());

        let machine = CallStateMachine::new(collaborators, settings, commands_rx, snapshot_tx);
        tokio::spawn(machine.run());

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }

    /// Begin a call attempt; a no-op while one is already live
    pub async fn open(&self) -> Result<CallState> {
        self.request(Command::Open).await
    }

    pub async fn set_caller_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::SetCallerName(name, reply)).await
    }

    pub async fn select_device(&self, device_id: impl Into<String>) -> Result<()> {
        let device_id = device_id.into();
        self.request(|reply| Command::SelectDevice(device_id, reply)).await
    }

    /// Move to the next setup step.
    ///
    /// From `AwaitingCredential` the result is only known once the
    /// credential request finishes.
    pub async fn advance(&self) -> Result<CallState> {
        self.request(Command::Advance).await
    }

    /// Tear the call down at once, without a transcript
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Hang up. While connected, the agent is asked for the transcript
    /// first and the call ends when it arrives.
    pub async fn close(&self) -> Result<CallState> {
        self.request(Command::Close).await
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn duration_seconds(&self) -> u64 {
        self.snapshot.borrow().duration_seconds
    }

    pub fn captured_details(&self) -> CapturedDetails {
        self.snapshot.borrow().captured_details.clone()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every published change
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| CallError::Internal("Call state machine has stopped".to_string()))?;
        rx.await
            .map_err(|_| CallError::Cancelled("Request dropped".to_string()))?
    }
}
