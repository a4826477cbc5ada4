//! Call state machine
//!
//! A single task owns the call session and every resource attached to it.
//! Commands from the controller, timer elapses, I/O completions and inbound
//! control messages all arrive as messages and are handled one at a time.
//! Every completion carries the id of the session it was started for and is
//! discarded if that session is no longer live.

use crate::application::controller::{CallSnapshot, Collaborators, MachineSettings};
use crate::application::dispatcher::{DispatchOutcome, FunctionCallDispatcher};
use crate::application::metrics;
use crate::domain::call::aggregate::CallSession;
use crate::domain::call::credential::{CredentialProvider, SessionCredential};
use crate::domain::call::repository::CallStore;
use crate::domain::call::value_object::{CallState, InputDevice, TranscriptEntry};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use crate::domain::tool::{default_tool_declarations, WRITE_TRANSCRIPT};
use crate::infrastructure::media::capture::{MediaCapture, MediaHandle};
use crate::infrastructure::media::ring::RingSignalPlayer;
use crate::infrastructure::protocols::realtime::{
    ChannelSignal, ClientEvent, ControlChannelRouter, ServerEvent, SessionConfig,
    TranscriptionConfig,
};
use crate::infrastructure::protocols::webrtc::{NegotiatedSession, PeerSession, SessionNegotiator};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const TRANSCRIPT_REQUEST: &str = "The call is ending. Thank the caller briefly, then call \
'write_transcript' with the complete transcript of this conversation.";

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Requests from the controller
pub(crate) enum Command {
    Open(Reply<CallState>),
    SetCallerName(String, Reply<()>),
    SelectDevice(String, Reply<()>),
    Advance(Reply<CallState>),
    Stop(Reply<()>),
    Close(Reply<CallState>),
}

/// Completions and signals produced by the machine's own tasks
enum Event {
    AccessResolved {
        session: SessionId,
        result: Result<MediaHandle>,
    },
    DevicesEnumerated {
        session: SessionId,
        attempt: u32,
        result: Result<Vec<InputDevice>>,
    },
    DeviceOpened {
        session: SessionId,
        result: Result<MediaHandle>,
    },
    CredentialResolved {
        session: SessionId,
        result: Result<SessionCredential>,
    },
    NegotiationResolved {
        session: SessionId,
        result: Result<NegotiatedSession>,
    },
    RingElapsed {
        session: SessionId,
    },
    Tick {
        session: SessionId,
    },
    TranscriptTimeout {
        session: SessionId,
    },
    Channel {
        session: SessionId,
        signal: ChannelSignal,
    },
}

enum Negotiation {
    NotStarted,
    Pending,
    Ready(NegotiatedSession),
}

/// Resources held while a session is live
struct LiveCall {
    media: Option<MediaHandle>,
    credential: Option<SessionCredential>,
    fetching_credential: bool,
    pending_advance: Option<Reply<CallState>>,
    negotiation: Negotiation,
    ring_elapsed: bool,
    peer: Option<Box<dyn PeerSession>>,
    router: Option<ControlChannelRouter>,
    initialized: bool,
    clock: Option<JoinHandle<()>>,
    transcript_timer: Option<JoinHandle<()>>,
}

impl LiveCall {
    fn new() -> Self {
        Self {
            media: None,
            credential: None,
            fetching_credential: false,
            pending_advance: None,
            negotiation: Negotiation::NotStarted,
            ring_elapsed: false,
            peer: None,
            router: None,
            initialized: false,
            clock: None,
            transcript_timer: None,
        }
    }

    fn stop_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
    }
}

pub(crate) struct CallStateMachine {
    settings: MachineSettings,
    capture: Arc<dyn MediaCapture>,
    credentials: Arc<dyn CredentialProvider>,
    negotiator: Arc<dyn SessionNegotiator>,
    store: Arc<dyn CallStore>,
    ring: RingSignalPlayer,
    dispatcher: FunctionCallDispatcher,
    /// Current session, or the last finished one until the next `open()`
    session: Option<CallSession>,
    live: Option<LiveCall>,
    last_error: Option<String>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    snapshot: watch::Sender<CallSnapshot>,
}

impl CallStateMachine {
    pub(crate) fn new(
        collaborators: Collaborators,
        settings: MachineSettings,
        commands: mpsc::Receiver<Command>,
        snapshot: watch::Sender<CallSnapshot>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ring = RingSignalPlayer::new(collaborators.ring, settings.ring_fade);

        Self {
            settings,
            capture: collaborators.capture,
            credentials: collaborators.credentials,
            negotiator: collaborators.negotiator,
            store: collaborators.store,
            ring,
            dispatcher: FunctionCallDispatcher::new(),
            session: None,
            live: None,
            last_error: None,
            commands,
            events_tx,
            events_rx,
            snapshot,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Call state machine started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }

        self.terminate(Vec::new(), "shutdown").await;
        info!("Call state machine stopped");
    }

    // ---- commands ----

    async fn handle_command(&mut self, command: Command) {
        // Replies go out after the snapshot so callers observe their own change
        match command {
            Command::Open(reply) => {
                let state = self.open();
                self.publish();
                let _ = reply.send(Ok(state));
            }
            Command::SetCallerName(name, reply) => {
                let result = self.set_caller_name(&name);
                self.publish();
                let _ = reply.send(result);
            }
            Command::SelectDevice(device_id, reply) => {
                let result = self.select_device(&device_id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Advance(reply) => {
                self.advance(reply).await;
                self.publish();
            }
            Command::Stop(reply) => {
                self.terminate(Vec::new(), "stopped").await;
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Command::Close(reply) => {
                let state = self.close().await;
                self.publish();
                let _ = reply.send(Ok(state));
            }
        }
    }

    fn open(&mut self) -> CallState {
        if self.live.is_some() {
            debug!("open() while a call is live; ignoring");
            return self.state();
        }

        let session = CallSession::open();
        info!(session_id = %session.id(), "Call opened");
        metrics::record_call_opened();

        self.session = Some(session);
        self.live = Some(LiveCall::new());
        self.last_error = None;
        self.state()
    }

    fn set_caller_name(&mut self, name: &str) -> Result<()> {
        self.live_session()?.set_caller_name(name)
    }

    fn select_device(&mut self, device_id: &str) -> Result<()> {
        let session = self.live_session()?;
        session.select_device(device_id)?;
        let id = session.id();

        let already_open = self
            .live
            .as_ref()
            .and_then(|live| live.media.as_ref())
            .map(|media| media.device_id() == device_id)
            .unwrap_or(false);

        if !already_open {
            let capture = self.capture.clone();
            let device_id = device_id.to_string();
            self.spawn_event(async move {
                let result = capture.open_device(&device_id).await;
                Event::DeviceOpened {
                    session: id,
                    result,
                }
            });
        }
        Ok(())
    }

    async fn advance(&mut self, reply: Reply<CallState>) {
        let state = self.state();
        match state {
            CallState::CollectingCallerName => {
                let result = self.begin_microphone_request();
                self.publish();
                let _ = reply.send(result.map(|_| CallState::RequestingMicrophone));
            }
            CallState::RequestingMicrophone => {
                let confirmed = match self.session.as_mut() {
                    Some(session) => session.confirm_device(),
                    None => Err(CallError::Internal("No session".to_string())),
                };
                match confirmed {
                    Ok(()) => self.fetch_credential(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            CallState::AwaitingCredential => {
                let fetching = self
                    .live
                    .as_ref()
                    .map(|live| live.fetching_credential)
                    .unwrap_or(false);
                if fetching {
                    let _ = reply.send(Err(CallError::InvalidStateTransition(
                        "Credential request already in flight".to_string(),
                    )));
                } else {
                    self.fetch_credential(reply);
                }
            }
            other => {
                let _ = reply.send(Err(CallError::InvalidStateTransition(format!(
                    "advance() has no effect in state {}",
                    other
                ))));
            }
        }
    }

    fn begin_microphone_request(&mut self) -> Result<()> {
        let template = self.settings.instructions_template.clone();
        let profile = self.settings.profile.clone();
        let session = self.live_session()?;
        session.begin_microphone_request(&template, &profile, Utc::now())?;
        let id = session.id();

        let capture = self.capture.clone();
        self.spawn_event(async move {
            let result = capture.request_access().await;
            Event::AccessResolved {
                session: id,
                result,
            }
        });
        Ok(())
    }

    fn fetch_credential(&mut self, reply: Reply<CallState>) {
        let Some(id) = self.session.as_ref().map(|s| s.id()) else {
            let _ = reply.send(Err(CallError::Internal("No session".to_string())));
            return;
        };
        let Some(live) = self.live.as_mut() else {
            let _ = reply.send(Err(CallError::Internal("No live call".to_string())));
            return;
        };

        live.fetching_credential = true;
        live.pending_advance = Some(reply);

        let credentials = self.credentials.clone();
        self.spawn_event(async move {
            let result = credentials.fetch().await;
            Event::CredentialResolved {
                session: id,
                result,
            }
        });
    }

    async fn close(&mut self) -> CallState {
        match self.state() {
            CallState::Idle => CallState::Idle,
            CallState::Closing => CallState::Closing,
            CallState::Active => self.begin_closing().await,
            // Nothing to wrap up before the agent answers
            _ => {
                self.terminate(Vec::new(), "closed during setup").await;
                CallState::Idle
            }
        }
    }

    async fn begin_closing(&mut self) -> CallState {
        let channel_open = self
            .live
            .as_ref()
            .and_then(|live| live.router.as_ref())
            .map(|router| router.is_open())
            .unwrap_or(false);

        if !channel_open {
            warn!("Control channel not open; closing without a transcript");
            self.terminate(Vec::new(), "closed without channel").await;
            return CallState::Idle;
        }

        let (Some(session), Some(live)) = (self.session.as_mut(), self.live.as_mut()) else {
            return CallState::Idle;
        };
        if let Err(e) = session.begin_closing() {
            warn!("Cannot close: {}", e);
            return session.state();
        }
        live.stop_clock();
        let id = session.id();
        info!(session_id = %id, "Requesting final transcript");

        if let Some(router) = live.router.as_ref() {
            let request = ClientEvent::forced_tool_response(WRITE_TRANSCRIPT, TRANSCRIPT_REQUEST);
            if let Err(e) = router.send(request).await {
                warn!("Failed to request transcript: {}", e);
            }
        }

        let timeout = self.settings.transcript_timeout;
        let events = self.events_tx.clone();
        live.transcript_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(Event::TranscriptTimeout { session: id });
        }));

        CallState::Closing
    }

    // ---- events ----

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::AccessResolved { session, result } => {
                if self.is_stale(session) {
                    debug!(%session, "Discarding stale access result");
                    if let Ok(media) = result {
                        media.stop();
                    }
                    return;
                }
                self.on_access_resolved(result);
            }
            Event::DevicesEnumerated {
                session,
                attempt,
                result,
            } => {
                if !self.is_stale(session) {
                    self.on_devices_enumerated(attempt, result);
                }
            }
            Event::DeviceOpened { session, result } => {
                if self.is_stale(session) {
                    if let Ok(media) = result {
                        media.stop();
                    }
                    return;
                }
                self.on_device_opened(result);
            }
            Event::CredentialResolved { session, result } => {
                if self.is_stale(session) {
                    debug!(%session, "Discarding stale credential");
                    return;
                }
                self.on_credential_resolved(result).await;
            }
            Event::NegotiationResolved { session, result } => {
                if self.is_stale(session) {
                    debug!(%session, "Discarding stale negotiation");
                    if let Ok(negotiated) = result {
                        tokio::spawn(release_negotiated(negotiated));
                    }
                    return;
                }
                self.on_negotiation_resolved(result).await;
            }
            Event::RingElapsed { session } => {
                if !self.is_stale(session) {
                    self.on_ring_elapsed().await;
                }
            }
            Event::Tick { session } => {
                if !self.is_stale(session) {
                    if let Some(s) = self.session.as_mut() {
                        s.tick();
                    }
                }
            }
            Event::TranscriptTimeout { session } => {
                if !self.is_stale(session) && self.state() == CallState::Closing {
                    warn!(%session, "Agent never sent the transcript");
                    self.terminate(Vec::new(), "transcript timeout").await;
                }
            }
            Event::Channel { session, signal } => {
                if !self.is_stale(session) {
                    self.on_channel_signal(signal).await;
                }
            }
        }
        self.publish();
    }

    fn on_access_resolved(&mut self, result: Result<MediaHandle>) {
        let Some(id) = self.session.as_ref().map(|s| s.id()) else {
            return;
        };

        match result {
            Ok(media) => {
                info!(session_id = %id, device = media.device_id(), "Microphone access granted");
                if let Some(live) = self.live.as_mut() {
                    if let Some(previous) = live.media.replace(media) {
                        previous.stop();
                    }
                }
                self.enumerate_devices(id, 0, Duration::ZERO);
            }
            Err(e) => {
                warn!(session_id = %id, "Microphone access failed: {}", e);
                self.last_error = Some(e.to_string());
                if let Some(session) = self.session.as_mut() {
                    session.mark_waiting_for_device();
                }
            }
        }
    }

    fn enumerate_devices(&self, id: SessionId, attempt: u32, delay: Duration) {
        let capture = self.capture.clone();
        self.spawn_event(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = capture.enumerate_inputs().await;
            Event::DevicesEnumerated {
                session: id,
                attempt,
                result,
            }
        });
    }

    fn on_devices_enumerated(&mut self, attempt: u32, result: Result<Vec<InputDevice>>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let id = session.id();

        let devices = match result {
            Ok(devices) => devices,
            Err(e) => {
                warn!(session_id = %id, "Device enumeration failed: {}", e);
                Vec::new()
            }
        };

        if !devices.is_empty() {
            debug!(session_id = %id, count = devices.len(), "Input devices listed");
            session.set_devices(devices);
            return;
        }

        session.set_devices(Vec::new());
        if attempt + 1 < self.settings.device_retry_attempts {
            self.enumerate_devices(id, attempt + 1, self.settings.device_retry_interval);
        } else {
            warn!(session_id = %id, "No input devices available");
        }
    }

    fn on_device_opened(&mut self, result: Result<MediaHandle>) {
        let (Some(session), Some(live)) = (self.session.as_ref(), self.live.as_mut()) else {
            return;
        };

        match result {
            Ok(media) => {
                let wanted = session.selected_device_id() == Some(media.device_id());
                let before_negotiation = matches!(live.negotiation, Negotiation::NotStarted);
                if !wanted || !before_negotiation {
                    debug!(device = media.device_id(), "Discarding superseded input");
                    media.stop();
                    return;
                }
                info!(session_id = %session.id(), device = media.device_id(), "Switched input device");
                if let Some(previous) = live.media.replace(media) {
                    previous.stop();
                }
            }
            Err(e) => {
                warn!("Failed to open input device: {}", e);
                self.last_error = Some(e.to_string());
            }
        }
    }

    async fn on_credential_resolved(&mut self, result: Result<SessionCredential>) {
        let (Some(session), Some(live)) = (self.session.as_mut(), self.live.as_mut()) else {
            return;
        };
        live.fetching_credential = false;
        let reply = live.pending_advance.take();
        let id = session.id();

        let credential = result.and_then(|credential| {
            if credential.is_expired(Utc::now()) {
                Err(CallError::CredentialFetch("Credential already expired".to_string()))
            } else {
                Ok(credential)
            }
        });

        let credential = match credential {
            Ok(credential) => credential,
            Err(e) => {
                warn!(session_id = %id, "Credential fetch failed: {}", e);
                self.last_error = Some(e.to_string());
                self.publish();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        if let Err(e) = session.start_ringing() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(e));
            }
            return;
        }
        info!(session_id = %id, "Credential received, ringing");
        self.last_error = None;

        let local_track = live.media.as_ref().and_then(|media| media.local_track());
        live.credential = Some(credential.clone());
        live.negotiation = Negotiation::Pending;

        let negotiator = self.negotiator.clone();
        self.spawn_event(async move {
            let result = negotiator.negotiate(&credential, local_track).await;
            Event::NegotiationResolved {
                session: id,
                result,
            }
        });

        self.ring.play().await;
        let events = self.events_tx.clone();
        self.ring
            .schedule_timeout(self.settings.ring_duration, move || {
                let _ = events.send(Event::RingElapsed { session: id });
            });

        self.publish();
        if let Some(reply) = reply {
            let _ = reply.send(Ok(CallState::Ringing));
        }
    }

    async fn on_negotiation_resolved(&mut self, result: Result<NegotiatedSession>) {
        match result {
            Ok(negotiated) => {
                let ring_elapsed = self.live.as_ref().map(|l| l.ring_elapsed).unwrap_or(false);
                if ring_elapsed {
                    self.enter_active(negotiated);
                } else if let Some(live) = self.live.as_mut() {
                    debug!("Negotiation finished before the ring timer");
                    live.negotiation = Negotiation::Ready(negotiated);
                }
            }
            Err(e) => {
                error!("Session negotiation failed: {}", e);
                self.last_error = Some(e.to_string());
                self.terminate(Vec::new(), "negotiation failed").await;
            }
        }
    }

    async fn on_ring_elapsed(&mut self) {
        if self.state() != CallState::Ringing {
            return;
        }
        let Some(live) = self.live.as_mut() else {
            return;
        };
        live.ring_elapsed = true;

        match std::mem::replace(&mut live.negotiation, Negotiation::Pending) {
            Negotiation::Ready(negotiated) => self.enter_active(negotiated),
            Negotiation::Pending => debug!("Ring elapsed; waiting for negotiation"),
            Negotiation::NotStarted => {
                live.negotiation = Negotiation::NotStarted;
                warn!("Ring elapsed without a negotiation");
                self.terminate(Vec::new(), "negotiation missing").await;
            }
        }
    }

    fn enter_active(&mut self, negotiated: NegotiatedSession) {
        let (Some(session), Some(live)) = (self.session.as_mut(), self.live.as_mut()) else {
            tokio::spawn(release_negotiated(negotiated));
            return;
        };
        if let Err(e) = session.activate() {
            warn!("Cannot activate call: {}", e);
            tokio::spawn(release_negotiated(negotiated));
            return;
        }
        let id = session.id();
        info!(session_id = %id, "Call active");
        metrics::record_call_activated();

        let NegotiatedSession { peer, control } = negotiated;
        live.peer = Some(peer);

        let events = self.events_tx.clone();
        live.router = Some(ControlChannelRouter::open(control, move |signal| {
            let _ = events.send(Event::Channel {
                session: id,
                signal,
            });
        }));

        let events = self.events_tx.clone();
        live.clock = Some(tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if events.send(Event::Tick { session: id }).is_err() {
                    break;
                }
            }
        }));
    }

    async fn on_channel_signal(&mut self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Open => {
                debug!("Control channel open");
                self.initialize_agent().await;
            }
            ChannelSignal::Message(text) => self.on_server_message(&text).await,
            ChannelSignal::Closed => {
                if matches!(self.state(), CallState::Active | CallState::Closing) {
                    warn!("Control channel closed by the remote end");
                    self.terminate(Vec::new(), "channel closed").await;
                }
            }
        }
    }

    async fn on_server_message(&mut self, text: &str) {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Unparseable control message: {}", e);
                return;
            }
        };

        match event {
            ServerEvent::SessionCreated => self.initialize_agent().await,
            ServerEvent::FunctionCall(call) => {
                let outcome = {
                    let (Some(session), Some(live)) = (self.session.as_mut(), self.live.as_ref())
                    else {
                        return;
                    };
                    let Some(router) = live.router.as_ref() else {
                        return;
                    };
                    self.dispatcher.dispatch(&call, session, router).await
                };

                if let DispatchOutcome::Terminate(transcript) = outcome {
                    if matches!(self.state(), CallState::Active | CallState::Closing) {
                        self.terminate(transcript, "transcript received").await;
                    }
                }
            }
            ServerEvent::Error { error } => warn!(%error, "Agent reported an error"),
            ServerEvent::Other => {}
        }
    }

    /// Send the session configuration and the first response request,
    /// once per session
    async fn initialize_agent(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let Some(router) = live.router.as_mut() else {
            return;
        };
        router.mark_open();
        if live.initialized {
            return;
        }
        live.initialized = true;

        let instructions = self
            .session
            .as_ref()
            .and_then(|s| s.instructions())
            .unwrap_or(self.settings.instructions_template.as_str())
            .to_string();
        let tools = live
            .credential
            .as_ref()
            .and_then(|c| c.tool_declarations.clone())
            .unwrap_or_else(default_tool_declarations);

        let update = ClientEvent::SessionUpdate {
            session: SessionConfig {
                instructions,
                tools,
                tool_choice: "auto".to_string(),
                voice: self.settings.voice.clone(),
                input_audio_transcription: self
                    .settings
                    .transcription_model
                    .clone()
                    .map(|model| TranscriptionConfig { model }),
            },
        };

        for event in [update, ClientEvent::continue_response()] {
            if let Err(e) = router.send(event).await {
                warn!("Failed to initialize agent session: {}", e);
            }
        }
        info!("Agent session initialized");
    }

    // ---- teardown ----

    /// Release everything the live session holds and return to `Idle`.
    /// Safe to call when nothing is live.
    async fn terminate(&mut self, transcript: Vec<TranscriptEntry>, reason: &'static str) {
        let Some(mut live) = self.live.take() else {
            return;
        };

        if let Some(reply) = live.pending_advance.take() {
            let _ = reply.send(Err(CallError::Cancelled(reason.to_string())));
        }
        live.stop_clock();
        if let Some(timer) = live.transcript_timer.take() {
            timer.abort();
        }
        if let Some(mut router) = live.router.take() {
            router.close().await;
        }
        if let Some(peer) = live.peer.take() {
            peer.close().await;
        }
        if let Negotiation::Ready(negotiated) =
            std::mem::replace(&mut live.negotiation, Negotiation::NotStarted)
        {
            release_negotiated(negotiated).await;
        }
        if let Some(media) = live.media.take() {
            media.stop();
        }
        self.ring.stop().await;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let duration = Duration::from_secs(session.duration_seconds());
        let record = session.finish(transcript, self.settings.profile.call_target());
        info!(session_id = %session.id(), reason, seconds = duration.as_secs(), "Call ended");
        metrics::record_call_ended(reason, duration);

        if let Some(record) = record {
            let store = self.store.clone();
            tokio::spawn(async move {
                match store.submit(&record).await {
                    Ok(()) => metrics::record_call_persisted(),
                    Err(e) => {
                        warn!("Failed to persist call record: {}", e);
                        metrics::record_persistence_failure();
                    }
                }
            });
        }
    }

    // ---- helpers ----

    fn state(&self) -> CallState {
        match (&self.session, &self.live) {
            (Some(session), Some(_)) => session.state(),
            _ => CallState::Idle,
        }
    }

    fn is_stale(&self, id: SessionId) -> bool {
        match (&self.session, &self.live) {
            (Some(session), Some(_)) => session.id() != id,
            _ => true,
        }
    }

    fn live_session(&mut self) -> Result<&mut CallSession> {
        if self.live.is_none() {
            return Err(CallError::InvalidStateTransition(
                "No call in progress".to_string(),
            ));
        }
        self.session
            .as_mut()
            .ok_or_else(|| CallError::Internal("Live call without a session".to_string()))
    }

    fn spawn_event<F>(&self, task: F)
    where
        F: std::future::Future<Output = Event> + Send + 'static,
    {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            let _ = events.send(event);
        });
    }

    fn publish(&self) {
        let snapshot = match &self.session {
            Some(session) => CallSnapshot {
                session_id: Some(session.id()),
                state: self.state(),
                caller_name: session.caller_name().to_string(),
                devices: session.devices().to_vec(),
                selected_device_id: session.selected_device_id().map(str::to_string),
                waiting_for_device: self.live.is_some() && session.is_waiting_for_device(),
                last_error: self.last_error.clone(),
                duration_seconds: session.duration_seconds(),
                captured_details: session.details().clone(),
            },
            None => CallSnapshot::default(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn release_negotiated(negotiated: NegotiatedSession) {
    futures::join!(negotiated.control.transport.close(), negotiated.peer.close());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::credential::MockCredentialProvider;
    use crate::domain::call::profile::UserProfile;
    use crate::domain::call::repository::MockCallStore;
    use crate::infrastructure::media::capture::MediaStream;
    use crate::infrastructure::media::ring::SilentRingTone;
    use crate::infrastructure::protocols::realtime::{ControlLink, ControlTransport};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    struct NullStream;

    impl MediaStream for NullStream {
        fn device_id(&self) -> &str {
            "mic"
        }
        fn local_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
            None
        }
        fn stop(&self) {}
    }

    struct OneMic;

    #[async_trait]
    impl MediaCapture for OneMic {
        async fn request_access(&self) -> Result<MediaHandle> {
            Ok(Box::new(NullStream))
        }
        async fn enumerate_inputs(&self) -> Result<Vec<InputDevice>> {
            Ok(vec![InputDevice::new("mic", "Mic")])
        }
        async fn open_device(&self, _device_id: &str) -> Result<MediaHandle> {
            Ok(Box::new(NullStream))
        }
    }

    struct NullPeer;

    #[async_trait]
    impl PeerSession for NullPeer {
        async fn close(&self) {}
    }

    #[derive(Default)]
    struct Transport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ControlTransport for Transport {
        async fn send_text(&self, text: String) -> Result<()> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
        async fn close(&self) {}
    }

    struct Negotiator {
        transport: Arc<Transport>,
        signals: Mutex<Option<mpsc::UnboundedReceiver<ChannelSignal>>>,
    }

    #[async_trait]
    impl SessionNegotiator for Negotiator {
        async fn negotiate(
            &self,
            _credential: &SessionCredential,
            _local_track: Option<Arc<TrackLocalStaticSample>>,
        ) -> Result<NegotiatedSession> {
            let signals = self.signals.lock().unwrap().take().unwrap();
            Ok(NegotiatedSession {
                peer: Box::new(NullPeer),
                control: ControlLink::new(self.transport.clone(), signals),
            })
        }
    }

    struct Harness {
        commands: mpsc::Sender<Command>,
        snapshot: watch::Receiver<CallSnapshot>,
        signals: mpsc::UnboundedSender<ChannelSignal>,
        transport: Arc<Transport>,
    }

    impl Harness {
        async fn send<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
            let (tx, rx) = oneshot::channel();
            self.commands.send(make(tx)).await.unwrap();
            rx.await.unwrap()
        }

        async fn settle(&self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn spawn_machine(store: MockCallStore, credentials: MockCredentialProvider) -> Harness {
        let transport = Arc::new(Transport::default());
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let negotiator = Negotiator {
            transport: transport.clone(),
            signals: Mutex::new(Some(signals_rx)),
        };

        let settings = MachineSettings {
            profile: UserProfile {
                user_id: "user-1".to_string(),
                ..Default::default()
            },
            ..MachineSettings::default()
        };
        let collaborators = Collaborators {
            capture: Arc::new(OneMic),
            credentials: Arc::new(credentials),
            negotiator: Arc::new(negotiator),
            store: Arc::new(store),
            ring: Arc::new(SilentRingTone),
        };

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::default());
        let machine = CallStateMachine::new(collaborators, settings, commands_rx, snapshot_tx);
        tokio::spawn(machine.run());

        Harness {
            commands: commands_tx,
            snapshot: snapshot_rx,
            signals: signals_tx,
            transport,
        }
    }

    fn working_credentials() -> MockCredentialProvider {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_fetch()
            .returning(|| Ok(SessionCredential::new("ek_test")));
        credentials
    }

    async fn ring_through(h: &Harness) {
        h.send(Command::Open).await.unwrap();
        h.send(|r| Command::SetCallerName("Sam".to_string(), r)).await.unwrap();
        h.send(Command::Advance).await.unwrap();
        h.settle().await;
        assert_eq!(
            h.send(Command::Advance).await.unwrap(),
            CallState::Ringing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_call_persists_transcript_once() {
        let mut store = MockCallStore::new();
        store
            .expect_submit()
            .withf(|record| {
                record.caller_name == "Sam"
                    && record.transcript.len() == 2
                    && record.details.reason.as_deref() == Some("Invoice")
            })
            .times(1)
            .returning(|_| Ok(()));

        let h = spawn_machine(store, working_credentials());
        ring_through(&h).await;

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(h.snapshot.borrow().state, CallState::Active);

        h.signals.send(ChannelSignal::Open).unwrap();
        h.signals
            .send(ChannelSignal::Message(
                r#"{"type":"function_call","name":"show_details_reason","arguments":"{\"reason\":\"Invoice\"}"}"#
                    .to_string(),
            ))
            .unwrap();
        h.settle().await;

        assert_eq!(h.send(Command::Close).await.unwrap(), CallState::Closing);
        h.signals
            .send(ChannelSignal::Message(
                r#"{"type":"function_call","name":"write_transcript","arguments":"{\"transcript\":[{\"turnId\":\"1\",\"speaker\":\"agent\",\"text\":\"Hello\"},{\"turnId\":\"2\",\"speaker\":\"caller\",\"text\":\"Hi\"}]}"}"#
                    .to_string(),
            ))
            .unwrap();
        h.settle().await;

        let snapshot = h.snapshot.borrow().clone();
        assert_eq!(snapshot.state, CallState::Idle);
        assert_eq!(snapshot.duration_seconds, 0);
        assert_eq!(snapshot.captured_details.reason.as_deref(), Some("Invoice"));

        // session.update, response.create, ack, transcript request
        assert_eq!(h.transport.sent.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_credential_stays_awaiting() {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_fetch()
            .returning(|| Err(CallError::CredentialFetch("503".to_string())));
        let mut store = MockCallStore::new();
        store.expect_submit().returning(|_| Ok(()));

        let h = spawn_machine(store, credentials);
        h.send(Command::Open).await.unwrap();
        h.send(|r| Command::SetCallerName("Sam".to_string(), r)).await.unwrap();
        h.send(Command::Advance).await.unwrap();
        h.settle().await;

        let result = h.send(Command::Advance).await;
        assert!(matches!(result, Err(CallError::CredentialFetch(_))));

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = h.snapshot.borrow().clone();
        assert_eq!(snapshot.state, CallState::AwaitingCredential);
        assert!(snapshot.last_error.is_some());
        assert!(h.transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_ringing_never_activates() {
        let mut store = MockCallStore::new();
        store.expect_submit().times(1).returning(|_| Ok(()));

        let h = spawn_machine(store, working_credentials());
        ring_through(&h).await;

        h.send(Command::Stop).await.unwrap();
        h.send(Command::Stop).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.snapshot.borrow().state, CallState::Idle);
        assert!(h.transport.sent.lock().unwrap().is_empty());
    }
}
