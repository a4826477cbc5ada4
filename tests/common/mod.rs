//! Counting fakes for driving the call controller end to end

#![allow(dead_code)]

use async_trait::async_trait;
use callme::application::{CallController, CallSnapshot, Collaborators, MachineSettings};
use callme::domain::call::{
    CallRecord, CallStore, CredentialProvider, InputDevice, SessionCredential, UserProfile,
};
use callme::domain::shared::{CallError, Result};
use callme::infrastructure::media::{MediaCapture, MediaHandle, MediaStream, RingTone};
use callme::infrastructure::persistence::InMemoryCallStore;
use callme::infrastructure::protocols::realtime::{ChannelSignal, ControlLink, ControlTransport};
use callme::infrastructure::protocols::webrtc::{NegotiatedSession, PeerSession, SessionNegotiator};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

pub const USER_ID: &str = "user-1";

// ---- media ----

pub struct FakeStream {
    device_id: String,
    stops: Arc<AtomicUsize>,
}

impl MediaStream for FakeStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn local_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        None
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeCapture {
    pub devices: Mutex<Vec<InputDevice>>,
    pub deny: AtomicBool,
    pub opened: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn with_devices(devices: Vec<InputDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }

    fn stream(&self, device_id: &str) -> MediaHandle {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeStream {
            device_id: device_id.to_string(),
            stops: self.stops.clone(),
        })
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn request_access(&self) -> Result<MediaHandle> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::PermissionDenied("denied by test".to_string()));
        }
        let first = self
            .devices
            .lock()
            .unwrap()
            .first()
            .map(|d| d.id.clone())
            .unwrap_or_else(|| "default".to_string());
        Ok(self.stream(&first))
    }

    async fn enumerate_inputs(&self) -> Result<Vec<InputDevice>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn open_device(&self, device_id: &str) -> Result<MediaHandle> {
        Ok(self.stream(device_id))
    }
}

// ---- ring ----

#[derive(Default)]
pub struct CountingTone {
    pub plays: AtomicUsize,
    pub fades: AtomicUsize,
    pub stops: AtomicUsize,
}

#[async_trait]
impl RingTone for CountingTone {
    async fn play(&self) {
        self.plays.fetch_add(1, Ordering::SeqCst);
    }

    async fn fade_out(&self, duration: Duration) {
        self.fades.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(duration).await;
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- credentials ----

#[derive(Default)]
pub struct FakeCredentials {
    pub fail: AtomicBool,
    pub fetches: AtomicUsize,
    /// How long each fetch takes; read when the fetch starts
    pub delay: Mutex<Duration>,
}

impl FakeCredentials {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl CredentialProvider for FakeCredentials {
    async fn fetch(&self) -> Result<SessionCredential> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::CredentialFetch("token endpoint returned 503".to_string()));
        }
        Ok(SessionCredential::new("ek_test"))
    }
}

// ---- negotiation ----

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
}

impl RecordingTransport {
    /// The `type` of every event sent so far
    pub fn sent_types(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn sent_events(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }
}

#[async_trait]
impl ControlTransport for RecordingTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct CountingPeer {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl PeerSession for CountingPeer {
    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeNegotiator {
    pub fail: AtomicBool,
    pub negotiations: AtomicUsize,
    pub peer_closes: Arc<AtomicUsize>,
    pub transport: Arc<RecordingTransport>,
    /// How long each negotiation takes; read when it starts
    pub delay: Mutex<Duration>,
    signals: Mutex<Option<mpsc::UnboundedSender<ChannelSignal>>>,
}

impl FakeNegotiator {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Push a signal into the most recently negotiated channel
    pub fn signal(&self, signal: ChannelSignal) {
        if let Some(tx) = self.signals.lock().unwrap().as_ref() {
            let _ = tx.send(signal);
        }
    }

    pub fn message(&self, text: &str) {
        self.signal(ChannelSignal::Message(text.to_string()));
    }
}

#[async_trait]
impl SessionNegotiator for FakeNegotiator {
    async fn negotiate(
        &self,
        _credential: &SessionCredential,
        _local_track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<NegotiatedSession> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::Negotiation("signaling returned 401".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.signals.lock().unwrap() = Some(tx);
        Ok(NegotiatedSession {
            peer: Box::new(CountingPeer {
                closes: self.peer_closes.clone(),
            }),
            control: ControlLink::new(self.transport.clone(), rx),
        })
    }
}

// ---- persistence ----

/// In-memory store that can be told to reject submissions
#[derive(Default)]
pub struct FlakyStore {
    pub fail: AtomicBool,
    pub attempts: AtomicUsize,
    inner: InMemoryCallStore,
}

impl FlakyStore {
    pub async fn records_for(&self, user_id: &str) -> Vec<CallRecord> {
        self.inner.records_for(user_id).await
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl CallStore for FlakyStore {
    async fn submit(&self, record: &CallRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::Persistence("store returned 500".to_string()));
        }
        self.inner.submit(record).await
    }
}

// ---- harness ----

pub struct Harness {
    pub controller: CallController,
    pub capture: Arc<FakeCapture>,
    pub tone: Arc<CountingTone>,
    pub credentials: Arc<FakeCredentials>,
    pub negotiator: Arc<FakeNegotiator>,
    pub store: Arc<FlakyStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_capture(FakeCapture::with_devices(vec![
            InputDevice::new("mic-1", "Built-in microphone"),
            InputDevice::new("mic-2", "Headset"),
        ]))
    }

    pub fn with_capture(capture: FakeCapture) -> Self {
        let capture = Arc::new(capture);
        let tone = Arc::new(CountingTone::default());
        let credentials = Arc::new(FakeCredentials::default());
        let negotiator = Arc::new(FakeNegotiator::default());
        let store = Arc::new(FlakyStore::default());

        let settings = MachineSettings {
            profile: UserProfile {
                user_id: USER_ID.to_string(),
                name: "Jordan Example".to_string(),
                ..Default::default()
            },
            ..MachineSettings::default()
        };
        let collaborators = Collaborators {
            capture: capture.clone(),
            credentials: credentials.clone(),
            negotiator: negotiator.clone(),
            store: store.clone(),
            ring: tone.clone(),
        };

        Self {
            controller: CallController::spawn(collaborators, settings),
            capture,
            tone,
            credentials,
            negotiator,
            store,
        }
    }

    pub fn transport(&self) -> &RecordingTransport {
        &self.negotiator.transport
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.controller.snapshot()
    }

    /// Let spawned work and timers run (the test clock is paused)
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Poll the published snapshot until `check` holds
    pub async fn wait_for(&self, what: &str, check: impl Fn(&CallSnapshot) -> bool) {
        for _ in 0..200 {
            if check(&self.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("timed out waiting for {}: {:?}", what, self.snapshot());
    }

    /// Open, name the caller and let the microphone step finish
    pub async fn reach_device_selection(&self, name: &str) {
        self.controller.open().await.unwrap();
        self.controller.set_caller_name(name).await.unwrap();
        self.controller.advance().await.unwrap();
        self.wait_for("device list", |s| !s.devices.is_empty()).await;
    }

    /// Drive a call all the way to `Active` with the channel open
    pub async fn connect(&self, name: &str) {
        self.reach_device_selection(name).await;
        self.controller.advance().await.unwrap();
        self.wait_for("active", |s| s.state == callme::domain::call::CallState::Active)
            .await;
        self.negotiator.signal(ChannelSignal::Open);
        self.settle().await;
    }
}
