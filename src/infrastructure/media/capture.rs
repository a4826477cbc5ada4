//! Audio capture seam and the WAV-file adapter
//!
//! WAV inputs stand in for microphones when no audio device is wanted: an
//! opened source pumps its clip, looped, into a PCMU track in 20 ms samples.

use crate::domain::audio::{AudioPlayer, PcmClip, FRAME_MS};
use crate::domain::call::value_object::InputDevice;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::infrastructure::media::g711::PcmuCodec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// An open audio input
pub trait MediaStream: Send + Sync {
    fn device_id(&self) -> &str;

    /// Track carrying this input to the peer, if it produces one
    fn local_track(&self) -> Option<Arc<TrackLocalStaticSample>>;

    /// Release the input; stopping twice is harmless
    fn stop(&self);
}

pub type MediaHandle = Box<dyn MediaStream>;

/// Device permission and enumeration
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Ask for access and open the default input
    async fn request_access(&self) -> Result<MediaHandle>;

    /// Available inputs, in display order
    async fn enumerate_inputs(&self) -> Result<Vec<InputDevice>>;

    /// Open a specific input; access must already be granted
    async fn open_device(&self, device_id: &str) -> Result<MediaHandle>;
}

/// Outbound PCMU track
pub fn pcmu_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_owned(),
            clock_rate: 8000,
            channels: 1,
            ..Default::default()
        },
        "audio".to_owned(),
        "callme".to_owned(),
    ))
}

/// One configured capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    pub id: String,
    pub label: String,
    pub path: PathBuf,
}

/// Capture adapter backed by WAV files
pub struct WavMediaCapture {
    sources: Vec<InputSource>,
}

impl WavMediaCapture {
    pub fn new(sources: Vec<InputSource>) -> Self {
        Self { sources }
    }

    fn open_source(&self, source: &InputSource) -> Result<MediaHandle> {
        let clip = PcmClip::load(&source.path).map_err(|e| {
            CallError::PermissionDenied(format!("Input {} unavailable: {}", source.id, e))
        })?;
        info!(
            device = %source.id,
            seconds = clip.duration_secs(),
            "Opened audio input"
        );
        Ok(Box::new(WavCaptureStream::start(source.id.clone(), clip)))
    }
}

#[async_trait]
impl MediaCapture for WavMediaCapture {
    async fn request_access(&self) -> Result<MediaHandle> {
        let source = self
            .sources
            .first()
            .ok_or_else(|| CallError::PermissionDenied("No audio input configured".to_string()))?;
        self.open_source(source)
    }

    async fn enumerate_inputs(&self) -> Result<Vec<InputDevice>> {
        Ok(self
            .sources
            .iter()
            .map(|s| InputDevice::new(s.id.clone(), s.label.clone()))
            .collect())
    }

    async fn open_device(&self, device_id: &str) -> Result<MediaHandle> {
        let source = self
            .sources
            .iter()
            .find(|s| s.id == device_id)
            .ok_or_else(|| CallError::ValidationError(format!("Unknown input device: {}", device_id)))?;
        self.open_source(source)
    }
}

struct WavCaptureStream {
    device_id: String,
    track: Arc<TrackLocalStaticSample>,
    pump: JoinHandle<()>,
    stopped: AtomicBool,
}

impl WavCaptureStream {
    fn start(device_id: String, clip: PcmClip) -> Self {
        let track = pcmu_track();
        let pump = tokio::spawn(pump_frames(track.clone(), clip));
        Self {
            device_id,
            track,
            pump,
            stopped: AtomicBool::new(false),
        }
    }
}

async fn pump_frames(track: Arc<TrackLocalStaticSample>, clip: PcmClip) {
    let frame = Duration::from_millis(FRAME_MS as u64);
    let mut player = AudioPlayer::new(&clip, true);
    let mut ticker = tokio::time::interval(frame);

    loop {
        ticker.tick().await;
        let Some(pcm) = player.next_frame() else {
            break;
        };
        let sample = Sample {
            data: PcmuCodec::encode(&pcm),
            duration: frame,
            ..Default::default()
        };
        // Writes before the track is bound are discarded by the track itself
        if let Err(e) = track.write_sample(&sample).await {
            debug!("Dropping capture frame: {}", e);
        }
    }
}

impl MediaStream for WavCaptureStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn local_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        Some(self.track.clone())
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.pump.abort();
            debug!(device = %self.device_id, "Released audio input");
        }
    }
}

impl Drop for WavCaptureStream {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
