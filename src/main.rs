use callme::application::metrics::describe_metrics;
use callme::application::{CallController, Collaborators, MachineSettings};
use callme::config::{Config, MediaBackend, MediaConfig};
use callme::domain::audio::PcmClip;
use callme::infrastructure::http::HttpTokenClient;
#[cfg(feature = "audio-cpal")]
use callme::infrastructure::media::{CpalMediaCapture, CpalPlayback};
use callme::infrastructure::media::{
    ringback_clip, MediaCapture, RingTone, SilentRingTone, WavMediaCapture, WavRingTone,
};
use callme::infrastructure::persistence::HttpCallStore;
use callme::infrastructure::protocols::webrtc::WebRtcNegotiator;
use callme::interface::console;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting callme");

    // Load configuration
    let config = Config::load()?;
    info!(
        token_url = %config.endpoints.token_url,
        signaling_url = %config.endpoints.signaling_url,
        model = %config.endpoints.model,
        "Configuration loaded"
    );
    if config.profile.call_target().is_none() {
        warn!("No profile user id configured; call records will not be stored");
    }

    describe_metrics();

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    // Speaker shared by the ring tone and the agent's voice
    #[cfg(feature = "audio-cpal")]
    let playback = open_playback(&config.media).await;
    #[cfg(feature = "audio-cpal")]
    let speaker = playback.as_ref().map(CpalPlayback::sender);
    #[cfg(not(feature = "audio-cpal"))]
    let speaker: Option<mpsc::UnboundedSender<Vec<i16>>> = None;

    let mut negotiator = WebRtcNegotiator::new(
        http.clone(),
        config.endpoints.signaling_url.clone(),
        config.endpoints.model.clone(),
        config.webrtc.ice_servers.clone(),
    );
    if let Some(sink) = speaker.clone() {
        negotiator = negotiator.with_playback(sink);
    }

    let collaborators = Collaborators {
        capture: media_capture(&config.media),
        credentials: Arc::new(HttpTokenClient::new(
            http.clone(),
            config.endpoints.token_url.clone(),
        )),
        negotiator: Arc::new(negotiator),
        store: Arc::new(HttpCallStore::new(http, config.endpoints.store_url.clone())),
        ring: load_ring_tone(&config.ring.ringtone_path, speaker),
    };

    let controller = CallController::spawn(collaborators, MachineSettings::from_config(&config));
    info!("Call controller ready");

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = console::run(controller.clone(), stdin, tokio::io::stdout()) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            let _ = controller.stop().await;
        }
    }

    info!("callme stopped");
    Ok(())
}

fn media_capture(media: &MediaConfig) -> Arc<dyn MediaCapture> {
    match media.backend {
        MediaBackend::Wav => {
            info!(inputs = media.inputs.len(), "Using WAV inputs");
            Arc::new(WavMediaCapture::new(media.inputs.clone()))
        }
        #[cfg(feature = "audio-cpal")]
        MediaBackend::Device => Arc::new(CpalMediaCapture::new()),
        #[cfg(not(feature = "audio-cpal"))]
        MediaBackend::Device => {
            warn!("Built without audio device support; using WAV inputs");
            Arc::new(WavMediaCapture::new(media.inputs.clone()))
        }
    }
}

#[cfg(feature = "audio-cpal")]
async fn open_playback(media: &MediaConfig) -> Option<CpalPlayback> {
    if media.backend != MediaBackend::Device {
        return None;
    }
    let device = Some(media.output_device.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    match CpalPlayback::open(device).await {
        Ok(playback) => Some(playback),
        Err(e) => {
            warn!("Audio output unavailable ({}); calls will be silent", e);
            None
        }
    }
}

fn load_ring_tone(path: &str, speaker: Option<mpsc::UnboundedSender<Vec<i16>>>) -> Arc<dyn RingTone> {
    let Some(speaker) = speaker else {
        return Arc::new(SilentRingTone);
    };

    let clip = if path.trim().is_empty() {
        ringback_clip()
    } else {
        match PcmClip::load(path) {
            Ok(clip) => {
                info!(path, seconds = clip.duration_secs(), "Ring tone loaded");
                clip
            }
            Err(e) => {
                warn!("Ring tone unavailable ({}); using the built-in ringback", e);
                ringback_clip()
            }
        }
    };
    Arc::new(WavRingTone::new(clip).with_output(speaker))
}
