//! WebRTC session negotiation against the realtime signaling endpoint
//!
//! One offer/answer round trip: build a peer connection with the caller's
//! outbound audio track and the control data channel, POST the offer with the
//! session credential, apply the answer. No retries.

use crate::domain::call::credential::SessionCredential;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::infrastructure::media::g711::{PcmuCodec, PCMU_PAYLOAD_TYPE};
use crate::infrastructure::protocols::realtime::channel::{
    ChannelSignal, ControlLink, ControlTransport,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Label of the agent's control data channel
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// A negotiated peer session, held by the call for teardown
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Close the session; closing twice is harmless
    async fn close(&self);
}

/// Result of a successful negotiation
pub struct NegotiatedSession {
    pub peer: Box<dyn PeerSession>,
    pub control: ControlLink,
}

impl std::fmt::Debug for NegotiatedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedSession").finish_non_exhaustive()
    }
}

/// Establishes the media session with the remote agent
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    async fn negotiate(
        &self,
        credential: &SessionCredential,
        local_track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<NegotiatedSession>;
}

/// `webrtc`-crate negotiator
pub struct WebRtcNegotiator {
    http: reqwest::Client,
    signaling_url: String,
    model: String,
    ice_servers: Vec<String>,
    /// Decoded inbound agent audio; drained and discarded when absent
    playback: Option<mpsc::UnboundedSender<Vec<i16>>>,
}

impl WebRtcNegotiator {
    pub fn new(
        http: reqwest::Client,
        signaling_url: impl Into<String>,
        model: impl Into<String>,
        ice_servers: Vec<String>,
    ) -> Self {
        Self {
            http,
            signaling_url: signaling_url.into(),
            model: model.into(),
            ice_servers,
            playback: None,
        }
    }

    pub fn with_playback(mut self, sink: mpsc::UnboundedSender<Vec<i16>>) -> Self {
        self.playback = Some(sink);
        self
    }

    /// Signaling URL with the model selected
    pub fn offer_url(&self) -> String {
        let separator = if self.signaling_url.contains('?') { '&' } else { '?' };
        format!("{}{}model={}", self.signaling_url, separator, self.model)
    }

    fn build_api() -> Result<API> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(pcmu_codec(), RTPCodecType::Audio)
            .map_err(negotiation)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(negotiation)?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    async fn offer_answer(
        &self,
        pc: &Arc<RTCPeerConnection>,
        credential: &SessionCredential,
        local_track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<ControlLink> {
        match local_track {
            Some(track) => {
                pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(negotiation)?;
            }
            None => {
                // Still offer an audio m-line so the agent can talk
                pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
                    .await
                    .map_err(negotiation)?;
            }
        }

        let playback = self.playback.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let playback = playback.clone();
            Box::pin(async move {
                debug!(kind = %track.kind(), "Remote track started");
                drain_remote_track(track, playback).await;
            })
        }));

        let control = open_control_channel(pc).await?;

        let offer = pc.create_offer(None).await.map_err(negotiation)?;
        let mut gathering_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.map_err(negotiation)?;
        let _ = gathering_complete.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| CallError::Negotiation("No local description".to_string()))?;

        let answer_sdp = self.exchange_sdp(&credential.value, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp).map_err(negotiation)?;
        pc.set_remote_description(answer).await.map_err(negotiation)?;

        Ok(control)
    }

    async fn exchange_sdp(&self, bearer: &str, offer_sdp: &str) -> Result<String> {
        let response = self
            .http
            .post(self.offer_url())
            .header("Authorization", format!("Bearer {}", bearer))
            .header("Content-Type", "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| CallError::Negotiation(format!("SDP exchange request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Negotiation(format!(
                "SDP exchange failed with status {}: {}",
                status, body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to read SDP answer: {}", e)))
    }
}

#[async_trait]
impl SessionNegotiator for WebRtcNegotiator {
    async fn negotiate(
        &self,
        credential: &SessionCredential,
        local_track: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<NegotiatedSession> {
        let api = Self::build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(self.rtc_config())
                .await
                .map_err(negotiation)?,
        );

        match self.offer_answer(&pc, credential, local_track).await {
            Ok(control) => {
                info!("Peer session negotiated");
                Ok(NegotiatedSession {
                    peer: Box::new(WebRtcPeer::new(pc)),
                    control,
                })
            }
            Err(e) => {
                if let Err(close_err) = pc.close().await {
                    debug!("Failed to close abandoned peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }
}

/// The only audio codec offered; both directions are G.711 µ-law
fn pcmu_codec() -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_owned(),
            clock_rate: 8000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        payload_type: PCMU_PAYLOAD_TYPE,
        ..Default::default()
    }
}

async fn open_control_channel(pc: &Arc<RTCPeerConnection>) -> Result<ControlLink> {
    let dc = pc
        .create_data_channel(CONTROL_CHANNEL_LABEL, None)
        .await
        .map_err(negotiation)?;

    let (signals_tx, signals_rx) = mpsc::unbounded_channel();

    let tx = signals_tx.clone();
    dc.on_open(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelSignal::Open);
        })
    }));

    let tx = signals_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(ChannelSignal::Message(text));
                }
                Err(_) => warn!("Dropping non-UTF-8 control message"),
            }
        })
    }));

    let tx = signals_tx;
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelSignal::Closed);
        })
    }));

    Ok(ControlLink::new(
        Arc::new(DataChannelTransport { dc }),
        signals_rx,
    ))
}

async fn drain_remote_track(
    track: Arc<TrackRemote>,
    playback: Option<mpsc::UnboundedSender<Vec<i16>>>,
) {
    let mut foreign = ForeignPayloads::default();
    while let Ok((packet, _)) = track.read_rtp().await {
        let Some(sink) = playback.as_ref() else {
            continue;
        };
        if foreign.skip(packet.header.payload_type) || packet.payload.is_empty() {
            continue;
        }
        if sink.send(PcmuCodec::decode(&packet.payload)).is_err() {
            break;
        }
    }
    debug!(dropped = foreign.dropped, "Remote track ended");
}

/// Counts inbound packets that are not PCMU; warns on the first one
#[derive(Debug, Default)]
struct ForeignPayloads {
    dropped: u64,
}

impl ForeignPayloads {
    fn skip(&mut self, payload_type: u8) -> bool {
        if payload_type == PCMU_PAYLOAD_TYPE {
            return false;
        }
        if self.dropped == 0 {
            warn!(payload_type, "Dropping remote audio with an undecodable payload type");
        }
        self.dropped += 1;
        true
    }
}

fn negotiation(err: webrtc::Error) -> CallError {
    CallError::Negotiation(err.to_string())
}

/// Data channel carrying the agent's JSON events
struct DataChannelTransport {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl ControlTransport for DataChannelTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| CallError::Channel(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            debug!("Data channel close: {}", e);
        }
    }
}

/// Peer connection handle
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl WebRtcPeer {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            pc,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_url_selects_model() {
        let negotiator = WebRtcNegotiator::new(
            reqwest::Client::new(),
            "https://api.openai.com/v1/realtime",
            "gpt-4o-realtime-preview-2024-12-17",
            vec![],
        );
        assert_eq!(
            negotiator.offer_url(),
            "https://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
        );

        let proxied = WebRtcNegotiator::new(
            reqwest::Client::new(),
            "http://localhost:3000/api/rtc?region=eu",
            "m",
            vec![],
        );
        assert_eq!(proxied.offer_url(), "http://localhost:3000/api/rtc?region=eu&model=m");
    }

    #[test]
    fn test_only_pcmu_is_offered() {
        let codec = pcmu_codec();
        assert_eq!(codec.capability.mime_type, MIME_TYPE_PCMU);
        assert_eq!(codec.capability.clock_rate, 8000);
        assert_eq!(codec.payload_type, PCMU_PAYLOAD_TYPE);
        assert!(WebRtcNegotiator::build_api().is_ok());
    }

    #[test]
    fn test_foreign_payloads_are_counted_not_decoded() {
        let mut foreign = ForeignPayloads::default();
        assert!(!foreign.skip(PCMU_PAYLOAD_TYPE));
        assert!(foreign.skip(111));
        assert!(foreign.skip(111));
        assert!(!foreign.skip(PCMU_PAYLOAD_TYPE));
        assert_eq!(foreign.dropped, 2);
    }

    #[test]
    fn test_ice_servers_are_grouped() {
        let negotiator = WebRtcNegotiator::new(
            reqwest::Client::new(),
            "https://example.test/rtc",
            "m",
            vec!["stun:stun.l.google.com:19302".to_string()],
        );
        let config = negotiator.rtc_config();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls[0], "stun:stun.l.google.com:19302");

        let without = WebRtcNegotiator::new(reqwest::Client::new(), "x", "m", vec![]);
        assert!(without.rtc_config().ice_servers.is_empty());
    }
}
