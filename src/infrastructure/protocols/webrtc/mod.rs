//! WebRTC peer session negotiation
pub mod negotiator;

pub use negotiator::{
    NegotiatedSession, PeerSession, SessionNegotiator, WebRtcNegotiator, WebRtcPeer,
    CONTROL_CHANNEL_LABEL,
};
