//! Protocol implementations: WebRTC negotiation and the realtime control channel

pub mod realtime;
pub mod webrtc;
