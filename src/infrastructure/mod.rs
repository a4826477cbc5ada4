//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - HTTP clients for the token endpoint and the call-record store
//! - Media capture and ring tone adapters
//! - WebRTC negotiation and the realtime control channel

pub mod http;
pub mod media;
pub mod persistence;
pub mod protocols;
