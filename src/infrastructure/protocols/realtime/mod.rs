//! Realtime agent control channel: wire events and routing

pub mod channel;
pub mod events;

pub use channel::{ChannelSignal, ControlChannelRouter, ControlLink, ControlTransport};
pub use events::{
    ClientEvent, FunctionCall, OutboundEvent, ResponseOptions, ServerEvent, SessionConfig,
    TranscriptionConfig,
};
