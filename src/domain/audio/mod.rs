//! Audio domain - clip decoding and frame playback

pub mod player;
pub mod wav;

pub use player::{AudioPlayer, PlayerState, FRAME_MS};
pub use wav::{PcmClip, WavError, TELEPHONY_RATE};
