//! Media adapters: capture, playback, ring tone and the PCMU codec

pub mod capture;
#[cfg(feature = "audio-cpal")]
pub mod device;
pub mod g711;
pub mod ring;

pub use capture::{pcmu_track, InputSource, MediaCapture, MediaHandle, MediaStream, WavMediaCapture};
pub use g711::PcmuCodec;
pub use ring::{ringback_clip, RingSignalPlayer, RingTone, SilentRingTone, WavRingTone};

#[cfg(feature = "audio-cpal")]
pub use device::{CpalMediaCapture, CpalPlayback};
