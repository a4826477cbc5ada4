//! WAV decoding into narrowband PCM clips

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Sample rate of everything the call media path produces
pub const TELEPHONY_RATE: u32 = 8000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    #[error("Failed to read WAV file: {0}")]
    Io(String),

    #[error("Invalid WAV data: {0}")]
    InvalidFormat(String),

    #[error("Unsupported WAV encoding: {0}")]
    Unsupported(String),
}

/// Header fields we care about from the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FmtChunk {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// Mono 16-bit PCM at a known rate
#[derive(Debug, Clone)]
pub struct PcmClip {
    samples: Arc<Vec<i16>>,
    sample_rate: u32,
}

impl PcmClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
        }
    }

    /// Load a WAV file and convert it to 8 kHz mono
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WavError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            WavError::Io(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self::decode(&bytes)?.resample(TELEPHONY_RATE))
    }

    /// Decode an in-memory RIFF/WAVE PCM file, mixing channels down to mono
    pub fn decode(bytes: &[u8]) -> Result<Self, WavError> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(WavError::InvalidFormat("missing RIFF/WAVE header".to_string()));
        }

        let mut fmt = None;
        let mut data: Option<&[u8]> = None;
        let mut offset = 12;

        while offset + 8 <= bytes.len() && (fmt.is_none() || data.is_none()) {
            let id = &bytes[offset..offset + 4];
            let size = u32::from_le_bytes([
                bytes[offset + 4],
                bytes[offset + 5],
                bytes[offset + 6],
                bytes[offset + 7],
            ]) as usize;
            let body_start = offset + 8;
            // Truncated data chunks are common in streamed recordings
            let body_end = (body_start + size).min(bytes.len());
            let body = &bytes[body_start..body_end];

            match id {
                b"fmt " => fmt = Some(parse_fmt(body)?),
                b"data" => data = Some(body),
                _ => {}
            }

            // Chunks are word aligned
            offset = body_start + size + (size % 2);
        }

        let fmt = fmt.ok_or_else(|| WavError::InvalidFormat("missing fmt chunk".to_string()))?;
        let data = data.ok_or_else(|| WavError::InvalidFormat("missing data chunk".to_string()))?;

        let interleaved = widen(data, fmt.bits_per_sample);
        let channels = fmt.channels as usize;
        let samples = interleaved
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect();

        Ok(Self::new(samples, fmt.sample_rate))
    }

    /// Linear-interpolation resample
    pub fn resample(&self, target_rate: u32) -> Self {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Self {
                samples: self.samples.clone(),
                sample_rate: target_rate,
            };
        }

        let ratio = self.sample_rate as f64 / target_rate as f64;
        let len = (self.samples.len() as f64 / ratio) as usize;
        let last = self.samples.len() - 1;

        let resampled = (0..len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = (pos as usize).min(last);
                let next = (idx + 1).min(last);
                let frac = pos - idx as f64;
                let a = self.samples[idx] as f64;
                let b = self.samples[next] as f64;
                (a + (b - a) * frac) as i16
            })
            .collect();

        Self::new(resampled, target_rate)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn shared_samples(&self) -> Arc<Vec<i16>> {
        self.samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn parse_fmt(body: &[u8]) -> Result<FmtChunk, WavError> {
    if body.len() < 16 {
        return Err(WavError::InvalidFormat("fmt chunk too small".to_string()));
    }

    let audio_format = u16::from_le_bytes([body[0], body[1]]);
    let channels = u16::from_le_bytes([body[2], body[3]]);
    let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);

    if audio_format != 1 {
        return Err(WavError::Unsupported(format!(
            "format tag {} (only PCM is supported)",
            audio_format
        )));
    }
    if channels == 0 || sample_rate == 0 {
        return Err(WavError::InvalidFormat(format!(
            "{} channels at {} Hz",
            channels, sample_rate
        )));
    }
    if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(WavError::Unsupported(format!(
            "{} bits per sample",
            bits_per_sample
        )));
    }

    Ok(FmtChunk {
        channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Convert raw little-endian PCM into signed 16-bit samples
fn widen(data: &[u8], bits_per_sample: u16) -> Vec<i16> {
    match bits_per_sample {
        // 8-bit WAV is unsigned
        8 => data.iter().map(|&b| ((b as i16) - 128) << 8).collect(),
        16 => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
        24 => data
            .chunks_exact(3)
            .map(|c| i16::from_le_bytes([c[1], c[2]]))
            .collect(),
        32 => data
            .chunks_exact(4)
            .map(|c| i16::from_le_bytes([c[2], c[3]]))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
pub(crate) fn encode_pcm16(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mono_pcm16() {
        let bytes = encode_pcm16(&[256, -1, i16::MIN, i16::MAX], 8000, 1);
        let clip = PcmClip::decode(&bytes).unwrap();

        assert_eq!(clip.sample_rate(), 8000);
        assert_eq!(clip.samples(), &[256, -1, i16::MIN, i16::MAX]);
    }

    #[test]
    fn test_decode_mixes_stereo_down() {
        let bytes = encode_pcm16(&[100, 200, 300, 400], 8000, 2);
        let clip = PcmClip::decode(&bytes).unwrap();

        assert_eq!(clip.samples(), &[150, 350]);
    }

    #[test]
    fn test_decode_skips_unknown_chunks() {
        let plain = encode_pcm16(&[1, 2, 3], 8000, 1);
        let mut bytes = plain[..12].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]); // odd body plus pad byte
        bytes.extend_from_slice(&plain[12..]);

        let clip = PcmClip::decode(&bytes).unwrap();
        assert_eq!(clip.samples(), &[1, 2, 3]);
    }

    #[test]
    fn test_rejects_non_wave_data() {
        assert!(matches!(
            PcmClip::decode(b"not a wav file at all"),
            Err(WavError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_resample_halves_length() {
        let clip = PcmClip::new(vec![0, 100, 200, 300], 16000);
        let down = clip.resample(8000);

        assert_eq!(down.sample_rate(), 8000);
        assert_eq!(down.samples(), &[0, 200]);
    }
}
