//! Frame-at-a-time playback of a PCM clip

use crate::domain::audio::wav::PcmClip;
use std::sync::Arc;

/// Frame duration used by every media producer (20 ms)
pub const FRAME_MS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Fading,
    Finished,
}

/// Linear gain ramp towards silence
#[derive(Debug, Clone, Copy)]
struct Fade {
    frames_left: u32,
    step: f32,
}

/// Splits a clip into fixed-size frames, optionally looping, with a gain
/// ramp for fade-out
#[derive(Debug)]
pub struct AudioPlayer {
    samples: Arc<Vec<i16>>,
    samples_per_frame: usize,
    position: usize,
    looping: bool,
    gain: f32,
    fade: Option<Fade>,
    state: PlayerState,
}

impl AudioPlayer {
    pub fn new(clip: &PcmClip, looping: bool) -> Self {
        let samples_per_frame = (clip.sample_rate() * FRAME_MS / 1000).max(1) as usize;
        Self {
            samples: clip.shared_samples(),
            samples_per_frame,
            position: 0,
            looping,
            gain: 1.0,
            fade: None,
            state: if clip.is_empty() {
                PlayerState::Finished
            } else {
                PlayerState::Playing
            },
        }
    }

    /// Ramp the gain to zero over `frames` frames, then finish
    pub fn fade_out(&mut self, frames: u32) {
        if self.state == PlayerState::Finished {
            return;
        }
        if frames == 0 {
            self.state = PlayerState::Finished;
            return;
        }
        self.fade = Some(Fade {
            frames_left: frames,
            step: self.gain / frames as f32,
        });
        self.state = PlayerState::Fading;
    }

    pub fn stop(&mut self) {
        self.state = PlayerState::Finished;
    }

    /// Next frame of samples, `None` once playback has finished.
    ///
    /// The last frame of a non-looping clip is zero padded to full length.
    pub fn next_frame(&mut self) -> Option<Vec<i16>> {
        if self.state == PlayerState::Finished {
            return None;
        }

        if self.position >= self.samples.len() {
            if !self.looping {
                self.state = PlayerState::Finished;
                return None;
            }
            self.position = 0;
        }

        let end = (self.position + self.samples_per_frame).min(self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        frame.resize(self.samples_per_frame, 0);
        self.position = end;

        if let Some(fade) = self.fade.as_mut() {
            self.gain = (self.gain - fade.step).max(0.0);
            fade.frames_left -= 1;
            if fade.frames_left == 0 {
                self.state = PlayerState::Finished;
            }
        }

        if self.gain < 1.0 {
            for sample in frame.iter_mut() {
                *sample = (*sample as f32 * self.gain) as i16;
            }
        }

        Some(frame)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(len: usize) -> PcmClip {
        PcmClip::new(vec![1000; len], 8000)
    }

    #[test]
    fn test_frames_are_20ms() {
        let mut player = AudioPlayer::new(&clip(400), false);
        assert_eq!(player.samples_per_frame(), 160);

        assert_eq!(player.next_frame().unwrap().len(), 160);
        assert_eq!(player.next_frame().unwrap().len(), 160);
        // 80 real samples, padded
        let last = player.next_frame().unwrap();
        assert_eq!(last.len(), 160);
        assert_eq!(last[79], 1000);
        assert_eq!(last[80], 0);

        assert!(player.next_frame().is_none());
        assert_eq!(player.state(), PlayerState::Finished);
    }

    #[test]
    fn test_looping_never_finishes_on_its_own() {
        let mut player = AudioPlayer::new(&clip(160), true);
        for _ in 0..10 {
            assert!(player.next_frame().is_some());
        }
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn test_fade_ramps_down_then_finishes() {
        let mut player = AudioPlayer::new(&clip(160), true);
        player.fade_out(4);
        assert_eq!(player.state(), PlayerState::Fading);

        let levels: Vec<i16> = (0..4).map(|_| player.next_frame().unwrap()[0]).collect();
        assert_eq!(levels, vec![750, 500, 250, 0]);
        assert!(player.next_frame().is_none());
    }

    #[test]
    fn test_empty_clip_is_finished() {
        let mut player = AudioPlayer::new(&clip(0), true);
        assert!(player.next_frame().is_none());
    }
}
