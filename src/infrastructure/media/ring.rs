//! Ring signal player

use crate::domain::audio::{AudioPlayer, PcmClip, FRAME_MS, TELEPHONY_RATE};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Something that can ring
#[async_trait]
pub trait RingTone: Send + Sync {
    /// Start looping playback from the beginning
    async fn play(&self);

    /// Ramp down to silence over `duration`; resolves once silent
    async fn fade_out(&self, duration: Duration);

    /// Halt immediately; stopping a silent tone is harmless
    async fn stop(&self);
}

/// Plays the ring tone and owns the single ring timer of a call
pub struct RingSignalPlayer {
    tone: Arc<dyn RingTone>,
    fade: Duration,
    timer: Option<JoinHandle<()>>,
}

impl RingSignalPlayer {
    pub fn new(tone: Arc<dyn RingTone>, fade: Duration) -> Self {
        Self {
            tone,
            fade,
            timer: None,
        }
    }

    pub async fn play(&self) {
        self.tone.play().await;
    }

    /// Arm the ring timer: after `after`, fade the tone out, then call
    /// `on_elapsed` exactly once. Re-arming cancels the previous timer.
    pub fn schedule_timeout<F>(&mut self, after: Duration, on_elapsed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(previous) = self.timer.take() {
            if !previous.is_finished() {
                warn!("Replacing pending ring timer");
            }
            previous.abort();
        }

        let tone = self.tone.clone();
        let fade = self.fade;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tone.fade_out(fade).await;
            on_elapsed();
        }));
    }

    /// Halt the tone and cancel any pending timer
    pub async fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.tone.stop().await;
    }

    #[cfg(test)]
    fn has_pending_timer(&self) -> bool {
        self.timer
            .as_ref()
            .map(|timer| !timer.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RingSignalPlayer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Ring tone looped from a WAV clip
///
/// Frames go to `output` when one is attached; otherwise playback only
/// advances the clip.
pub struct WavRingTone {
    clip: PcmClip,
    output: Option<mpsc::UnboundedSender<Vec<i16>>>,
    player: Arc<Mutex<Option<AudioPlayer>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WavRingTone {
    pub fn new(clip: PcmClip) -> Self {
        Self {
            clip,
            output: None,
            player: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    pub fn with_output(mut self, output: mpsc::UnboundedSender<Vec<i16>>) -> Self {
        self.output = Some(output);
        self
    }

    #[cfg(test)]
    async fn is_playing(&self) -> bool {
        self.player
            .lock()
            .await
            .as_ref()
            .map(|p| p.state() != crate::domain::audio::PlayerState::Finished)
            .unwrap_or(false)
    }
}

#[async_trait]
impl RingTone for WavRingTone {
    async fn play(&self) {
        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            previous.abort();
        }
        *self.player.lock().await = Some(AudioPlayer::new(&self.clip, true));

        let player = self.player.clone();
        let output = self.output.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS as u64));
            loop {
                ticker.tick().await;
                let frame = player.lock().await.as_mut().and_then(|p| p.next_frame());
                let Some(frame) = frame else {
                    break;
                };
                if let Some(out) = output.as_ref() {
                    let _ = out.send(frame);
                }
            }
            debug!("Ring tone finished");
        }));
    }

    async fn fade_out(&self, duration: Duration) {
        let frames = (duration.as_millis() / FRAME_MS as u128) as u32;
        if let Some(player) = self.player.lock().await.as_mut() {
            player.fade_out(frames);
        }
        tokio::time::sleep(duration).await;
    }

    async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        if let Some(player) = self.player.lock().await.as_mut() {
            player.stop();
        }
    }
}

/// North American ringback cadence at 8 kHz: a 440 + 480 Hz burst for two
/// seconds, then four seconds of silence
pub fn ringback_clip() -> PcmClip {
    const ON_SECS: usize = 2;
    const OFF_SECS: usize = 4;
    const AMPLITUDE: f64 = 6000.0;

    let rate = TELEPHONY_RATE as usize;
    let mut samples: Vec<i16> = (0..rate * ON_SECS)
        .map(|n| {
            let t = n as f64 / rate as f64;
            let tone = (std::f64::consts::TAU * 440.0 * t).sin()
                + (std::f64::consts::TAU * 480.0 * t).sin();
            (tone * AMPLITUDE / 2.0) as i16
        })
        .collect();
    samples.resize(rate * (ON_SECS + OFF_SECS), 0);
    PcmClip::new(samples, TELEPHONY_RATE)
}

/// Ring tone for setups without an audio output
#[derive(Debug, Default)]
pub struct SilentRingTone;

#[async_trait]
impl RingTone for SilentRingTone {
    async fn play(&self) {
        debug!("Ringing (silent)");
    }

    async fn fade_out(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn stop(&self) {}
}
