//! Host audio devices through `cpal`
//!
//! `cpal` streams are not `Send`, so every stream lives on its own thread and
//! is dropped there when the handle asks it to shut down. Capture is mixed to
//! mono, converted to 8 kHz and written to a PCMU track in 20 ms samples.
//! Playback takes 8 kHz mono frames and plays them on every output channel.

use crate::domain::audio::{FRAME_MS, TELEPHONY_RATE};
use crate::domain::call::value_object::InputDevice;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::infrastructure::media::capture::{pcmu_track, MediaCapture, MediaHandle, MediaStream};
use crate::infrastructure::media::g711::PcmuCodec;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Seconds of agent audio buffered ahead of the speaker
const PLAYBACK_BUFFER_SECS: usize = 2;

/// Capture adapter over the host's audio inputs
#[derive(Debug, Default)]
pub struct CpalMediaCapture;

impl CpalMediaCapture {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaCapture for CpalMediaCapture {
    async fn request_access(&self) -> Result<MediaHandle> {
        Ok(Box::new(CpalCaptureStream::open(None).await?))
    }

    async fn enumerate_inputs(&self) -> Result<Vec<InputDevice>> {
        tokio::task::spawn_blocking(list_inputs)
            .await
            .map_err(|e| CallError::Internal(format!("Device enumeration panicked: {}", e)))?
    }

    async fn open_device(&self, device_id: &str) -> Result<MediaHandle> {
        Ok(Box::new(CpalCaptureStream::open(Some(device_id.to_string())).await?))
    }
}

fn list_inputs() -> Result<Vec<InputDevice>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| CallError::PermissionDenied(format!("Cannot list audio inputs: {}", e)))?;

    let mut inputs: Vec<InputDevice> = Vec::new();
    for device in devices {
        match device.name() {
            Ok(name) if !inputs.iter().any(|d| d.id == name) => {
                inputs.push(InputDevice::new(name.clone(), name));
            }
            Ok(_) => {}
            Err(e) => debug!("Skipping unnamed input device: {}", e),
        }
    }
    debug!(count = inputs.len(), host = ?host.id(), "Enumerated audio inputs");
    Ok(inputs)
}

fn find_input(host: &cpal::Host, device_id: Option<&str>) -> Result<cpal::Device> {
    let Some(id) = device_id else {
        return host
            .default_input_device()
            .ok_or_else(|| CallError::PermissionDenied("No default audio input".to_string()));
    };
    host.input_devices()
        .map_err(|e| CallError::PermissionDenied(format!("Cannot list audio inputs: {}", e)))?
        .find(|device| device.name().map(|name| name == id).unwrap_or(false))
        .ok_or_else(|| CallError::ValidationError(format!("Unknown input device: {}", id)))
}

fn find_output(host: &cpal::Host, device_id: Option<&str>) -> Result<cpal::Device> {
    let Some(id) = device_id else {
        return host
            .default_output_device()
            .ok_or_else(|| CallError::Internal("No default audio output".to_string()));
    };
    host.output_devices()
        .map_err(|e| CallError::Internal(format!("Cannot list audio outputs: {}", e)))?
        .find(|device| device.name().map(|name| name == id).unwrap_or(false))
        .ok_or_else(|| CallError::ValidationError(format!("Unknown output device: {}", id)))
}

// ---- capture ----

struct CpalCaptureStream {
    device_id: String,
    track: Arc<TrackLocalStaticSample>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    pump: JoinHandle<()>,
}

impl CpalCaptureStream {
    async fn open(device_id: Option<String>) -> Result<Self> {
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("callme-capture".to_string())
            .spawn(move || run_capture(device_id, samples_tx, ready_tx, shutdown_rx))
            .map_err(|e| CallError::Internal(format!("Cannot start capture thread: {}", e)))?;

        let device_id = ready_rx
            .await
            .map_err(|_| CallError::PermissionDenied("Capture thread exited".to_string()))??;

        let track = pcmu_track();
        let pump = tokio::spawn(pump_capture(track.clone(), samples_rx));
        info!(device = %device_id, "Opened audio input");

        Ok(Self {
            device_id,
            track,
            shutdown: Mutex::new(Some(shutdown_tx)),
            pump,
        })
    }
}

fn run_capture(
    device_id: Option<String>,
    samples: mpsc::UnboundedSender<Vec<i16>>,
    ready: oneshot::Sender<Result<String>>,
    shutdown: oneshot::Receiver<()>,
) {
    let stream = match build_capture(device_id.as_deref(), samples) {
        Ok((name, stream)) => {
            let _ = ready.send(Ok(name));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = shutdown.blocking_recv();
    drop(stream);
}

fn build_capture(
    device_id: Option<&str>,
    samples: mpsc::UnboundedSender<Vec<i16>>,
) -> Result<(String, cpal::Stream)> {
    let host = cpal::default_host();
    let device = find_input(&host, device_id)?;
    let name = device
        .name()
        .unwrap_or_else(|_| device_id.unwrap_or("default").to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| CallError::PermissionDenied(format!("Input {} unavailable: {}", name, e)))?;
    let config = supported.config();
    debug!(
        device = %name,
        rate = config.sample_rate.0,
        channels = config.channels,
        format = ?supported.sample_format(),
        "Input stream config"
    );

    let stream = match supported.sample_format() {
        SampleFormat::I16 => input_stream::<i16>(&device, &config, samples, |s| s),
        SampleFormat::U16 => input_stream::<u16>(&device, &config, samples, u16_to_i16),
        SampleFormat::F32 => input_stream::<f32>(&device, &config, samples, f32_to_i16),
        other => {
            return Err(CallError::PermissionDenied(format!(
                "Unsupported input sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| CallError::PermissionDenied(format!("Cannot open input {}: {}", name, e)))?;

    stream
        .play()
        .map_err(|e| CallError::PermissionDenied(format!("Cannot start input {}: {}", name, e)))?;
    Ok((name, stream))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: mpsc::UnboundedSender<Vec<i16>>,
    convert: fn(T) -> i16,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + Send + 'static,
{
    let channels = config.channels as usize;
    let mut resampler = Resampler::new(config.sample_rate.0, TELEPHONY_RATE);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = downmix(data, channels, convert);
            let converted = resampler.process(&mono);
            if !converted.is_empty() {
                let _ = samples.send(converted);
            }
        },
        |e| warn!("Audio input stream error: {}", e),
        None,
    )
}

async fn pump_capture(
    track: Arc<TrackLocalStaticSample>,
    mut samples: mpsc::UnboundedReceiver<Vec<i16>>,
) {
    let frame_len = (TELEPHONY_RATE * FRAME_MS / 1000) as usize;
    let duration = Duration::from_millis(FRAME_MS as u64);
    let mut pending: Vec<i16> = Vec::with_capacity(frame_len * 4);

    while let Some(chunk) = samples.recv().await {
        pending.extend_from_slice(&chunk);
        while pending.len() >= frame_len {
            let frame: Vec<i16> = pending.drain(..frame_len).collect();
            let sample = Sample {
                data: PcmuCodec::encode(&frame),
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!("Dropping capture frame: {}", e);
            }
        }
    }
}

impl MediaStream for CpalCaptureStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn local_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        Some(self.track.clone())
    }

    fn stop(&self) {
        let shutdown = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
            self.pump.abort();
            debug!(device = %self.device_id, "Released audio input");
        }
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---- playback ----

/// Speaker output fed with 8 kHz mono frames
///
/// The ring tone and the agent's voice share one sink through [`sender`].
///
/// [`sender`]: CpalPlayback::sender
pub struct CpalPlayback {
    device_name: String,
    frames: mpsc::UnboundedSender<Vec<i16>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    feeder: JoinHandle<()>,
}

impl CpalPlayback {
    /// Open `device_id`, or the default output when `None`
    pub async fn open(device_id: Option<String>) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let stream_queue = queue.clone();
        std::thread::Builder::new()
            .name("callme-playback".to_string())
            .spawn(move || run_playback(device_id, stream_queue, ready_tx, shutdown_rx))
            .map_err(|e| CallError::Internal(format!("Cannot start playback thread: {}", e)))?;

        let (device_name, rate) = ready_rx
            .await
            .map_err(|_| CallError::Internal("Playback thread exited".to_string()))??;

        let (frames, frames_rx) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(feed_playback(frames_rx, queue, rate));
        info!(device = %device_name, rate, "Opened audio output");

        Ok(Self {
            device_name,
            frames,
            shutdown: Mutex::new(Some(shutdown_tx)),
            feeder,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Handle accepting 8 kHz mono frames
    pub fn sender(&self) -> mpsc::UnboundedSender<Vec<i16>> {
        self.frames.clone()
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.feeder.abort();
        let shutdown = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
    }
}

fn run_playback(
    device_id: Option<String>,
    queue: Arc<Mutex<VecDeque<i16>>>,
    ready: oneshot::Sender<Result<(String, u32)>>,
    shutdown: oneshot::Receiver<()>,
) {
    let stream = match build_playback(device_id.as_deref(), queue) {
        Ok((name, rate, stream)) => {
            let _ = ready.send(Ok((name, rate)));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = shutdown.blocking_recv();
    drop(stream);
}

fn build_playback(
    device_id: Option<&str>,
    queue: Arc<Mutex<VecDeque<i16>>>,
) -> Result<(String, u32, cpal::Stream)> {
    let host = cpal::default_host();
    let device = find_output(&host, device_id)?;
    let name = device
        .name()
        .unwrap_or_else(|_| device_id.unwrap_or("default").to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| CallError::Internal(format!("Output {} unavailable: {}", name, e)))?;
    let config = supported.config();
    let rate = config.sample_rate.0;

    let stream = match supported.sample_format() {
        SampleFormat::I16 => output_stream::<i16>(&device, &config, queue, |s| s),
        SampleFormat::U16 => output_stream::<u16>(&device, &config, queue, i16_to_u16),
        SampleFormat::F32 => output_stream::<f32>(&device, &config, queue, i16_to_f32),
        other => {
            return Err(CallError::Internal(format!(
                "Unsupported output sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| CallError::Internal(format!("Cannot open output {}: {}", name, e)))?;

    stream
        .play()
        .map_err(|e| CallError::Internal(format!("Cannot start output {}: {}", name, e)))?;
    Ok((name, rate, stream))
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<VecDeque<i16>>>,
    convert: fn(i16) -> T,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + Send + 'static,
{
    let channels = config.channels as usize;

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut queue = match queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            fill_output(&mut queue, data, channels, convert);
        },
        |e| warn!("Audio output stream error: {}", e),
        None,
    )
}

async fn feed_playback(
    mut frames: mpsc::UnboundedReceiver<Vec<i16>>,
    queue: Arc<Mutex<VecDeque<i16>>>,
    rate: u32,
) {
    let mut resampler = Resampler::new(TELEPHONY_RATE, rate);
    let capacity = rate as usize * PLAYBACK_BUFFER_SECS;

    while let Some(frame) = frames.recv().await {
        let converted = resampler.process(&frame);
        let mut queue = match queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        enqueue_capped(&mut queue, &converted, capacity);
    }
    debug!("Playback feed closed");
}

// ---- sample helpers ----

/// Streaming linear-interpolation rate converter
///
/// Keeps the last input sample so consecutive chunks join without a seam.
struct Resampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Next output position; 0 is the previous chunk's last sample
    position: f64,
    previous: i16,
}

impl Resampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate.max(1) as f64,
            position: 1.0,
            previous: 0,
        }
    }

    fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        let len = input.len() as f64;
        let mut output = Vec::with_capacity((len / self.step) as usize + 1);
        while self.position < len {
            let index = self.position as usize;
            let frac = self.position - index as f64;
            let a = match index {
                0 => self.previous,
                _ => input[index - 1],
            } as f64;
            let b = input[index] as f64;
            output.push((a + (b - a) * frac).round() as i16);
            self.position += self.step;
        }

        self.position -= len;
        self.previous = input[input.len() - 1];
        output
    }
}

/// Average interleaved frames down to one channel
fn downmix<T: Copy>(data: &[T], channels: usize, convert: fn(T) -> i16) -> Vec<i16> {
    if channels <= 1 {
        return data.iter().map(|&s| convert(s)).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| convert(s) as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Fill interleaved output from the queue; silence once it runs dry
fn fill_output<T: Copy>(
    queue: &mut VecDeque<i16>,
    data: &mut [T],
    channels: usize,
    convert: fn(i16) -> T,
) {
    for frame in data.chunks_mut(channels.max(1)) {
        let value = convert(queue.pop_front().unwrap_or(0));
        for out in frame.iter_mut() {
            *out = value;
        }
    }
}

/// Append, dropping the oldest samples beyond `capacity`
fn enqueue_capped(queue: &mut VecDeque<i16>, samples: &[i16], capacity: usize) {
    queue.extend(samples.iter().copied());
    let excess = queue.len().saturating_sub(capacity);
    if excess > 0 {
        queue.drain(..excess);
    }
}

fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32768) as i16
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn i16_to_u16(sample: i16) -> u16 {
    (sample as i32 + 32768) as u16
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
