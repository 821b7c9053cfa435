//! Local audio: mp3 decoding, speaker output and duration probing.

pub mod decode;
pub mod probe;

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use decode::decode_mp3;
pub use probe::{DurationProbe, FfmpegProbe, ProbeError};

/// Errors from decoding or playing audio.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("no audio output device available: {0}")]
    NoDevice(String),
    #[error("failed to open output device '{name}': {reason}")]
    OpenDevice { name: String, reason: String },
    #[error("failed to create audio sink: {0}")]
    Sink(String),
}

/// Something that can render an mp3 audibly.
///
/// `play` blocks the calling thread until the audio has finished or
/// `cancel` fires; callers run it on a blocking thread.
pub trait AudioOutput: Send + Sync {
    fn play(&self, mp3: &[u8], cancel: &CancellationToken) -> Result<(), AudioError>;
}

/// Speaker output through rodio on a named or default device.
#[derive(Debug, Clone)]
pub struct RodioOutput {
    device: Option<String>,
    volume: f32,
}

impl RodioOutput {
    pub fn new(device: Option<String>, volume: f32) -> Self {
        Self {
            device,
            volume: volume.clamp(0.0, 2.0),
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play(&self, mp3: &[u8], cancel: &CancellationToken) -> Result<(), AudioError> {
        let audio = decode_mp3(mp3)?;
        tracing::debug!(
            channels = audio.channels,
            sample_rate = audio.sample_rate,
            duration_secs = format!("{:.2}", audio.duration_secs()),
            "Decoded segment audio"
        );

        let (_stream, stream_handle) = open_output_stream(self.device.as_deref())?;
        let sink = Sink::try_new(&stream_handle).map_err(|e| AudioError::Sink(e.to_string()))?;
        sink.set_volume(self.volume);
        sink.append(rodio::buffer::SamplesBuffer::new(
            audio.channels,
            audio.sample_rate,
            audio.samples,
        ));

        while !sink.empty() {
            if cancel.is_cancelled() {
                info!("Playback cancelled");
                sink.stop();
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        sink.sleep_until_end();
        Ok(())
    }
}

/// Open the output stream for a named device, falling back to the default.
fn open_output_stream(
    device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), AudioError> {
    let Some(name) = device_name else {
        return OutputStream::try_default().map_err(|e| AudioError::NoDevice(e.to_string()));
    };

    let host = cpal::default_host();
    let device = host
        .output_devices()
        .map_err(|e| AudioError::NoDevice(format!("failed to enumerate output devices: {}", e)))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false));

    match device {
        Some(dev) => {
            info!(device = %name, "Using configured output device");
            OutputStream::try_from_device(&dev).map_err(|e| AudioError::OpenDevice {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }
        None => {
            warn!(device = %name, "Configured output device not found, falling back to default");
            OutputStream::try_default().map_err(|e| AudioError::NoDevice(e.to_string()))
        }
    }
}

/// Names of the host's output devices, for `--list-devices`.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Failed to enumerate output devices: {}", e);
            vec![]
        }
    }
}
