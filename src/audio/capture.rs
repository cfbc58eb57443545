//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.  Call
//! [`AudioCapture::start`] to begin streaming [`AudioChunk`]s over an mpsc
//! channel.  The returned [`StreamHandle`] is a RAII guard: dropping it
//! stops the underlying cpal stream.
//!
//! `cpal::Stream` is not `Send` on every platform, so streams are opened on
//! the thread that keeps them (see [`crate::audio::SpeakingMonitor`]).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::mpsc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One buffer of audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in `[-1.0, 1.0]`; use
/// [`crate::audio::downmix`] before analysis.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Interleaved channel count (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

/// RAII guard that keeps the cpal stream alive.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// SamplingError
// ---------------------------------------------------------------------------

/// Audio device unavailable or unusable.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to read device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to spawn sampling thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Names of every input device on the default host.
pub fn list_input_devices() -> Result<Vec<String>, SamplingError> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.input_devices()? {
        match device.name() {
            Ok(name) => names.push(name),
            Err(e) => log::debug!("audio: skipping unnamed input device: {e}"),
        }
    }
    Ok(names)
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Input device wrapper built on top of `cpal`.
///
/// ```rust,no_run
/// use std::sync::mpsc;
/// use reactive_avatar::audio::{AudioCapture, AudioChunk};
///
/// let (tx, rx) = mpsc::channel::<AudioChunk>();
/// let capture = AudioCapture::open(None).unwrap();
/// let _handle = capture.start(tx).unwrap();
/// // `_handle` keeps the stream alive; drop it to stop sampling.
/// ```
pub struct AudioCapture {
    device: cpal::Device,
    device_name: String,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open the named input device, or the system default when `name` is
    /// `None` or blank.
    pub fn open(name: Option<&str>) -> Result<Self, SamplingError> {
        let host = cpal::default_host();
        let device = match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => host.default_input_device().ok_or(SamplingError::NoDevice)?,
            Some(wanted) => {
                let mut found = None;
                for device in host.input_devices()? {
                    if device.name().map(|n| n == wanted).unwrap_or(false) {
                        found = Some(device);
                        break;
                    }
                }
                found.ok_or_else(|| SamplingError::DeviceNotFound(wanted.to_string()))?
            }
        };

        let device_name = device.name()?;
        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            device_name,
            config,
            sample_format,
            sample_rate,
            channels,
        })
    }

    /// Start sampling and send [`AudioChunk`]s to `tx`.
    ///
    /// Send errors (receiver dropped) are ignored so the audio callback never
    /// panics.
    pub fn start(&self, tx: mpsc::Sender<AudioChunk>) -> Result<StreamHandle, SamplingError> {
        let stream = match self.sample_format {
            cpal::SampleFormat::F32 => self.build::<f32>(tx)?,
            cpal::SampleFormat::I16 => self.build::<i16>(tx)?,
            cpal::SampleFormat::U16 => self.build::<u16>(tx)?,
            other => return Err(SamplingError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    fn build<T>(&self, tx: mpsc::Sender<AudioChunk>) -> Result<cpal::Stream, SamplingError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk = AudioChunk {
                    samples: data.iter().map(|&s| f32::from_sample(s)).collect(),
                    sample_rate,
                    channels,
                };
                let _ = tx.send(chunk);
            },
            |err: cpal::StreamError| {
                log::error!("audio: cpal stream error: {err}");
            },
            None,
        )?;
        Ok(stream)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
    }

    #[test]
    fn device_not_found_names_the_device() {
        let err = SamplingError::DeviceNotFound("USB Mic".into());
        assert_eq!(err.to_string(), "input device not found: USB Mic");
    }

    #[test]
    fn sampling_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SamplingError>();
    }
}
