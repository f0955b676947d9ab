//! Audio input capture for live onset detection

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BuildStreamError, DefaultStreamConfigError, Device, DevicesError, FromSample, PlayStreamError, SampleFormat,
    StreamConfig, SupportedStreamConfig,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

/// Interleaved samples converted per processor call; larger host buffers are split
pub const MAX_CALLBACK_SAMPLES: usize = 16384;

/// Device id that selects the host's default input
pub const DEFAULT_DEVICE: &str = "default";

#[derive(Debug, Error)]
pub enum AudioInputError {
    #[error("No audio input device available")]
    NoInputDevice,
    #[error("No input device named '{0}'")]
    UnknownDevice(String),
    #[error("Failed to enumerate input devices: {0}")]
    Devices(#[from] DevicesError),
    #[error("No usable input config on '{device}': {source}")]
    InputConfig {
        device: String,
        #[source]
        source: DefaultStreamConfigError,
    },
    #[error("Unsupported input sample format {0:?}")]
    UnsupportedFormat(SampleFormat),
    #[error("Failed to build input stream: {0}")]
    Build(#[from] BuildStreamError),
    #[error("Failed to start input stream: {0}")]
    Play(#[from] PlayStreamError),
}

/// What `--list-devices` reports for one capture device
#[derive(Debug, Clone, Serialize)]
pub struct InputDevice {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
    pub is_default: bool,
}

/// A device and its default input config, resolved but not yet streaming
pub struct OpenedInput {
    device: Device,
    config: SupportedStreamConfig,
    name: String,
}

impl OpenedInput {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }
}

/// Keeps a capture stream alive; dropping it ends the stream
pub struct InputStreamHandle {
    stream: cpal::Stream,
}

impl InputStreamHandle {
    /// Pause capture and release the stream
    pub fn stop(self) {
        if let Err(e) = self.stream.pause() {
            debug!(error = %e, "Input stream could not be paused before release");
        }
    }
}

/// Converts host sample buffers to f32 and hands them on in runs of whole frames
struct FrameConverter {
    chunk: usize,
    converted: Vec<f32>,
}

impl FrameConverter {
    fn new(channels: u16) -> Self {
        Self::with_limit(channels, MAX_CALLBACK_SAMPLES)
    }

    fn with_limit(channels: u16, limit: usize) -> Self {
        let channels = channels.max(1) as usize;
        // Whole frames only, so downmixing never splits a frame across calls
        let chunk = (limit / channels).max(1) * channels;
        Self {
            chunk,
            converted: Vec::with_capacity(chunk),
        }
    }

    fn feed<T, P>(&mut self, data: &[T], process: &mut P)
    where
        T: Copy,
        f32: FromSample<T>,
        P: FnMut(&[f32]),
    {
        for part in data.chunks(self.chunk) {
            self.converted.clear();
            self.converted.extend(part.iter().map(|s| f32::from_sample_(*s)));
            process(&self.converted);
        }
    }
}

pub struct AudioInputService;

impl AudioInputService {
    /// Every input device that reports a default config
    pub fn list_devices() -> Result<Vec<InputDevice>, AudioInputError> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices: Vec<InputDevice> = host
            .input_devices()?
            .filter_map(|device| {
                let name = device.name().ok()?;
                let config = device.default_input_config().ok()?;
                Some(InputDevice {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    sample_rate: config.sample_rate().0,
                    channels: config.channels(),
                    sample_format: format!("{:?}", config.sample_format()),
                    name,
                })
            })
            .collect();

        if devices.is_empty() {
            return Err(AudioInputError::NoInputDevice);
        }
        info!(count = devices.len(), "Found audio input devices");
        Ok(devices)
    }

    /// Resolve `device_id` (a device name, or [`DEFAULT_DEVICE`]) and its default input config
    pub fn open(device_id: &str) -> Result<OpenedInput, AudioInputError> {
        let host = cpal::default_host();
        let device = if device_id == DEFAULT_DEVICE {
            host.default_input_device().ok_or(AudioInputError::NoInputDevice)?
        } else {
            host.input_devices()?
                .find(|device| device.name().is_ok_and(|name| name == device_id))
                .ok_or_else(|| AudioInputError::UnknownDevice(device_id.to_string()))?
        };

        let name = device.name().unwrap_or_else(|_| device_id.to_string());
        let config = device
            .default_input_config()
            .map_err(|source| AudioInputError::InputConfig {
                device: name.clone(),
                source,
            })?;
        Ok(OpenedInput { device, config, name })
    }

    /// Start streaming, handing interleaved f32 samples to `process` on the audio thread
    pub fn start_stream<P>(input: OpenedInput, process: P) -> Result<InputStreamHandle, AudioInputError>
    where
        P: FnMut(&[f32]) + Send + 'static,
    {
        let sample_rate = input.sample_rate();
        let channels = input.channels();

        info!(
            device = %input.name,
            sample_rate,
            channels,
            format = ?input.config.sample_format(),
            "Starting audio input stream"
        );

        let stream_config: StreamConfig = input.config.clone().into();
        let device = &input.device;

        let stream = match input.config.sample_format() {
            SampleFormat::F32 => Self::build_stream::<f32, P>(device, &stream_config, process),
            SampleFormat::I16 => Self::build_stream::<i16, P>(device, &stream_config, process),
            SampleFormat::I32 => Self::build_stream::<i32, P>(device, &stream_config, process),
            SampleFormat::U16 => Self::build_stream::<u16, P>(device, &stream_config, process),
            format => return Err(AudioInputError::UnsupportedFormat(format)),
        }?;
        stream.play()?;

        Ok(InputStreamHandle { stream })
    }

    fn build_stream<T, P>(
        device: &Device,
        config: &StreamConfig,
        mut process: P,
    ) -> Result<cpal::Stream, AudioInputError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
        P: FnMut(&[f32]) + Send + 'static,
    {
        let mut converter = FrameConverter::new(config.channels);

        let stream = device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| converter.feed(data, &mut process),
            |err| error!(error = %err, "Input stream error"),
            None,
        )?;
        Ok(stream)
    }
}
