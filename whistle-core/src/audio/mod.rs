//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It only converts the device buffer into an `AudioChunk` and hands it to
//! an [`IngestHandle`], which pushes into a lock-free SPSC ring and never
//! blocks. All analysis happens on the pipeline worker.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` must be created and dropped on the same thread; the
//! engine does both on a dedicated capture thread.
//!
//! [`IngestHandle`]: crate::engine::IngestHandle

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    engine::IngestHandle,
    error::{Result, WhistleError},
};

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to the
    /// default input device and then the first available device.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        ingest: IngestHandle,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| WhistleError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(WhistleError::NoDefaultInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| WhistleError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, format = ?supported.sample_format(), "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let ch = channels as usize;

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut ingest = ingest;
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        push_chunk(&mut ingest, data, ch, sample_rate);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let mut ingest = ingest;
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|s| *s as f32 / 32_768.0));
                        push_chunk(&mut ingest, &scratch, ch, sample_rate);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U16 => {
                let mut ingest = ingest;
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _info| {
                        scratch.clear();
                        scratch.extend(data.iter().map(|s| (*s as f32 - 32_768.0) / 32_768.0));
                        push_chunk(&mut ingest, &scratch, ch, sample_rate);
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(WhistleError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| WhistleError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| WhistleError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
            channels,
        })
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _ingest: IngestHandle,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(WhistleError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(feature = "audio-cpal")]
fn push_chunk(ingest: &mut IngestHandle, data: &[f32], channels: usize, sample_rate: u32) {
    match ingest.ingest_interleaved(data, channels, sample_rate) {
        // Overflows are counted by the handle and reported by the worker;
        // nothing is logged per callback.
        Ok(()) | Err(WhistleError::SessionClosed) | Err(WhistleError::ChunkRingFull) => {}
        Err(e) => error!("ingest failed: {e}"),
    }
}
