//! System speaker output via cpal.

use crate::config::AudioConfig;
use crate::error::{ChikoError, Result};
use crate::playback::AudioSink;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Speaker-backed [`AudioSink`].
///
/// The output device is resolved on every play so the sink stays valid
/// across device changes (headphones unplugged mid-session and the like).
pub struct SpeakerSink {
    output_device: Option<String>,
}

impl SpeakerSink {
    /// Create a speaker sink, verifying that an output device exists.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let sink = Self {
            output_device: config.output_device.clone(),
        };
        let device = sink.resolve_device()?;
        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");
        Ok(sink)
    }

    fn resolve_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(ref name) = self.output_device {
            host.output_devices()
                .map_err(|e| ChikoError::Audio(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| ChikoError::Audio(format!("output device '{name}' not found")))
        } else {
            host.default_output_device()
                .ok_or_else(|| ChikoError::Audio("no default output device".into()))
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| ChikoError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioSink for SpeakerSink {
    fn play(&self, samples: &[f32], sample_rate: u32, cancel: &AtomicBool) -> Result<()> {
        let device = self.resolve_device()?;
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples: samples.to_vec(),
            position: 0,
            finished: false,
        }));
        let buffer_clone = Arc::clone(&buffer);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            )
            .map_err(|e| ChikoError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| ChikoError::Audio(format!("failed to start output stream: {e}")))?;

        // Wait for natural completion or a stop/barge-in.
        loop {
            std::thread::sleep(std::time::Duration::from_millis(10));
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let buf = buffer
                .lock()
                .map_err(|e| ChikoError::Audio(format!("playback buffer lock poisoned: {e}")))?;
            if buf.finished {
                break;
            }
        }

        drop(stream);
        Ok(())
    }
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}
