//! Audio playback unit for reply speech.
//!
//! Owns the single playable-audio slot for the session: starting a new
//! playback implicitly stops the previous one, and completion (or failure)
//! is reported back to the controller over a channel. Each playback is
//! tagged with a generation counter so a stopped playback can never emit a
//! stale `Ended` signal.
//!
//! Decoding goes through symphonia (mp3/wav); output goes through the
//! [`AudioSink`] trait so the controller can run against real speakers, a
//! silent sink, or a recording sink in tests.

use crate::error::{ChikoError, Result};
use crate::gateway::AudioSource;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Playback completion signals delivered to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Playback ran to natural completion.
    Ended,
    /// Playback could not be loaded or played.
    Failed(String),
}

/// Renders decoded samples to an output. `play` blocks until the samples
/// are exhausted or `cancel` is set.
pub trait AudioSink: Send + Sync + 'static {
    /// Play mono f32 samples at `sample_rate`, polling `cancel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be opened or driven.
    fn play(&self, samples: &[f32], sample_rate: u32, cancel: &AtomicBool) -> Result<()>;
}

/// Sink that discards audio immediately. Used when no output device is
/// available and as the voice-disabled stand-in for demos.
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, _samples: &[f32], _sample_rate: u32, _cancel: &AtomicBool) -> Result<()> {
        Ok(())
    }
}

/// The session's single audio playback slot.
pub struct PlaybackUnit {
    sink: Arc<dyn AudioSink>,
    client: reqwest::Client,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    generation: Arc<AtomicU64>,
    cancel: Option<Arc<AtomicBool>>,
}

impl PlaybackUnit {
    /// Create a playback unit that reports completion on `events`.
    ///
    /// `fetch_timeout` bounds remote audio fetches; a server that accepts
    /// the connection and then stalls must still produce a
    /// [`PlaybackEvent::Failed`] so the controller can return to idle.
    pub fn new(
        sink: Arc<dyn AudioSink>,
        events: mpsc::UnboundedSender<PlaybackEvent>,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        let client = match reqwest::Client::builder().timeout(fetch_timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("audio fetch client has no timeout: {e}");
                reqwest::Client::new()
            }
        };
        Self {
            sink,
            client,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            cancel: None,
        }
    }

    /// Start playing `source`, stopping any current playback first.
    ///
    /// Resolution and decoding happen on a background task; the eventual
    /// outcome arrives as a [`PlaybackEvent`] unless the playback is
    /// stopped or superseded before it finishes.
    pub fn play(&mut self, source: AudioSource) {
        self.stop();

        let generation = self.generation.load(Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Some(Arc::clone(&cancel));

        let sink = Arc::clone(&self.sink);
        let client = self.client.clone();
        let events = self.events.clone();
        let live_generation = Arc::clone(&self.generation);

        tokio::spawn(async move {
            let outcome = run_playback(source, client, sink, Arc::clone(&cancel)).await;

            // A stop or a newer play bumped the generation; whatever this
            // playback did is no longer the controller's business.
            if live_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let event = match outcome {
                Ok(()) if cancel.load(Ordering::SeqCst) => return,
                Ok(()) => PlaybackEvent::Ended,
                Err(e) => PlaybackEvent::Failed(e.to_string()),
            };
            let _ = events.send(event);
        });
    }

    /// Immediately halt any active playback and clear the slot.
    ///
    /// Safe to call with nothing playing. The stopped playback emits no
    /// completion event.
    pub fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
    }
}

/// Resolve, decode, and render one audio source.
async fn run_playback(
    source: AudioSource,
    client: reqwest::Client,
    sink: Arc<dyn AudioSink>,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let (bytes, mime) = match source {
        AudioSource::Inline { bytes, mime } => (bytes, Some(mime)),
        AudioSource::Url(url) => {
            debug!(%url, "fetching reply audio");
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| ChikoError::Audio(format!("audio fetch failed: {e}")))?;
            if !response.status().is_success() {
                return Err(ChikoError::Audio(format!(
                    "audio fetch returned {}",
                    response.status()
                )));
            }
            let mime = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ChikoError::Audio(format!("audio read failed: {e}")))?
                .to_vec();
            (bytes, mime)
        }
    };

    if cancel.load(Ordering::SeqCst) {
        return Ok(());
    }

    let render = tokio::task::spawn_blocking(move || {
        let (samples, sample_rate) = decode_to_mono_f32(bytes, mime.as_deref())?;
        if cancel.load(Ordering::SeqCst) {
            return Ok(());
        }
        sink.play(&samples, sample_rate, &cancel)
    });

    render
        .await
        .map_err(|e| ChikoError::Audio(format!("playback task failed: {e}")))?
}

/// Decode compressed audio bytes to mono f32 samples.
fn decode_to_mono_f32(bytes: Vec<u8>, mime: Option<&str>) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(mime) = mime {
        hint.mime_type(mime);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ChikoError::Audio(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ChikoError::Audio("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| ChikoError::Audio("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ChikoError::Audio(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ChikoError::Audio(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(e)) => {
                warn!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(ChikoError::Audio(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let frames = decoded.frames() as u64;

        let required = (frames as usize).saturating_mul(channels);
        let needs_new = match sample_buf.as_ref() {
            Some(b) => b.capacity() < required,
            None => true,
        };
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        // Mix interleaved frames down to mono.
        for frame in buf.samples().chunks_exact(channels) {
            out.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }

    if out.is_empty() {
        return Err(ChikoError::Audio("decoded no audio samples".into()));
    }
    Ok((out, sample_rate))
}

// ── Tests ───────────────────────────────────────────────────────────────
