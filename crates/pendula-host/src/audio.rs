//! Audio tone output for the headphone modality.
//!
//! The tone is synthesized host-side (the wire protocol has no audio
//! command): a square-wave buffer hard-panned to the requested side, scaled
//! by the configured volume. Playback goes through `rodio` when the `audio`
//! feature is enabled; otherwise requests are logged and dropped, so the
//! rest of the stack behaves identically either way.
//!
//! The output device lives on its own thread — audio streams do not move
//! between threads, while tone requests arrive from the session task.

use crossbeam_channel::Sender;
use tracing::trace;
#[cfg(feature = "audio")]
use tracing::warn;

use pendula_core::protocol::Side;

/// Sample rate of the synthesized buffers.
pub const TONE_SAMPLE_RATE: u32 = 44_100;

/// One tone request.
#[derive(Clone, Debug, PartialEq)]
pub struct ToneRequest {
    /// Which stereo channel carries the tone
    pub side: Side,
    /// Tone frequency in Hz
    pub freq_hz: f32,
    /// Volume (0.0–1.0)
    pub volume: f32,
    /// Tone length in milliseconds
    pub duration_ms: u32,
}

/// Synthesize an interleaved stereo square-wave buffer for a request.
///
/// The off side stays silent; headroom is left below full scale.
#[must_use]
pub fn synthesize_square(request: &ToneRequest, sample_rate: u32) -> Vec<i16> {
    let frames = (sample_rate as u64 * u64::from(request.duration_ms) / 1000) as usize;
    let amplitude = (request.volume.clamp(0.0, 1.0) * 0.8 * f32::from(i16::MAX)) as i16;
    let period = f64::from(sample_rate) / f64::from(request.freq_hz.max(1.0));

    let mut buffer = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let phase = (i as f64 / period).fract();
        let value = if phase < 0.5 { amplitude } else { -amplitude };
        let (left, right) = match request.side {
            Side::Left => (value, 0),
            Side::Right => (0, value),
        };
        buffer.push(left);
        buffer.push(right);
    }
    buffer
}

/// Fire-and-forget tone playback.
///
/// Cheap to share: requests are pushed to the audio thread (or dropped when
/// audio is unavailable) without blocking the caller.
pub struct TonePlayer {
    tx: Option<Sender<ToneRequest>>,
}

impl TonePlayer {
    /// Open the default output device.
    ///
    /// Failure to open a device is not an error — the player degrades to a
    /// silent no-op, matching how absent serial peripherals behave.
    #[must_use]
    #[cfg(feature = "audio")]
    pub fn new() -> Self {
        use rodio::buffer::SamplesBuffer;
        use rodio::{OutputStream, Source};

        let (tx, rx) = crossbeam_channel::unbounded::<ToneRequest>();

        let spawned = std::thread::Builder::new()
            .name("pendula-audio".into())
            .spawn(move || {
                let Ok((_stream, handle)) = OutputStream::try_default() else {
                    warn!("no audio output device; tones disabled");
                    return;
                };
                for request in rx {
                    let samples = synthesize_square(&request, TONE_SAMPLE_RATE);
                    let source = SamplesBuffer::new(2, TONE_SAMPLE_RATE, samples);
                    if let Err(e) = handle.play_raw(source.convert_samples()) {
                        trace!("tone playback failed: {e}");
                    }
                }
            });

        match spawned {
            Ok(_) => Self { tx: Some(tx) },
            Err(e) => {
                warn!("could not start audio thread: {e}");
                Self { tx: None }
            }
        }
    }

    /// Stub constructor when the `audio` feature is off.
    #[must_use]
    #[cfg(not(feature = "audio"))]
    pub fn new() -> Self {
        Self { tx: None }
    }

    /// A player that never produces sound, for tests and headless runs.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a tone. Never blocks; silently drops when audio is unavailable.
    pub fn play(&self, request: ToneRequest) {
        match &self.tx {
            Some(tx) => {
                let _ = tx.send(request);
            }
            None => trace!("tone dropped (audio disabled): {request:?}"),
        }
    }
}

impl Default for TonePlayer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
