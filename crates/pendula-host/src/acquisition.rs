//! Background sensor acquisition.
//!
//! A dedicated thread polls the sensor connection, runs each decoded packet
//! through the framer, the filter chains, and the heart-rate estimator, and
//! hands the results to the rest of the program over a bounded channel. The
//! UI side polls that channel on its own redraw cadence; nothing crosses
//! threads except through it.
//!
//! Shutdown is cooperative: [`AcquisitionHandle::stop`] clears the running
//! flag, then waits a bounded interval for the thread to finish rather than
//! blocking forever on a wedged serial driver.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use pendula_core::bpm::HeartRateEstimator;
use pendula_core::dsp::{EogFilter, PpgFilter};
use pendula_core::error::FilterError;
use pendula_core::framer::{FramerStats, PacketFramer};

// ============================================================================
// Errors
// ============================================================================

/// Errors starting an acquisition session.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The sample rate cannot support the filter designs
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The OS refused to spawn the reader thread
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning for the acquisition loop.
#[derive(Clone, Debug)]
pub struct AcquisitionConfig {
    /// Sensor sampling rate (Hz); sets up the filter chains
    pub sample_rate_hz: f64,
    /// Mains frequency for the EOG notch stage (50 or 60 Hz)
    pub mains_hz: f64,
    /// Bound of the sample channel; new samples drop when a consumer stalls
    pub channel_capacity: usize,
    /// Sleep between empty reads, keeps the stop flag responsive
    pub poll_interval: Duration,
    /// How long [`AcquisitionHandle::stop`] waits for the thread
    pub join_timeout: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250.0,
            mains_hz: 50.0,
            channel_capacity: 4096,
            poll_interval: Duration::from_millis(1),
            join_timeout: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// One fully processed sensor sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ProcessedSample {
    /// Packet id from the board
    pub packet_id: u32,
    /// Board timestamp in milliseconds
    pub timestamp_ms: u32,
    /// Originating device id
    pub device_id: u8,
    /// Raw EOG channel (ADC counts)
    pub eog_raw: f64,
    /// Conditioned EOG channel
    pub eog: f64,
    /// Raw PPG channel (ADC counts)
    pub ppg_raw: f64,
    /// Conditioned PPG channel
    pub ppg: f64,
    /// Current heart-rate estimate (0 until warmed up)
    pub bpm: f64,
}

// ============================================================================
// Handle
// ============================================================================

/// Control handle for a running acquisition thread.
pub struct AcquisitionHandle {
    rx: Receiver<ProcessedSample>,
    running: Arc<AtomicBool>,
    join_timeout: Duration,
    thread: Option<JoinHandle<FramerStats>>,
}

impl AcquisitionHandle {
    /// The processed-sample channel, for polling from a redraw timer.
    #[must_use]
    pub fn samples(&self) -> &Receiver<ProcessedSample> {
        &self.rx
    }

    /// Whether the reader thread is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread to stop and wait (bounded) for it to exit.
    ///
    /// Returns the framer statistics when the thread wound down in time,
    /// `None` when it had to be abandoned.
    pub fn stop(mut self) -> Option<FramerStats> {
        self.running.store(false, Ordering::Relaxed);

        let thread = self.thread.take()?;
        let deadline = Instant::now() + self.join_timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!("acquisition thread did not stop in time; detaching");
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }

        match thread.join() {
            Ok(stats) => {
                info!(
                    "acquisition stopped: {} packets, {} duplicates, {} resyncs",
                    stats.packets, stats.duplicates, stats.resyncs
                );
                Some(stats)
            }
            Err(_) => {
                warn!("acquisition thread panicked");
                None
            }
        }
    }
}

// ============================================================================
// Spawning
// ============================================================================

/// Start acquisition over any byte source — normally the cloned sensor
/// serial handle, but a file or replay buffer works the same way.
///
/// # Errors
///
/// Returns an error when the sample rate cannot support the filter designs
/// or the thread cannot be spawned.
pub fn start<R>(reader: R, cfg: AcquisitionConfig) -> Result<AcquisitionHandle, AcquisitionError>
where
    R: Read + Send + 'static,
{
    let eog = EogFilter::with_mains(cfg.sample_rate_hz, cfg.mains_hz)?;
    let ppg = PpgFilter::new(cfg.sample_rate_hz)?;
    let estimator = HeartRateEstimator::new(cfg.sample_rate_hz);

    let (tx, rx) = bounded(cfg.channel_capacity);
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let poll = cfg.poll_interval;

    let thread = thread::Builder::new()
        .name("pendula-acquisition".into())
        .spawn(move || read_loop(reader, eog, ppg, estimator, &tx, &flag, poll))?;

    Ok(AcquisitionHandle {
        rx,
        running,
        join_timeout: cfg.join_timeout,
        thread: Some(thread),
    })
}

fn read_loop<R: Read>(
    mut reader: R,
    mut eog: EogFilter,
    mut ppg: PpgFilter,
    mut estimator: HeartRateEstimator,
    tx: &Sender<ProcessedSample>,
    running: &AtomicBool,
    poll: Duration,
) -> FramerStats {
    let mut framer = PacketFramer::new();
    let mut buf = [0u8; 256];
    let mut overflow_drops: u64 = 0;

    while running.load(Ordering::Relaxed) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                thread::sleep(poll);
                continue;
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                thread::sleep(poll);
                continue;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Sensor unplugged mid-session: the stimulation side keeps
                // going, this loop just winds down.
                warn!("sensor read failed, stopping acquisition: {e}");
                break;
            }
        };

        for packet in framer.push(&buf[..n]) {
            let eog_raw = f64::from(packet.channel_a);
            let ppg_raw = f64::from(packet.channel_b);
            let eog_filtered = eog.filter(eog_raw);
            let ppg_filtered = ppg.filter(ppg_raw);
            let bpm = estimator.update(ppg_filtered);

            let sample = ProcessedSample {
                packet_id: packet.packet_id,
                timestamp_ms: packet.timestamp_ms,
                device_id: packet.device_id,
                eog_raw,
                eog: eog_filtered,
                ppg_raw,
                ppg: ppg_filtered,
                bpm,
            };

            if tx.try_send(sample).is_err() {
                // Consumer stalled; drop on the floor rather than block the
                // serial reads
                overflow_drops += 1;
                if overflow_drops.is_power_of_two() {
                    debug!("sample channel full; dropped {overflow_drops} so far");
                }
            }
        }
    }

    framer.stats()
}

// ============================================================================
// Tests
// ============================================================================
