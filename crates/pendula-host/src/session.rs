//! Session driver: the self-re-arming timer chain around the engine.
//!
//! Each tick is a single-shot wait. The task sleeps until the deadline,
//! steps the engine, applies whatever effects came back, and re-arms with
//! the interval the engine just computed — so the ease-out's per-step
//! surcharge takes effect immediately instead of a period late. Deadlines
//! advance on a monotonic clock from the previous deadline, not from "now",
//! so handler latency does not accumulate as drift. When the engine yields
//! no next interval the chain simply ends; start/resume arm a new one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use pendula_core::config::SessionConfig;
use pendula_core::engine::{Effect, StimulationEngine};
use pendula_core::protocol::command;

use crate::audio::{TonePlayer, ToneRequest};
use crate::registry::SerialDeviceRegistry;

/// Drives a [`StimulationEngine`] against the real peripherals.
pub struct SessionDriver {
    engine: Arc<Mutex<StimulationEngine>>,
    registry: Arc<Mutex<SerialDeviceRegistry>>,
    tone: Arc<TonePlayer>,
    config: SessionConfig,
    task: Option<JoinHandle<()>>,
}

impl SessionDriver {
    /// Wire a driver to its collaborators.
    #[must_use]
    pub fn new(
        engine: Arc<Mutex<StimulationEngine>>,
        registry: Arc<Mutex<SerialDeviceRegistry>>,
        tone: Arc<TonePlayer>,
        config: SessionConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            tone,
            config,
            task: None,
        }
    }

    /// Push the configured color, intensity, and buzz duration out to the
    /// devices. Called before a session starts; absent devices are no-ops.
    pub fn apply_device_settings(&self) {
        let mut registry = lock_unpoisoned(&self.registry);
        let color = command::scale_color(self.config.lightbar.color, self.config.lightbar.intensity);
        if let Err(e) = registry.set_color(color) {
            debug!("lightbar color not applied: {e}");
        }
        registry.set_buzzer_duration(self.config.buzzer.duration);
    }

    /// Start a session of `cycles` full sweeps (0 = a single sweep) and arm
    /// the timer chain. Ignored when a session is already running.
    pub fn start(&mut self, cycles: u32) {
        self.apply_device_settings();
        let first = lock_unpoisoned(&self.engine).start(cycles);
        if let Some(interval) = first {
            self.arm(interval);
        }
    }

    /// Request a pause; the engine eases out and suspends at the midpoint.
    pub fn pause(&self) {
        lock_unpoisoned(&self.engine).pause();
    }

    /// Resume from a pause (or fire a deferred start), re-arming the chain.
    pub fn resume(&mut self) {
        let interval = lock_unpoisoned(&self.engine).resume();
        if let Some(interval) = interval {
            self.arm(interval);
        }
    }

    /// Request a stop; the running chain eases out and ends on its own.
    pub fn stop(&self) {
        lock_unpoisoned(&self.engine).stop();
    }

    /// Wait for the current timer chain to finish, if one is armed.
    pub async fn finished(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Shared engine handle, for observers.
    #[must_use]
    pub fn engine(&self) -> Arc<Mutex<StimulationEngine>> {
        Arc::clone(&self.engine)
    }

    fn arm(&mut self, first_interval: Duration) {
        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        let tone = Arc::clone(&self.tone);
        let tone_settings = (
            self.config.headphone.tone,
            self.config.headphone.volume,
            self.config.buzzer.duration,
        );

        self.task = Some(tokio::spawn(async move {
            let mut deadline = Instant::now() + first_interval;
            loop {
                tokio::time::sleep_until(deadline).await;

                let outcome = lock_unpoisoned(&engine).step();
                apply_effects(&outcome.effects, &registry, &tone, tone_settings);

                match outcome.next_interval {
                    Some(interval) => deadline += interval,
                    None => break,
                }
            }
        }));
    }
}

fn apply_effects(
    effects: &[Effect],
    registry: &Arc<Mutex<SerialDeviceRegistry>>,
    tone: &Arc<TonePlayer>,
    (tone_hz, volume, duration_ms): (f32, f32, u32),
) {
    if effects.is_empty() {
        return;
    }

    let mut registry = lock_unpoisoned(registry);
    for effect in effects {
        let result = match *effect {
            Effect::SetLed(position) => registry.set_led(i32::from(position)),
            Effect::Buzz(side) => registry.do_buzzer(side),
            Effect::Tone(side) => {
                tone.play(ToneRequest {
                    side,
                    freq_hz: tone_hz,
                    volume,
                    duration_ms,
                });
                Ok(())
            }
        };
        if let Err(e) = result {
            // The device disappeared; the sweep continues on what is left
            debug!("effect {effect:?} not applied: {e}");
        }
    }
}

/// Continue through a poisoned lock — a panicked holder cannot corrupt
/// these states beyond what the next reset clears.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pendula_core::engine::{Mode, StimulationParams};

    fn driver(led_num: u16, cycles_speed: f64) -> SessionDriver {
        let engine = StimulationEngine::new(
            led_num,
            StimulationParams {
                speed_cpm: cycles_speed,
                ..StimulationParams::default()
            },
        )
        .unwrap();

        SessionDriver::new(
            Arc::new(Mutex::new(engine)),
            Arc::new(Mutex::new(SerialDeviceRegistry::new())),
            Arc::new(TonePlayer::disabled()),
            SessionConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn single_sweep_runs_to_completion() {
        let mut driver = driver(10, 60.0);
        driver.start(0);

        driver.finished().await;

        let engine = driver.engine();
        let engine = engine.lock().unwrap();
        assert_eq!(engine.mode(), Mode::Config);
        assert_eq!(engine.counter(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_request_ends_the_chain() {
        let mut driver = driver(20, 30.0);
        driver.start(1_000_000);

        // Let a few ticks elapse, then ask for a stop
        tokio::time::sleep(Duration::from_millis(500)).await;
        driver.stop();

        driver.finished().await;
        assert_eq!(driver.engine().lock().unwrap().mode(), Mode::Config);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suspends_and_resume_completes() {
        let mut driver = driver(20, 30.0);
        driver.start(2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        driver.pause();
        driver.finished().await;

        {
            let engine = driver.engine();
            let engine = engine.lock().unwrap();
            assert_eq!(engine.mode(), Mode::Action);
            assert!(engine.suspended());
        }

        driver.resume();
        driver.finished().await;
        assert_eq!(driver.engine().lock().unwrap().mode(), Mode::Config);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_ignored() {
        let mut driver = driver(10, 60.0);
        driver.start(0);
        // A second start must not reset the running session
        driver.start(5);

        driver.finished().await;
        assert_eq!(driver.engine().lock().unwrap().mode(), Mode::Config);
    }
}
