//! Bilateral stimulation state machine.
//!
//! The engine owns the sweep: LED position and direction, side effects at
//! the extremes, the cycle counter, and the ease-out that settles the
//! stimulus at the midpoint. It performs no I/O — each [`step`] returns the
//! commands to issue and the interval until the next tick, and the host's
//! session driver applies them and re-arms its single-shot timer with that
//! freshly computed interval.
//!
//! [`step`]: StimulationEngine::step

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::protocol::Side;

// ============================================================================
// Modes and Effects
// ============================================================================

/// Engine mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Idle; device probing and configuration changes happen here
    Config,
    /// Actively sweeping (possibly suspended by pause)
    Action,
}

/// A side effect the host must apply after a step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Light the LED at this 1-based position (0 = all off)
    SetLed(u16),
    /// Fire the tactile buzzer on one side
    Buzz(Side),
    /// Play the audio tone on one side
    Tone(Side),
}

/// Result of one engine tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    /// Commands to apply, in order
    pub effects: Vec<Effect>,
    /// Interval until the next tick; `None` ends the timer chain
    pub next_interval: Option<Duration>,
}

// ============================================================================
// Parameters
// ============================================================================

/// Modality switches and sweep speed, as the engine needs them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StimulationParams {
    /// Sweep speed in full back-and-forth cycles per minute
    pub speed_cpm: f64,
    /// Drive the lightbar
    pub light_on: bool,
    /// Fire the buzzers at the extremes
    pub buzzer_on: bool,
    /// Play tones at the extremes
    pub tone_on: bool,
}

impl Default for StimulationParams {
    fn default() -> Self {
        Self {
            speed_cpm: 30.0,
            light_on: true,
            buzzer_on: false,
            tone_on: false,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The bilateral stimulation engine.
///
/// Owned by exactly one driver; all mutation goes through [`step`] and the
/// user-facing transition methods, and a stop or mode switch resets the
/// sweep state.
///
/// [`step`]: Self::step
#[derive(Clone, Debug)]
pub struct StimulationEngine {
    led_num: u16,
    params: StimulationParams,

    mode: Mode,
    led_pos: u16,
    direction: i8,
    decay: bool,
    counter: u32,
    max_counter: u32,
    pausing: bool,
    stopping: bool,
    /// Paused mid-session: still `Action`, but the timer chain has ended
    suspended: bool,

    /// Base per-step interval in seconds, derived from speed and LED count
    action_delay: f64,
    /// Ease-out surcharge in seconds, nonzero only while `decay` is set
    action_extra_delay: f64,

    // Ease-out curve constants, fixed by the LED count: the exponent makes
    // the final step's surcharge 1.2x the one before it, capped at 1.5 s.
    ease_alpha: f64,
    ease_factor: f64,
}

impl StimulationEngine {
    /// Create an engine for a lightbar of `led_num` LEDs.
    ///
    /// # Errors
    ///
    /// Returns an error when `led_num < 4` (the ease-out exponent needs a
    /// half-span of at least 2) or the speed is not positive.
    pub fn new(led_num: u16, params: StimulationParams) -> Result<Self, EngineError> {
        if led_num < 4 {
            return Err(EngineError::LedCountTooSmall { led_num });
        }
        if params.speed_cpm <= 0.0 {
            return Err(EngineError::InvalidSpeed {
                speed_cpm: params.speed_cpm,
            });
        }

        let n = f64::from(led_num / 2);
        let ease_alpha = 1.2f64.ln() / (n.ln() - (n - 1.0).ln());
        let ease_factor = 1.5 / n.powf(ease_alpha);

        let action_delay = Self::delay_for(params.speed_cpm, led_num);
        let midpoint = led_num / 2 + 1;

        Ok(Self {
            led_num,
            params,
            mode: Mode::Config,
            led_pos: midpoint,
            direction: -1,
            decay: false,
            counter: 0,
            max_counter: 0,
            pausing: false,
            stopping: false,
            suspended: false,
            action_delay,
            action_extra_delay: 0.0,
            ease_alpha,
            ease_factor,
        })
    }

    /// Base per-step interval: speed counts full back-and-forth cycles per
    /// minute, and one cycle crosses the bar twice.
    fn delay_for(speed_cpm: f64, led_num: u16) -> f64 {
        60.0 / speed_cpm / f64::from(led_num) / 2.0
    }

    fn midpoint(&self) -> u16 {
        self.led_num / 2 + 1
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Begin a session of `cycles` full back-and-forth sweeps (0 = a single
    /// sweep). Returns the first tick interval, or `None` when already
    /// running.
    pub fn start(&mut self, cycles: u32) -> Option<Duration> {
        if self.mode == Mode::Action {
            return None;
        }

        self.mode = Mode::Action;
        self.led_pos = self.midpoint();
        self.direction = -1;
        self.decay = false;
        self.counter = 0;
        self.max_counter = cycles;
        self.pausing = false;
        self.stopping = false;
        self.suspended = false;
        self.action_delay = Self::delay_for(self.params.speed_cpm, self.led_num);
        self.action_extra_delay = 0.0;

        Some(self.tick_interval())
    }

    /// Request a stop. While sweeping this completes the current sweep and
    /// eases out; while suspended (paused) it resets immediately.
    pub fn stop(&mut self) {
        match self.mode {
            Mode::Action if self.suspended => self.reset_to_config(),
            Mode::Action => self.stopping = true,
            Mode::Config => {
                // A deferred pause with no session behind it is discarded
                self.pausing = false;
            }
        }
    }

    /// Request a pause. While sweeping the engine eases out and suspends at
    /// the midpoint; in `Config` mode this defers the next start (see
    /// [`resume`]).
    ///
    /// [`resume`]: Self::resume
    pub fn pause(&mut self) {
        if !self.suspended {
            self.pausing = true;
        }
    }

    /// Undo a pause. Returns the interval to re-arm the timer with:
    /// - suspended mid-session → continue from the current position without
    ///   resetting the counter;
    /// - deferred pause in `Config` → a fresh start with the previous cycle
    ///   target;
    /// - otherwise clears the pending pause request (`None`, the running
    ///   chain continues on its own).
    pub fn resume(&mut self) -> Option<Duration> {
        if self.mode == Mode::Action && self.suspended {
            self.suspended = false;
            self.pausing = false;
            self.decay = false;
            self.action_extra_delay = 0.0;
            return Some(self.tick_interval());
        }

        if self.mode == Mode::Config && self.pausing {
            self.pausing = false;
            return self.start(self.max_counter);
        }

        // Pause undone while the chain is still running: cancel the ease-out
        // it started, unless a stop or the completed counter also wants it
        self.pausing = false;
        if self.decay && !self.stopping && self.counter < self.max_counter {
            self.decay = false;
            self.action_extra_delay = 0.0;
        }
        None
    }

    // ------------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------------

    /// Advance the sweep one LED.
    ///
    /// Called once per timer tick. Non-blocking and allocation-light; the
    /// cadence can be a few milliseconds at high LED counts and speeds.
    pub fn step(&mut self) -> StepOutcome {
        if self.mode != Mode::Action || self.suspended {
            return StepOutcome {
                effects: Vec::new(),
                next_interval: None,
            };
        }

        let mut effects = Vec::new();

        if self.params.light_on {
            effects.push(Effect::SetLed(self.led_pos));
        }

        if self.led_pos == 1 {
            self.extreme_effects(Side::Left, &mut effects);
            if self.direction < 0 {
                self.direction = 1;
            }
        }

        if self.led_pos == self.led_num {
            self.extreme_effects(Side::Right, &mut effects);
            if self.direction > 0 {
                self.direction = -1;
            }
            if self.counter >= self.max_counter || self.stopping || self.pausing {
                self.decay = true;
            }
        }

        if self.led_pos == self.midpoint() && self.direction < 0 {
            if self.decay {
                return self.finalize(effects);
            }
            self.counter += 1;
        }

        self.led_pos = (i32::from(self.led_pos) + i32::from(self.direction)) as u16;

        if self.decay {
            self.action_extra_delay = self.extra_delay();
        }

        StepOutcome {
            effects,
            next_interval: Some(self.tick_interval()),
        }
    }

    fn extreme_effects(&self, side: Side, effects: &mut Vec<Effect>) {
        if self.params.buzzer_on {
            effects.push(Effect::Buzz(side));
        }
        if self.params.tone_on {
            effects.push(Effect::Tone(side));
        }
    }

    /// The sweep has eased into the midpoint: either suspend (pause) or
    /// return to `Config` (stop / counter complete). The counter is not
    /// incremented for this final inward pass.
    fn finalize(&mut self, mut effects: Vec<Effect>) -> StepOutcome {
        if self.pausing && !self.stopping {
            self.suspended = true;
            self.decay = false;
            self.action_extra_delay = 0.0;
        } else {
            if self.params.light_on {
                effects.push(Effect::SetLed(0));
            }
            self.reset_to_config();
        }

        StepOutcome {
            effects,
            next_interval: None,
        }
    }

    fn reset_to_config(&mut self) {
        self.mode = Mode::Config;
        self.led_pos = self.midpoint();
        self.direction = -1;
        self.decay = false;
        self.counter = 0;
        self.pausing = false;
        self.stopping = false;
        self.suspended = false;
        self.action_extra_delay = 0.0;
    }

    /// Ease-out surcharge for the current position: a power law of the
    /// distance from the right extreme, approaching 1.5 s at the midpoint.
    fn extra_delay(&self) -> f64 {
        let distance = f64::from(self.led_num - self.led_pos);
        self.ease_factor * distance.powf(self.ease_alpha)
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.action_delay + self.action_extra_delay)
    }

    // ------------------------------------------------------------------------
    // Parameter updates (apply live)
    // ------------------------------------------------------------------------

    /// Change the sweep speed; takes effect on the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive speed.
    pub fn set_speed(&mut self, speed_cpm: f64) -> Result<(), EngineError> {
        if speed_cpm <= 0.0 {
            return Err(EngineError::InvalidSpeed { speed_cpm });
        }
        self.params.speed_cpm = speed_cpm;
        self.action_delay = Self::delay_for(speed_cpm, self.led_num);
        Ok(())
    }

    /// Enable or disable the lightbar sweep output.
    pub fn set_light_on(&mut self, on: bool) {
        self.params.light_on = on;
    }

    /// Enable or disable buzzer firing at the extremes.
    pub fn set_buzzer_on(&mut self, on: bool) {
        self.params.buzzer_on = on;
    }

    /// Enable or disable tone playback at the extremes.
    pub fn set_tone_on(&mut self, on: bool) {
        self.params.tone_on = on;
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Current 1-based LED position.
    #[must_use]
    pub fn led_pos(&self) -> u16 {
        self.led_pos
    }

    /// Completed full cycles this session.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Whether a pause is requested or in effect.
    #[must_use]
    pub fn paused(&self) -> bool {
        self.pausing || self.suspended
    }

    /// Whether the engine sits suspended at the midpoint awaiting resume.
    #[must_use]
    pub fn suspended(&self) -> bool {
        self.suspended
    }

    /// Base per-step interval in seconds.
    #[must_use]
    pub fn action_delay(&self) -> f64 {
        self.action_delay
    }

    /// Current ease-out surcharge in seconds.
    #[must_use]
    pub fn action_extra_delay(&self) -> f64 {
        self.action_extra_delay
    }

    /// Engine parameters.
    #[must_use]
    pub fn params(&self) -> &StimulationParams {
        &self.params
    }

    /// LED count of the configured bar.
    #[must_use]
    pub fn led_num(&self) -> u16 {
        self.led_num
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(led_num: u16) -> StimulationEngine {
        StimulationEngine::new(led_num, StimulationParams::default()).unwrap()
    }

    fn engine_all_modalities(led_num: u16) -> StimulationEngine {
        StimulationEngine::new(
            led_num,
            StimulationParams {
                buzzer_on: true,
                tone_on: true,
                ..StimulationParams::default()
            },
        )
        .unwrap()
    }

    /// Run until the chain ends or `limit` steps elapse; returns positions.
    fn run_to_completion(engine: &mut StimulationEngine, limit: usize) -> Vec<u16> {
        let mut positions = Vec::new();
        for _ in 0..limit {
            positions.push(engine.led_pos());
            let outcome = engine.step();
            if outcome.next_interval.is_none() {
                return positions;
            }
        }
        panic!("engine did not complete within {limit} steps");
    }

    #[test]
    fn rejects_tiny_bars_and_bad_speed() {
        assert!(matches!(
            StimulationEngine::new(3, StimulationParams::default()),
            Err(EngineError::LedCountTooSmall { led_num: 3 })
        ));
        assert!(StimulationEngine::new(4, StimulationParams::default()).is_ok());

        let params = StimulationParams {
            speed_cpm: 0.0,
            ..StimulationParams::default()
        };
        assert!(matches!(
            StimulationEngine::new(58, params),
            Err(EngineError::InvalidSpeed { .. })
        ));
    }

    #[test]
    fn base_delay_matches_speed_formula() {
        let mut e = engine(58);
        e.set_speed(30.0).unwrap();
        // 60 / 30 / 58 / 2
        assert!((e.action_delay() - 60.0 / 30.0 / 58.0 / 2.0).abs() < 1e-12);
    }

    #[test]
    fn sweep_stays_in_bounds_and_alternates_extremes() {
        for led_num in [7u16, 20, 58, 100] {
            let mut e = engine(led_num);
            e.start(3).unwrap();

            let mut extremes = Vec::new();
            for _ in 0..20_000 {
                let pos = e.led_pos();
                assert!(
                    (1..=led_num).contains(&pos),
                    "led {pos} out of range for {led_num}"
                );
                if pos == 1 {
                    extremes.push(Side::Left);
                }
                if pos == led_num {
                    extremes.push(Side::Right);
                }
                if e.step().next_interval.is_none() {
                    break;
                }
            }

            assert!(extremes.len() >= 2, "never reached the extremes");
            assert_eq!(extremes[0], Side::Left, "inward start visits left first");
            for pair in extremes.windows(2) {
                assert_ne!(pair[0], pair[1], "skipped an extreme for {led_num}");
            }
        }
    }

    #[test]
    fn start_zero_runs_a_single_sweep() {
        let mut e = engine(20);
        e.start(0).unwrap();
        let positions = run_to_completion(&mut e, 2000);

        assert_eq!(e.mode(), Mode::Config);
        assert_eq!(positions.iter().filter(|&&p| p == 1).count(), 1);
        assert_eq!(positions.iter().filter(|&&p| p == 20).count(), 1);
    }

    #[test]
    fn counter_target_counts_midpoint_passes_not_boundary_touches() {
        let led_num = 20u16;
        let midpoint = led_num / 2 + 1;
        let mut e = engine(led_num);
        e.start(3).unwrap();

        let mut inward_midpoint_passes = 0u32;
        let mut boundary_touches = 0u32;
        let mut previous = e.led_pos();
        loop {
            let outcome = e.step();
            let pos = e.led_pos();
            if pos == midpoint && previous == midpoint + 1 {
                inward_midpoint_passes += 1;
            }
            if pos == 1 || pos == led_num {
                boundary_touches += 1;
            }
            previous = pos;
            if outcome.next_interval.is_none() {
                break;
            }
        }

        assert_eq!(e.mode(), Mode::Config);
        assert_eq!(inward_midpoint_passes, 3);
        assert!(boundary_touches > 3, "ran past 3 boundary touches");
    }

    #[test]
    fn decay_surcharge_is_nonnegative_and_grows_into_the_stop() {
        for led_num in [20u16, 58, 100] {
            let mut e = engine(led_num);
            e.start(0).unwrap();

            let mut surcharges = Vec::new();
            for _ in 0..20_000 {
                let outcome = e.step();
                if e.action_extra_delay() > 0.0 {
                    surcharges.push(e.action_extra_delay());
                }
                if outcome.next_interval.is_none() {
                    break;
                }
            }

            assert!(
                surcharges.len() > 3,
                "no ease-out observed for {led_num} LEDs"
            );
            for pair in surcharges.windows(2) {
                assert!(pair[0] >= 0.0);
                assert!(
                    pair[1] > pair[0],
                    "surcharge not strictly growing for {led_num}: {pair:?}"
                );
            }
            // Final step approaches the 1.5 s cap
            let last = *surcharges.last().unwrap();
            assert!(last <= 1.5 + 1e-9);
            assert!(last > 1.0, "final surcharge {last} too small");
        }
    }

    #[test]
    fn decay_surcharge_follows_the_power_law() {
        let led_num = 58u16;
        let n = f64::from(led_num / 2);
        let alpha = 1.2f64.ln() / (n.ln() - (n - 1.0).ln());
        let factor = 1.5 / n.powf(alpha);

        let mut e = engine(led_num);
        e.start(0).unwrap();

        let mut observed = Vec::new();
        loop {
            let outcome = e.step();
            if e.action_extra_delay() > 0.0 {
                observed.push((e.led_pos(), e.action_extra_delay()));
            }
            if outcome.next_interval.is_none() {
                break;
            }
        }

        assert!(!observed.is_empty());
        for (pos, extra) in observed {
            let expected = factor * f64::from(led_num - pos).powf(alpha);
            assert!(
                (extra - expected).abs() < 1e-12,
                "pos {pos}: {extra} vs {expected}"
            );
        }

        // Anchor points of the curve: the final step before the midpoint
        // costs exactly 1.5 / 1.2 s, and the ratio across it is 1.2
        let last = factor * (n - 1.0).powf(alpha);
        assert!((last - 1.25).abs() < 1e-9);
        assert!((factor * n.powf(alpha) / last - 1.2).abs() < 1e-9);
    }

    #[test]
    fn effects_fire_once_per_extreme_visit() {
        let mut e = engine_all_modalities(10);
        e.start(2).unwrap();

        let mut left_buzzes = 0;
        let mut right_buzzes = 0;
        let mut left_tones = 0;
        loop {
            let outcome = e.step();
            for effect in &outcome.effects {
                match effect {
                    Effect::Buzz(Side::Left) => left_buzzes += 1,
                    Effect::Buzz(Side::Right) => right_buzzes += 1,
                    Effect::Tone(Side::Left) => left_tones += 1,
                    _ => {}
                }
            }
            if outcome.next_interval.is_none() {
                break;
            }
        }

        // max_counter = 2 completes two full back-and-forths: two visits
        // to each extreme, one effect per visit
        assert_eq!(left_buzzes, 2);
        assert_eq!(right_buzzes, 2);
        assert_eq!(left_tones, left_buzzes);
    }

    #[test]
    fn lights_follow_position_and_turn_off_at_the_end() {
        let mut e = engine(8);
        e.start(0).unwrap();

        let mut last_effects = Vec::new();
        loop {
            let outcome = e.step();
            for effect in &outcome.effects {
                if let Effect::SetLed(pos) = effect {
                    last_effects.push(*pos);
                }
            }
            if outcome.next_interval.is_none() {
                break;
            }
        }

        assert_eq!(*last_effects.last().unwrap(), 0, "bar not blanked");
    }

    #[test]
    fn disabled_light_emits_no_led_commands() {
        let mut e = StimulationEngine::new(
            10,
            StimulationParams {
                light_on: false,
                ..StimulationParams::default()
            },
        )
        .unwrap();
        e.start(0).unwrap();

        loop {
            let outcome = e.step();
            assert!(outcome
                .effects
                .iter()
                .all(|eff| !matches!(eff, Effect::SetLed(_))));
            if outcome.next_interval.is_none() {
                break;
            }
        }
    }

    #[test]
    fn pause_suspends_at_midpoint_and_resume_continues() {
        let mut e = engine(20);
        e.start(100).unwrap();

        // Let it sweep a bit, then pause
        for _ in 0..15 {
            e.step();
        }
        let counter_before = e.counter();
        e.pause();

        let mut steps = 0;
        loop {
            steps += 1;
            assert!(steps < 5000, "pause never suspended");
            if e.step().next_interval.is_none() {
                break;
            }
        }

        // Suspended, not reset: still Action, counter preserved
        assert_eq!(e.mode(), Mode::Action);
        assert!(e.suspended());
        assert_eq!(e.led_pos(), 11);
        assert_eq!(e.counter(), counter_before);

        // Stepping while suspended does nothing
        let idle = e.step();
        assert!(idle.effects.is_empty());
        assert!(idle.next_interval.is_none());

        let resumed = e.resume();
        assert!(resumed.is_some());
        assert!(!e.suspended());
        assert_eq!(e.mode(), Mode::Action);

        // The session keeps counting where it left off
        let outcome = e.step();
        assert!(outcome.next_interval.is_some());
    }

    #[test]
    fn resume_before_suspension_cancels_the_ease_out() {
        let mut e = engine(20);
        e.start(50).unwrap();
        for _ in 0..5 {
            e.step();
        }
        e.pause();

        // Step until the pause-driven decay is underway, then undo it
        while e.action_extra_delay() == 0.0 {
            assert!(e.step().next_interval.is_some(), "suspended too early");
        }
        assert!(e.resume().is_none(), "running chain needs no new timer");
        assert_eq!(e.action_extra_delay(), 0.0);

        // The session runs on normally instead of stopping at the midpoint
        let mut ticks = 0;
        while e.counter() < 3 {
            ticks += 1;
            assert!(ticks < 10_000);
            assert!(e.step().next_interval.is_some(), "session ended early");
        }
        assert_eq!(e.mode(), Mode::Action);
    }

    #[test]
    fn pause_before_start_defers_the_session() {
        let mut e = engine(20);
        e.pause();
        assert_eq!(e.mode(), Mode::Config);

        let interval = e.resume();
        assert!(interval.is_some(), "deferred start did not fire");
        assert_eq!(e.mode(), Mode::Action);
        assert_eq!(e.led_pos(), 11);
    }

    #[test]
    fn stop_eases_out_then_returns_to_config() {
        let mut e = engine(20);
        e.start(1000).unwrap();
        for _ in 0..7 {
            e.step();
        }
        e.stop();

        let mut saw_decay = false;
        loop {
            let outcome = e.step();
            if e.action_extra_delay() > 0.0 {
                saw_decay = true;
            }
            if outcome.next_interval.is_none() {
                break;
            }
        }

        assert!(saw_decay, "stop skipped the ease-out");
        assert_eq!(e.mode(), Mode::Config);
        assert_eq!(e.counter(), 0);
        assert_eq!(e.led_pos(), 11);
    }

    #[test]
    fn stop_while_suspended_resets_immediately() {
        let mut e = engine(20);
        e.start(100).unwrap();
        e.pause();
        while e.step().next_interval.is_some() {}
        assert!(e.suspended());

        e.stop();
        assert_eq!(e.mode(), Mode::Config);
        assert!(!e.suspended());
    }

    #[test]
    fn speed_change_applies_to_next_interval() {
        let mut e = engine(20);
        e.start(5).unwrap();
        let before = e.step().next_interval.unwrap();

        e.set_speed(60.0).unwrap();
        let after = e.step().next_interval.unwrap();
        assert!(after < before);
        assert!((after.as_secs_f64() - 60.0 / 60.0 / 20.0 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn start_while_running_is_ignored() {
        let mut e = engine(20);
        assert!(e.start(2).is_some());
        assert!(e.start(2).is_none());
    }
}
