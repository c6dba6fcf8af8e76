//! Pendula core — hardware-free logic for the bilateral stimulation
//! controller.
//!
//! This crate holds everything that can run and be tested without a serial
//! port attached:
//!
//! - [`protocol`]: wire formats for the lightbar, buzzer, and sensor links
//! - [`framer`]: the self-synchronizing sensor packet decoder
//! - [`dsp`]: streaming IIR/FIR conditioning for the EOG and PPG channels
//! - [`bpm`]: adaptive-threshold heart-rate estimation
//! - [`engine`]: the sweep state machine with its ease-out timing
//! - [`config`]: the persisted parameter tree
//! - [`error`]: per-concern error enums
//!
//! The host crate (`pendula-host`) owns serial ports, threads, timers, and
//! audio; it drives these types and applies the effects they emit.
//!
//! # Example
//!
//! ```rust
//! use pendula_core::engine::{StimulationEngine, StimulationParams};
//!
//! let mut engine = StimulationEngine::new(58, StimulationParams::default()).unwrap();
//! let interval = engine.start(24).unwrap();
//! assert!(interval.as_secs_f64() > 0.0);
//!
//! // The host timer sleeps `interval`, then ticks:
//! let outcome = engine.step();
//! assert!(outcome.next_interval.is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bpm;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod framer;
pub mod protocol;

pub use bpm::{BpmConfig, HeartRateEstimator};
pub use config::SessionConfig;
pub use dsp::{Biquad, ButterworthFilter, EogFilter, FirFilter, PpgFilter};
pub use engine::{Effect, Mode, StepOutcome, StimulationEngine, StimulationParams};
pub use error::{EngineError, FilterError, ProtocolError};
pub use framer::{FramerStats, PacketFramer};
pub use protocol::{SensorPacket, Side};
