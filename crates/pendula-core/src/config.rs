//! User-tunable session parameters.
//!
//! A flat, serializable tree mirroring the persisted blob's key layout:
//! `general.speed`, `lightbar.*`, `buzzer.*`, `headphone.*`. Persistence
//! itself lives in the host crate; this module only defines the data and
//! its defaults.

use serde::{Deserialize, Serialize};

use crate::engine::StimulationParams;

/// Sweep-wide settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Sweep speed in full back-and-forth cycles per minute
    pub speed: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { speed: 30.0 }
    }
}

/// Lightbar settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightbarConfig {
    /// Drive the lightbar during sessions
    pub on: bool,
    /// Sweep color as packed 24-bit RGB
    pub color: u32,
    /// Brightness percentage (0–100) applied to the color
    pub intensity: u8,
}

impl Default for LightbarConfig {
    fn default() -> Self {
        Self {
            on: true,
            color: 0x00_20_C0_20,
            intensity: 100,
        }
    }
}

/// Tactile buzzer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuzzerConfig {
    /// Fire the buzzers at the sweep extremes
    pub on: bool,
    /// Buzz length in milliseconds
    pub duration: u32,
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self {
            on: false,
            duration: 100,
        }
    }
}

/// Headphone tone settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadphoneConfig {
    /// Play tones at the sweep extremes
    pub on: bool,
    /// Tone frequency in Hz
    pub tone: f32,
    /// Playback volume (0.0–1.0)
    pub volume: f32,
}

impl Default for HeadphoneConfig {
    fn default() -> Self {
        Self {
            on: false,
            tone: 440.0,
            volume: 0.5,
        }
    }
}

/// The full persisted configuration tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sweep-wide settings
    pub general: GeneralConfig,
    /// Lightbar settings
    pub lightbar: LightbarConfig,
    /// Buzzer settings
    pub buzzer: BuzzerConfig,
    /// Headphone settings
    pub headphone: HeadphoneConfig,
}

impl SessionConfig {
    /// The subset the stimulation engine consumes.
    #[must_use]
    pub fn stimulation_params(&self) -> StimulationParams {
        StimulationParams {
            speed_cpm: self.general.speed,
            light_on: self.lightbar.on,
            buzzer_on: self.buzzer.on,
            tone_on: self.headphone.on,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
