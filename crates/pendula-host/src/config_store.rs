//! Persistence for the user-tunable parameter tree.
//!
//! One JSON blob at a fixed relative path. Loading never fails outward:
//! a missing or corrupt file silently becomes the default configuration
//! (logged, since a corrupt file is worth noticing in the logs). Saving is
//! suppressed while a load is in progress — restoring values fires the same
//! update path the UI uses, and those must not write the file back onto
//! itself mid-read.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use pendula_core::config::SessionConfig;

/// Where the blob lives relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "pendula-config.json";

/// Errors the store logs internally; exposed for the few callers that
/// need to distinguish them (e.g. a settings dialog's "reset" banner).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem failure
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blob exists but does not parse
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Owner of the in-memory configuration and its file.
pub struct ConfigStore {
    path: PathBuf,
    config: SessionConfig,
    in_load: bool,
}

impl ConfigStore {
    /// Create a store over `path` with default values; call
    /// [`load`](Self::load) to pull the file in.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: SessionConfig::default(),
            in_load: false,
        }
    }

    /// Create a store and immediately load the file (or defaults).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        store.load();
        store
    }

    /// Replace the in-memory configuration from the file.
    ///
    /// Returns whether the file was applied; on any error the defaults are
    /// installed instead and the call still succeeds. While the load runs,
    /// [`save`](Self::save) is a no-op — bulk restore goes through the same
    /// update path interactive changes use.
    pub fn load(&mut self) -> bool {
        self.in_load = true;

        let applied = match Self::read_file(&self.path) {
            Ok(config) => {
                self.update(|c| *c = config);
                true
            }
            Err(e) => {
                debug!("config not loaded from {:?}, using defaults: {e}", self.path);
                self.update(|c| *c = SessionConfig::default());
                false
            }
        };

        self.in_load = false;
        applied
    }

    fn read_file(path: &Path) -> Result<SessionConfig, ConfigError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Apply a change and persist it.
    ///
    /// Returns whether a write happened (it does not during a load).
    pub fn update(&mut self, change: impl FnOnce(&mut SessionConfig)) -> bool {
        change(&mut self.config);
        self.save()
    }

    /// Write the current configuration to the file.
    ///
    /// Skipped entirely while a load is in progress. Write failures are
    /// logged and reported as `false`, never raised — a read-only config
    /// directory must not take the session down.
    pub fn save(&self) -> bool {
        if self.in_load {
            return false;
        }

        match self.write_file() {
            Ok(()) => true,
            Err(e) => {
                warn!("config not saved to {:?}: {e}", self.path);
                false
            }
        }
    }

    fn write_file(&self) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The file backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// Tests
// ============================================================================
