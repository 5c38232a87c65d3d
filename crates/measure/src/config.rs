//! Configuration for the measurement protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;

/// Timeouts bounding the protocol's internal round trips.
///
/// None of these bound the measured callable itself: a hung callable hangs
/// the measurement, and timeout policy belongs to whoever wraps `measure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureConfig {
    /// How long the executor waits for the observer's collected total before
    /// counting it as zero.
    #[serde(default = "default_observer_timeout")]
    pub observer_timeout_ms: u64,

    /// How long the executor waits for the coordinator to acknowledge its report.
    #[serde(default = "default_report_timeout")]
    pub report_timeout_ms: u64,

    /// How long an actor waits for a child to finish stopping.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasureConfig {
    /// Create a config with the default timeouts.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            observer_timeout_ms: 5_000,
            report_timeout_ms: 5_000,
            shutdown_timeout_ms: 5_000,
        }
    }

    /// Create a config for testing with shorter timeouts.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            observer_timeout_ms: 500,
            report_timeout_ms: 500,
            shutdown_timeout_ms: 500,
        }
    }

    /// Parse a TOML document, filling missing keys with defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid TOML or fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self, MeasureError> {
        let config: Self =
            toml::from_str(source).map_err(|e| MeasureError::config_parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if any timeout is zero.
    pub fn validate(&self) -> Result<(), MeasureError> {
        if self.observer_timeout_ms == 0 {
            return Err(MeasureError::invalid_config(
                "observer_timeout_ms must be greater than 0",
            ));
        }
        if self.report_timeout_ms == 0 {
            return Err(MeasureError::invalid_config(
                "report_timeout_ms must be greater than 0",
            ));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(MeasureError::invalid_config(
                "shutdown_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn observer_timeout(&self) -> Duration {
        Duration::from_millis(self.observer_timeout_ms)
    }

    #[must_use]
    pub const fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_observer_timeout() -> u64 {
    5_000
}

fn default_report_timeout() -> u64 {
    5_000
}

fn default_shutdown_timeout() -> u64 {
    5_000
}
