use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::MAX_TOKEN_DECIMALS;
use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// How often the renewal monitor scans for due subscriptions.
    pub poll_interval_secs: u64,
    /// Seconds before the end of a period when auto-renewal is attempted.
    pub renewal_window_secs: u64,
    /// Attempts when saving a new subscription document.
    pub save_retries: u32,
    pub retry_delay_ms: u64,
    /// Decimals of the payment token, used to convert whole-unit plan prices.
    pub token_decimals: u32,
    /// A renewal claim older than this is treated as abandoned and retaken.
    pub renewal_claim_lease_secs: u64,
    /// How long a subscription being created holds its (user, service) slot
    /// before another create may take it over.
    pub reservation_lease_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            renewal_window_secs: 30,
            save_retries: 3,
            retry_delay_ms: 1_000,
            token_decimals: 7,
            renewal_claim_lease_secs: 20,
            reservation_lease_secs: 120,
        }
    }
}

impl MirrorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| MirrorError::Config {
            message: format!("failed to parse TOML: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(MirrorError::Config {
                message: "poll_interval_secs must be greater than 0".into(),
            });
        }
        if self.save_retries == 0 {
            return Err(MirrorError::Config {
                message: "save_retries must be at least 1".into(),
            });
        }
        if self.token_decimals > MAX_TOKEN_DECIMALS {
            return Err(MirrorError::Config {
                message: format!(
                    "token_decimals {} is out of range (at most {MAX_TOKEN_DECIMALS})",
                    self.token_decimals
                ),
            });
        }
        if self.renewal_claim_lease_secs == 0 || self.reservation_lease_secs == 0 {
            return Err(MirrorError::Config {
                message: "lease durations must be greater than 0".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
