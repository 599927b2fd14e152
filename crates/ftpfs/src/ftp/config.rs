//! Configuration for the pool, the validator and the stat cache.
//!
//! Every key is optional; a missing key takes its default. Keys are
//! camelCase so the record can live in the host's JSON settings file.

use crate::ftp::error::{FtpError, FtpResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Ceiling for every `*Sec` key: ten years.
pub const MAX_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpFsConfig {
    /// Maximum number of pooled sessions (idle + in use + connecting).
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Idle sessions older than this are closed by the sweep.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_sec: u64,
    /// A session validated more recently than this is reused without NOOP.
    #[serde(default = "default_validation_ttl")]
    pub validation_ttl_sec: u64,
    /// Upper bound on one NOOP probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_sec: u64,
    /// Maximum number of cached directory listings.
    #[serde(default = "default_max_stat_entries")]
    pub max_stat_entries: usize,
    /// Names-only listings.
    #[serde(default)]
    pub fast_mode: bool,
    /// Period of the background idle sweep.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_sec: u64,
    /// TCP connect timeout for new sessions.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// Timeout for control replies and data-channel reads.
    #[serde(default = "default_data_timeout")]
    pub data_timeout_sec: u64,
    /// Accept self-signed / untrusted certificates on FTPS.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_max_pool_size() -> usize {
    10
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_validation_ttl() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    10
}
fn default_max_stat_entries() -> usize {
    20_000
}
fn default_maintenance_interval() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_data_timeout() -> u64 {
    30
}

impl Default for FtpFsConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            idle_timeout_sec: default_idle_timeout(),
            validation_ttl_sec: default_validation_ttl(),
            probe_timeout_sec: default_probe_timeout(),
            max_stat_entries: default_max_stat_entries(),
            fast_mode: false,
            maintenance_interval_sec: default_maintenance_interval(),
            connect_timeout_sec: default_connect_timeout(),
            data_timeout_sec: default_data_timeout(),
            accept_invalid_certs: false,
        }
    }
}

impl FtpFsConfig {
    /// Parse and validate a JSON settings record.
    pub fn from_json_str(json: &str) -> FtpResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FtpError::invalid_config(format!("Invalid FTP settings: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> FtpResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("FTP settings {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(FtpError::invalid_config(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.max_pool_size == 0 {
            return Err(FtpError::invalid_config("maxPoolSize must be at least 1"));
        }
        if self.max_stat_entries == 0 {
            return Err(FtpError::invalid_config("maxStatEntries must be at least 1"));
        }
        if self.maintenance_interval_sec == 0 {
            return Err(FtpError::invalid_config(
                "maintenanceIntervalSec must be at least 1",
            ));
        }
        for (key, value) in [
            ("idleTimeoutSec", self.idle_timeout_sec),
            ("validationTtlSec", self.validation_ttl_sec),
            ("probeTimeoutSec", self.probe_timeout_sec),
            ("maintenanceIntervalSec", self.maintenance_interval_sec),
            ("connectTimeoutSec", self.connect_timeout_sec),
            ("dataTimeoutSec", self.data_timeout_sec),
        ] {
            if value > MAX_SECONDS {
                return Err(FtpError::invalid_config(format!(
                    "{} must be at most {} (got {})",
                    key, MAX_SECONDS, value
                )));
            }
        }
        Ok(())
    }

    // The accessors clamp to MAX_SECONDS so an unvalidated record still
    // cannot overflow chrono or tokio arithmetic.

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.idle_timeout_sec) as i64)
    }

    pub fn validation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.validation_ttl_sec) as i64)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(clamp_secs(self.probe_timeout_sec))
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(clamp_secs(self.maintenance_interval_sec).max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(clamp_secs(self.connect_timeout_sec))
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(clamp_secs(self.data_timeout_sec))
    }
}

fn clamp_secs(value: u64) -> u64 {
    value.min(MAX_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = FtpFsConfig::default();
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.idle_timeout_sec, 60);
        assert_eq!(config.validation_ttl_sec, 5);
        assert_eq!(config.max_stat_entries, 20_000);
        assert!(!config.fast_mode);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = FtpFsConfig::from_json_str(r#"{"maxPoolSize": 3, "fastMode": true}"#).unwrap();
        assert_eq!(config.max_pool_size, 3);
        assert!(config.fast_mode);
        assert_eq!(config.validation_ttl_sec, 5);
        assert_eq!(config.max_stat_entries, 20_000);
    }

    #[test]
    fn rejects_zero_capacities() {
        let err = FtpFsConfig::from_json_str(r#"{"maxPoolSize": 0}"#).unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::InvalidConfig);
        assert!(FtpFsConfig::from_json_str(r#"{"maxStatEntries": 0}"#).is_err());
    }

    #[test]
    fn rejects_out_of_range_seconds() {
        let err = FtpFsConfig::from_json_str(r#"{"idleTimeoutSec": 100000000000000000}"#).unwrap_err();
        assert_eq!(err.kind, crate::ftp::error::FtpErrorKind::InvalidConfig);
        assert!(err.message.contains("idleTimeoutSec"));
        assert!(FtpFsConfig::from_json_str(r#"{"validationTtlSec": 18446744073709551615}"#).is_err());
        assert!(FtpFsConfig::from_json_str(r#"{"dataTimeoutSec": 315360001}"#).is_err());
        assert!(FtpFsConfig::from_json_str(r#"{"dataTimeoutSec": 315360000}"#).is_ok());
    }

    #[test]
    fn accessors_clamp_unvalidated_values() {
        let config = FtpFsConfig {
            idle_timeout_sec: u64::MAX,
            validation_ttl_sec: 9_300_000_000_000_000_000,
            maintenance_interval_sec: 0,
            probe_timeout_sec: u64::MAX,
            ..FtpFsConfig::default()
        };
        assert_eq!(config.idle_timeout(), chrono::Duration::seconds(MAX_SECONDS as i64));
        assert_eq!(config.validation_ttl(), chrono::Duration::seconds(MAX_SECONDS as i64));
        assert_eq!(config.maintenance_interval(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_secs(MAX_SECONDS));
    }

    #[test]
    fn load_reads_file_and_tolerates_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"idleTimeoutSec": 120, "validationTtlSec": 2}}"#).unwrap();
        let config = FtpFsConfig::load(file.path()).unwrap();
        assert_eq!(config.idle_timeout(), chrono::Duration::seconds(120));
        assert_eq!(config.validation_ttl(), chrono::Duration::seconds(2));

        let dir = tempfile::tempdir().unwrap();
        let missing = FtpFsConfig::load(dir.path().join("FTP Settings.json")).unwrap();
        assert_eq!(missing, FtpFsConfig::default());
    }
}
