use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

fn default_stripe_size() -> u64 {
    1024 * 1024
}

fn default_pool_max_file_size() -> u64 {
    1024 * 1024 * 1024 * 1024
}

fn default_lock_lease_secs() -> u64 {
    10
}

fn default_lock_idle_secs() -> u64 {
    5
}

/// Controls whether asynchronous store completions log their outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Off,
    Debug,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_stripe_size")]
    pub stripe_size: u64,
    /// Write alignment enforced by the pool; 0 disables padding.
    #[serde(default)]
    pub pool_alignment: u64,
    #[serde(default = "default_pool_max_file_size")]
    pub pool_max_file_size: u64,
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,
    #[serde(default = "default_lock_idle_secs")]
    pub lock_idle_secs: u64,
    /// Leading bytes of a file held in its parent directory's index
    /// entry; 0 disables the inline fast path.
    #[serde(default)]
    pub inline_capacity: u64,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stripe_size: default_stripe_size(),
            pool_alignment: 0,
            pool_max_file_size: default_pool_max_file_size(),
            lock_lease_secs: default_lock_lease_secs(),
            lock_idle_secs: default_lock_idle_secs(),
            inline_capacity: 0,
            log_level: LogLevel::Off,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        let cfg: Self = toml::from_str(&raw).context("failed to parse engine config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stripe_size == 0 {
            bail!("stripe_size must be > 0");
        }
        if self.pool_max_file_size < self.stripe_size {
            bail!("pool_max_file_size must be >= stripe_size");
        }
        if self.lock_lease_secs < 2 {
            bail!("lock_lease_secs must be >= 2");
        }
        if self.lock_idle_secs == 0 {
            bail!("lock_idle_secs must be > 0");
        }
        if self.lock_idle_secs > self.lock_lease_secs {
            bail!("lock_idle_secs must be <= lock_lease_secs");
        }
        if self.inline_capacity >= self.pool_max_file_size {
            bail!("inline_capacity must be < pool_max_file_size");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_stripe_size() {
        let cfg = EngineConfig {
            stripe_size: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_idle_timeout_beyond_lease() {
        let cfg = EngineConfig {
            lock_lease_secs: 4,
            lock_idle_secs: 5,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_toml_with_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            stripe_size = 8
            inline_capacity = 16
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stripe_size, 8);
        assert_eq!(cfg.inline_capacity, 16);
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.lock_lease_secs, 10);
    }
}
