//! Pool configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Resource pool configuration.
///
/// All values are fixed once the pool is built.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Pool name, used in traces and metric labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Minimum pool size.
    ///
    /// The pool keeps at least this many items created, unless it is being disposed.
    /// Must not exceed [`Self::max`].
    ///
    /// Default is 0.
    #[serde(default, alias = "min_size")]
    pub min: usize,
    /// Maximum pool size.
    ///
    /// Counts idle, checked out, and items in creation, verification or disposal.
    ///
    /// Default is 10.
    #[serde(default = "PoolConfig::default_max", alias = "max_size")]
    pub max: usize,
    /// Default timeout for acquisitions.
    ///
    /// Default is `None`, meaning acquisitions wait forever.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "timeout",
        with = "humantime_serde"
    )]
    pub acquire_timeout: Option<Duration>,
    /// How long an item may stay idle before it is disposed of.
    ///
    /// Idle items are never disposed if that would drop the pool below [`Self::min`].
    ///
    /// Default is `None`, meaning idle items are kept forever.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde"
    )]
    pub idle_timeout: Option<Duration>,
    /// What to do with pending acquisitions when item creation fails.
    #[serde(default)]
    pub create_error: CreateErrorPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: None,
            min: 0,
            max: Self::default_max(),
            acquire_timeout: None,
            idle_timeout: None,
            create_error: CreateErrorPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Create pool configuration with provided maximum size, and defaults for everything else.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            max,
            ..Default::default()
        }
    }

    /// Create builder for pool configuration.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Default value for [`Self::max`].
    #[must_use]
    #[inline]
    fn default_max() -> usize {
        10
    }

    /// Set pool name.
    #[must_use]
    pub fn with_name(mut self, name: impl ToString) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set minimum pool size.
    #[must_use]
    pub fn with_min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    /// Set maximum pool size.
    #[must_use]
    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Set default acquisition timeout.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.acquire_timeout = timeout.into();
        self
    }

    /// Set idle item timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    /// Set reaction to item creation failures.
    #[must_use]
    pub fn with_create_error(mut self, policy: CreateErrorPolicy) -> Self {
        self.create_error = policy;
        self
    }

    /// Name used for traces and metric labels.
    #[must_use]
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("default")
    }

    /// Check configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `Err` if [`Self::min`] is greater than [`Self::max`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::MinExceedsMax {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Reaction to a failed item creation.
///
/// Failures are always reported to the error hook and logged.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum CreateErrorPolicy {
    /// Release reserved capacity and try again while there is still demand for items.
    #[default]
    Retry,
    /// Reject the oldest pending acquisition with [`Error::Create`](crate::Error::Create).
    FailWaiter,
}

/// Builder for pool configuration.
///
/// Layers several configuration sources on top of each other.
#[must_use]
pub struct PoolConfigBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfigBuilder {
    /// Alternative method to construct a pool configuration builder.
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
        }
    }

    /// Try to build configuration object from preconfigured sources.
    ///
    /// This method will do all the I/O necessary to load the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if some configuration loading was unsuccessful, or if resulting
    /// configuration is inconsistent.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        let config: PoolConfig = self.builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Add a custom object implementing [`Source`] trait as a source of pool configuration.
    ///
    /// [`Source`]: config::Source
    pub fn with_source<T>(mut self, source: T) -> Self
    where
        T: config::Source + Send + Sync + 'static,
    {
        self.builder = self.builder.add_source(source);
        self
    }

    /// Add file as a source of pool configuration.
    pub fn with_file(self, name: impl AsRef<str>) -> Self {
        self.with_source(config::File::with_name(name.as_ref()))
    }

    /// Add environment variables as a source of pool configuration.
    ///
    /// Variables are named like `PREFIX_MAX` or `PREFIX_ACQUIRE_TIMEOUT`.
    pub fn with_env(self, prefix: impl AsRef<str>) -> Self {
        self.with_source(
            config::Environment::with_prefix(prefix.as_ref())
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{from_str, json, to_value};

    use super::*;

    #[test]
    fn de_defaults() {
        let cfg: PoolConfig = from_str("{}").unwrap();
        assert_eq!(cfg, PoolConfig::default());
        assert_eq!(cfg.max, 10);
        assert_eq!(cfg.label(), "default");
    }

    #[test]
    fn de_full() {
        let serialized = r#"{
            "name": "db",
            "min_size": 2,
            "max_size": 4,
            "timeout": "1s 500ms",
            "idle_timeout": "5m",
            "create_error": "fail_waiter"
        }"#;
        let cfg: PoolConfig = from_str(serialized).unwrap();
        assert_eq!(
            cfg,
            PoolConfig::new(4)
                .with_name("db")
                .with_min(2)
                .with_acquire_timeout(Duration::from_millis(1500))
                .with_idle_timeout(Duration::from_secs(300))
                .with_create_error(CreateErrorPolicy::FailWaiter)
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn ser_skips_unset() {
        let cfg = PoolConfig::new(3).with_acquire_timeout(Duration::from_secs(2));
        assert_eq!(
            to_value(&cfg).unwrap(),
            json!({
                "min": 0,
                "max": 3,
                "acquire_timeout": "2s",
                "create_error": "retry"
            })
        );
    }

    #[test]
    fn validate_min_max() {
        assert!(PoolConfig::new(0).validate().is_ok());
        assert!(PoolConfig::new(2).with_min(2).validate().is_ok());
        assert!(matches!(
            PoolConfig::new(1).with_min(2).validate(),
            Err(ConfigError::MinExceedsMax { min: 2, max: 1 })
        ));
    }

    #[test]
    fn builder_layers_sources() {
        let base = "max: 8\nmin: 1\nacquire_timeout: 250ms\n";
        let overlay = "max: 6\nname: overlay\n";
        let cfg = PoolConfig::builder()
            .with_source(config::File::from_str(base, config::FileFormat::Yaml))
            .with_source(config::File::from_str(overlay, config::FileFormat::Yaml))
            .build()
            .unwrap();
        assert_eq!(cfg.max, 6);
        assert_eq!(cfg.min, 1);
        assert_eq!(cfg.name.as_deref(), Some("overlay"));
        assert_eq!(cfg.acquire_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn builder_rejects_inconsistent() {
        let res = PoolConfig::builder()
            .with_source(config::File::from_str(
                "max: 1\nmin: 2\n",
                config::FileFormat::Yaml,
            ))
            .build();
        assert!(matches!(res, Err(ConfigError::MinExceedsMax { .. })));
    }
}
