use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Serialized;
use figment::providers::Toml;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::warn;

use crate::GateError;

/// Prefix for environment variable overrides, e.g. `SHOT_GATE_LIMIT=20`.
pub const ENV_PREFIX: &str = "SHOT_GATE_";

const DEFAULT_LIMIT: NonZeroUsize = NonZeroUsize::new(5).unwrap();
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_EVICTION_PERIOD: Duration = Duration::from_secs(10 * 60);
const DEFAULT_EXPIRY: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a [`Gate`](crate::Gate).
///
/// Durations are written in `humantime` form (`"2s"`, `"10m"`) when loaded
/// from TOML or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum concurrent permits per identity.
    pub limit: NonZeroUsize,

    /// How long an acquire waits for a free permit before giving up.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,

    /// How often the reclaimer scans for idle identities.
    #[serde(with = "humantime_serde")]
    pub eviction_period: Duration,

    /// Minimum idle time before an identity may be evicted.
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,

    /// Upper bound on how long `close` waits for the reclaimer.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl GateConfig {
    /// Creates a configuration with the given per-identity limit and default timings.
    pub fn new(limit: NonZeroUsize) -> Self {
        Self {
            limit,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            eviction_period: DEFAULT_EVICTION_PERIOD,
            expiry: DEFAULT_EXPIRY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// How long an acquire waits for a free permit.
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Delay between reclaimer passes.
    pub fn with_eviction_period(mut self, eviction_period: Duration) -> Self {
        self.eviction_period = eviction_period;
        self
    }

    /// Idle time after which a fully released identity may be evicted.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// How long [`Gate::close`](crate::Gate::close) waits for the reclaimer.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Loads configuration from defaults, an optional TOML file and the environment.
    ///
    /// Later sources override earlier ones:
    /// 1. [`GateConfig::default`]
    /// 2. The TOML file at `path`, if given and present
    /// 3. Variables prefixed with [`ENV_PREFIX`]
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] if extraction or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, GateError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if path.exists() {
                debug!(path = %path.display(), "loading gate configuration file");
                figment = figment.merge(Toml::file(path));
            } else {
                warn!(path = %path.display(), "gate configuration file not found, using defaults");
            }
        }

        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings a gate cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), GateError> {
        if self.limit.get() > Semaphore::MAX_PERMITS {
            return Err(GateError::InvalidConfig(format!(
                "limit {} exceeds the maximum of {}",
                self.limit,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(GateError::InvalidConfig(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }
        if self.eviction_period.is_zero() {
            return Err(GateError::InvalidConfig(
                "eviction_period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GateConfig::default();
        assert_eq!(config.limit.get(), 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.eviction_period, Duration::from_secs(600));
        assert_eq!(config.expiry, Duration::from_secs(1800));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_and_environment_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gate.toml",
                r#"
                limit = 20
                acquire_timeout = "500ms"
                eviction_period = "1m"
                "#,
            )?;
            jail.set_env("SHOT_GATE_EXPIRY", "1h");
            jail.set_env("SHOT_GATE_ACQUIRE_TIMEOUT", "750ms");

            let config =
                GateConfig::load(Some(Path::new("gate.toml"))).map_err(|e| e.to_string())?;

            assert_eq!(config.limit.get(), 20);
            assert_eq!(config.acquire_timeout, Duration::from_millis(750));
            assert_eq!(config.eviction_period, Duration::from_secs(60));
            assert_eq!(config.expiry, Duration::from_secs(3600));
            assert_eq!(config.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config =
                GateConfig::load(Some(Path::new("absent.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config, GateConfig::default());
            Ok(())
        });
    }

    #[test]
    fn zero_limit_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SHOT_GATE_LIMIT", "0");
            let err = GateConfig::load(None).expect_err("zero limit must not load");
            assert!(matches!(err, GateError::InvalidConfig(_)));
            Ok(())
        });
    }

    #[test]
    fn zero_durations_are_rejected() {
        let limit = NonZeroUsize::new(1).unwrap();
        let config = GateConfig::new(limit).with_eviction_period(Duration::ZERO);
        assert!(matches!(config.validate(), Err(GateError::InvalidConfig(_))));

        let config = GateConfig::new(limit).with_acquire_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(GateError::InvalidConfig(_))));
    }
}
