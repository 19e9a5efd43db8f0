use crate::application::CoordinatorOptions;
use crate::coordination::{FairnessPolicy, OptimisticOptions};
use crate::domain::{LockTimeout, MaxRetries};
use crate::harness::HarnessOptions;
use crate::notifier::BroadcastGateway;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub locks: LockSettings,
    pub optimistic: OptimisticSettings,
    pub harness: HarnessSettings,
    pub notifier: NotifierSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LockSettings {
    pub default_timeout_ms: u64,
    pub fairness: FairnessPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OptimisticSettings {
    pub max_retries: u32,
    pub commit_gate_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HarnessSettings {
    pub benchmark_cooldown_ms: u64,
    pub variance_ratio: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NotifierSettings {
    pub channel_capacity: usize,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Self::defaults()?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("SLOTWARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("locks.default_timeout_ms", 5000)?
            .set_default("locks.fairness", "fifo")?
            .set_default("optimistic.max_retries", 3)?
            .set_default("optimistic.commit_gate_timeout_ms", 100)?
            .set_default("harness.benchmark_cooldown_ms", 1000)?
            .set_default("harness.variance_ratio", 0.5)?
            .set_default("notifier.channel_capacity", 1024)
    }

    /// Validated lock and retry options for a [`crate::Coordinator`]
    pub fn coordinator_options(&self) -> crate::Result<CoordinatorOptions> {
        Ok(CoordinatorOptions {
            default_timeout: LockTimeout::from_millis(self.locks.default_timeout_ms)?,
            fairness: self.locks.fairness,
            optimistic: OptimisticOptions {
                max_retries: MaxRetries::try_new(self.optimistic.max_retries)?,
                commit_gate_timeout: LockTimeout::from_millis(
                    self.optimistic.commit_gate_timeout_ms,
                )?,
            },
        })
    }

    pub fn harness_options(&self) -> crate::Result<HarnessOptions> {
        let ratio = self.harness.variance_ratio;
        if !ratio.is_finite() || ratio < 0.0 {
            return Err(crate::Error::invalid_setting(
                "harness.variance_ratio",
                format!("must be a non-negative number, got {ratio}"),
            ));
        }
        Ok(HarnessOptions {
            variance_ratio: ratio,
            benchmark_cooldown: Duration::from_millis(self.harness.benchmark_cooldown_ms),
        })
    }

    /// In-process gateway sized by `notifier.channel_capacity`
    pub fn broadcast_gateway(&self) -> crate::Result<BroadcastGateway> {
        match self.notifier.channel_capacity {
            0 => Err(crate::Error::invalid_setting(
                "notifier.channel_capacity",
                "must be at least 1",
            )),
            capacity => Ok(BroadcastGateway::new(capacity)),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            locks: LockSettings {
                default_timeout_ms: 5000,
                fairness: FairnessPolicy::Fifo,
            },
            optimistic: OptimisticSettings {
                max_retries: 3,
                commit_gate_timeout_ms: 100,
            },
            harness: HarnessSettings {
                benchmark_cooldown_ms: 1000,
                variance_ratio: 0.5,
            },
            notifier: NotifierSettings {
                channel_capacity: 1024,
            },
        }
    }
}
