use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// How worker pools are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPolicy {
    /// One worker group per distinct priority tier, each capped at
    /// `concurrency`. Every group drains the same shared queue, so the total
    /// worker count grows with the number of tiers in use.
    #[default]
    PerTier,
    /// A single worker group for all tiers; total workers never exceed
    /// `concurrency`.
    Shared,
}

impl fmt::Display for WorkerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerPolicy::PerTier => write!(f, "per_tier"),
            WorkerPolicy::Shared => write!(f, "shared"),
        }
    }
}

impl WorkerPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_tier" | "per-tier" | "tier" => Some(WorkerPolicy::PerTier),
            "shared" | "global" => Some(WorkerPolicy::Shared),
            _ => None,
        }
    }
}

/// Scheduler configuration, from code, TOML or the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum workers per group. 0 = available parallelism.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Whether tiers get their own worker group or share one.
    #[serde(default)]
    pub worker_policy: WorkerPolicy,
    /// Prefix for worker thread names.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Worker thread stack size in bytes. `None` = platform default.
    #[serde(default)]
    pub stack_size: Option<usize>,
}

fn default_concurrency() -> usize { 0 }
fn default_thread_name() -> String { "prio-worker".to_string() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            worker_policy: WorkerPolicy::default(),
            thread_name: default_thread_name(),
            stack_size: None,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.trim().parse().ok())
}

impl SchedulerConfig {
    /// Config with an explicit concurrency cap and defaults elsewhere.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    /// Build config from `PRIO_LANES_*` environment variables, loading a
    /// `.env` file first if one exists. Unparseable values keep their default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            concurrency: env_parse("PRIO_LANES_CONCURRENCY").unwrap_or(defaults.concurrency),
            worker_policy: env_opt("PRIO_LANES_WORKER_POLICY")
                .and_then(|v| WorkerPolicy::parse(&v))
                .unwrap_or(defaults.worker_policy),
            thread_name: env_opt("PRIO_LANES_THREAD_NAME").unwrap_or(defaults.thread_name),
            stack_size: env_parse("PRIO_LANES_STACK_SIZE").or(defaults.stack_size),
        }
    }

    /// Parse a TOML document such as:
    ///
    /// ```toml
    /// concurrency = 4
    /// worker_policy = "shared"
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, SchedulerError> {
        let config: Self = toml::from_str(s).map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.thread_name.trim().is_empty() {
            return Err(SchedulerError::Config("thread_name must not be empty".into()));
        }
        if self.stack_size == Some(0) {
            return Err(SchedulerError::Config("stack_size must be non-zero".into()));
        }
        Ok(())
    }

    /// Resolve the per-group worker cap (0 means use available parallelism).
    pub fn resolved_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.concurrency
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 0);
        assert_eq!(config.worker_policy, WorkerPolicy::PerTier);
        assert_eq!(config.thread_name, "prio-worker");
        assert_eq!(config.stack_size, None);
    }

    #[test]
    fn resolved_concurrency() {
        let mut config = SchedulerConfig::default();
        // 0 means auto-detect
        assert!(config.resolved_concurrency() > 0);

        config.concurrency = 3;
        assert_eq!(config.resolved_concurrency(), 3);
    }

    #[test]
    fn parse_full_toml() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            concurrency = 2
            worker_policy = "shared"
            thread_name = "render"
            stack_size = 65536
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.worker_policy, WorkerPolicy::Shared);
        assert_eq!(config.thread_name, "render");
        assert_eq!(config.stack_size, Some(65536));
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn reject_unknown_policy() {
        let err = SchedulerConfig::from_toml_str(r#"worker_policy = "round_robin""#).unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn reject_empty_thread_name() {
        let err = SchedulerConfig::from_toml_str(r#"thread_name = "  ""#).unwrap_err();
        assert!(err.to_string().contains("thread_name"));
    }

    #[test]
    fn reject_zero_stack() {
        let config = SchedulerConfig {
            stack_size: Some(0),
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn policy_parse_aliases() {
        assert_eq!(WorkerPolicy::parse("Per-Tier"), Some(WorkerPolicy::PerTier));
        assert_eq!(WorkerPolicy::parse(" shared "), Some(WorkerPolicy::Shared));
        assert_eq!(WorkerPolicy::parse("bogus"), None);
        assert_eq!(WorkerPolicy::Shared.to_string(), "shared");
    }

    #[test]
    fn from_env_reads_prefixed_keys() {
        env::set_var("PRIO_LANES_CONCURRENCY", "6");
        env::set_var("PRIO_LANES_WORKER_POLICY", "shared");
        env::set_var("PRIO_LANES_STACK_SIZE", "not-a-number");
        let config = SchedulerConfig::from_env();
        env::remove_var("PRIO_LANES_CONCURRENCY");
        env::remove_var("PRIO_LANES_WORKER_POLICY");
        env::remove_var("PRIO_LANES_STACK_SIZE");

        assert_eq!(config.concurrency, 6);
        assert_eq!(config.worker_policy, WorkerPolicy::Shared);
        assert_eq!(config.stack_size, None);
    }
}
