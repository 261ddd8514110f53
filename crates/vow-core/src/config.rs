//! Pool configuration.
//!
//! The core only needs `{strategy, capacity}`; this module resolves them from
//! JSON or from `VOW_POOL_*` environment variables, falling back to defaults.

use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::VowError;

pub const ENV_STRATEGY: &str = "VOW_POOL_STRATEGY";
pub const ENV_CAPACITY: &str = "VOW_POOL_CAPACITY";
pub const ENV_HOOK: &str = "VOW_POOL_HOOK";

/// Upper bound for `capacity`. Every fixed worker and every permit-gated unit
/// may hold a blocking thread, so this also bounds the runtime's thread pool.
pub const MAX_CAPACITY: usize = 4_096;

/// How a `WorkerPool` turns submissions into running work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolStrategy {
    /// `capacity` long-lived workers over an unbounded FIFO queue.
    #[default]
    Fixed,

    /// One ephemeral unit per submission; nothing pre-allocated.
    PerTask,

    /// Ephemeral units, at most `capacity` running at once (counting permit).
    VirtualCeiling,
}

impl FromStr for PoolStrategy {
    type Err = VowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(PoolStrategy::Fixed),
            "per-task" => Ok(PoolStrategy::PerTask),
            "virtual-ceiling" => Ok(PoolStrategy::VirtualCeiling),
            other => Err(VowError::Config(format!("unknown pool strategy '{other}'"))),
        }
    }
}

/// Whether the pool registers itself for process termination signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationHook {
    /// SIGINT / SIGTERM trigger `signal_terminate`, after which the process
    /// exits with `128 + signo`.
    Auto,

    /// Nothing is registered; the owner calls `stop` itself.
    #[default]
    Manual,
}

impl FromStr for TerminationHook {
    type Err = VowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TerminationHook::Auto),
            "manual" => Ok(TerminationHook::Manual),
            other => Err(VowError::Config(format!("unknown termination hook '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub strategy: PoolStrategy,

    /// Worker count (`Fixed`) or concurrency ceiling (`VirtualCeiling`).
    /// 0 means "available hardware concurrency". Ignored by `PerTask`.
    pub capacity: usize,

    pub hook: TerminationHook,
}

impl PoolConfig {
    pub fn new(strategy: PoolStrategy, capacity: usize) -> Self {
        Self {
            strategy,
            capacity,
            hook: TerminationHook::Manual,
        }
    }

    pub fn with_hook(mut self, hook: TerminationHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, VowError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VowError::Config(format!("json decode: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `VOW_POOL_STRATEGY`, `VOW_POOL_CAPACITY` and
    /// `VOW_POOL_HOOK` when set.
    pub fn from_env() -> Result<Self, VowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VowError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_STRATEGY) {
            config.strategy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_CAPACITY) {
            config.capacity = raw.trim().parse().map_err(|e| {
                VowError::Config(format!("{ENV_CAPACITY}='{raw}' is not a capacity: {e}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_HOOK) {
            config.hook = raw.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject capacities above [`MAX_CAPACITY`].
    pub fn validate(&self) -> Result<(), VowError> {
        if self.capacity > MAX_CAPACITY {
            return Err(VowError::Config(format!(
                "capacity {} exceeds the maximum of {MAX_CAPACITY}",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Capacity with 0 replaced by the machine's available parallelism.
    pub fn resolved_capacity(&self) -> usize {
        if self.capacity > 0 {
            return self.capacity;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_are_fixed_auto_sized_manual() {
        let config = PoolConfig::default();
        assert_eq!(config.strategy, PoolStrategy::Fixed);
        assert_eq!(config.capacity, 0);
        assert_eq!(config.hook, TerminationHook::Manual);
        assert!(config.resolved_capacity() >= 1);
    }

    #[rstest]
    #[case::fixed("fixed", PoolStrategy::Fixed)]
    #[case::per_task("per-task", PoolStrategy::PerTask)]
    #[case::virtual_ceiling("Virtual-Ceiling", PoolStrategy::VirtualCeiling)]
    fn strategy_names_parse(#[case] raw: &str, #[case] expected: PoolStrategy) {
        assert_eq!(raw.parse::<PoolStrategy>().unwrap(), expected);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = PoolConfig::from_lookup(lookup(&[
            (ENV_STRATEGY, "virtual-ceiling"),
            (ENV_CAPACITY, " 8 "),
            (ENV_HOOK, "auto"),
        ]))
        .unwrap();

        assert_eq!(config.strategy, PoolStrategy::VirtualCeiling);
        assert_eq!(config.resolved_capacity(), 8);
        assert_eq!(config.hook, TerminationHook::Auto);
    }

    #[test]
    fn bad_env_values_are_config_errors() {
        let err = PoolConfig::from_lookup(lookup(&[(ENV_CAPACITY, "many")])).unwrap_err();
        assert!(matches!(err, VowError::Config(msg) if msg.contains(ENV_CAPACITY)));

        let err = PoolConfig::from_lookup(lookup(&[(ENV_STRATEGY, "round-robin")])).unwrap_err();
        assert!(matches!(err, VowError::Config(_)));
    }

    #[rstest]
    #[case::at_limit(MAX_CAPACITY, true)]
    #[case::above_limit(MAX_CAPACITY + 1, false)]
    #[case::usize_max(usize::MAX, false)]
    fn capacity_is_bounded(#[case] capacity: usize, #[case] accepted: bool) {
        let config = PoolConfig::new(PoolStrategy::Fixed, capacity);
        assert_eq!(config.validate().is_ok(), accepted);
    }

    #[test]
    fn oversized_capacity_from_env_or_json_is_rejected() {
        let err = PoolConfig::from_lookup(lookup(&[(ENV_CAPACITY, "18446744073709551615")]))
            .unwrap_err();
        assert!(matches!(err, VowError::Config(msg) if msg.contains("exceeds")));

        let json = format!(r#"{{ "capacity": {} }}"#, MAX_CAPACITY + 1);
        assert!(matches!(
            PoolConfig::from_json_str(&json),
            Err(VowError::Config(_))
        ));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = PoolConfig::from_json_str(r#"{ "strategy": "per-task" }"#).unwrap();
        assert_eq!(config, PoolConfig::new(PoolStrategy::PerTask, 0));

        assert!(PoolConfig::from_json_str(r#"{ "strategy": "bogus" }"#).is_err());
    }
}
