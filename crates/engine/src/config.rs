use std::str::FromStr;
use std::time::Duration;

use tessera_storage::RetryPolicy;

use crate::resolver::MergeOptions;

/// Engine settings. All fields have defaults; [`EngineConfig::from_env`]
/// overrides them from environment variables.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Options used by the bus when it computes slot views.
    pub merge: MergeOptions,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring invalid configuration value");
                default
            }
        },
        None => default,
    }
}

impl EngineConfig {
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `TESSERA_RETRY_MAX_ATTEMPTS`  | `3`     |
    /// | `TESSERA_RETRY_BASE_MS`       | `1000`  |
    /// | `TESSERA_RETRY_CAP_MS`        | `30000` |
    /// | `TESSERA_INCLUDE_UNPUBLISHED` | `false` |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading variables from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = &lookup;
        let defaults = RetryPolicy::default();
        let max_attempts =
            parse_or(lookup, "TESSERA_RETRY_MAX_ATTEMPTS", defaults.max_attempts).max(1);
        let base_ms = parse_or(
            lookup,
            "TESSERA_RETRY_BASE_MS",
            defaults.base_delay.as_millis() as u64,
        );
        let cap_ms = parse_or(
            lookup,
            "TESSERA_RETRY_CAP_MS",
            defaults.max_delay.as_millis() as u64,
        );

        let merge = MergeOptions {
            include_unpublished: parse_or(lookup, "TESSERA_INCLUDE_UNPUBLISHED", false),
            ..MergeOptions::default()
        };

        Self {
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(cap_ms.max(base_ms)),
            },
            merge,
        }
    }
}
