//! Helpers for reading typed settings from the environment.
//!
//! Every `*Config::from_env()` in the workspace is a thin wrapper over a
//! `from_lookup` constructor taking a [`Lookup`], so tests can supply
//! variables without touching the process environment.

use std::fmt::Display;
use std::str::FromStr;

/// Resolves an environment variable name to its value.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Read from the real process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Value of `name`, treating an empty or whitespace-only value as unset.
pub fn lookup_trimmed(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn string_or(lookup: Lookup<'_>, name: &str, default: &str) -> String {
    lookup_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn required(lookup: Lookup<'_>, name: &'static str) -> Result<String, ConfigError> {
    lookup_trimmed(lookup, name).ok_or(ConfigError::Missing { name })
}

/// Parse `name` if set, otherwise return `default`.
pub fn parse_or<T>(lookup: Lookup<'_>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup_trimmed(lookup, name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    /// Build a lookup over fixed pairs.
    pub fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }
}
