//! Shared environment parsing helpers.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

pub(crate) fn parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse::<T>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<bool>().ok())
        .unwrap_or(default)
}

pub(crate) fn parse_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn parse_u32_list(key: &str, default: &str) -> Result<Vec<u32>> {
    parse_list(key, default)
        .iter()
        .map(|s| {
            s.parse::<u32>()
                .context(format!("Failed to parse {} entry '{}'", key, s))
        })
        .collect()
}
