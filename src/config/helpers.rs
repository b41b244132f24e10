//! Small helpers for reading configuration from the environment.

use std::str::FromStr;

use crate::error::ConfigError;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Read an environment variable, treating an empty value as unset.
pub fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
pub fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

/// Parse a `Key1:Value1,Key2:Value2` header list.
///
/// Colon is the separator because header values often contain `=`.
pub fn parse_extra_headers(key: &str, val: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut headers = Vec::new();
    for pair in val.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((name, value)) = pair.split_once(':') else {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("malformed header entry '{pair}', expected Key:Value"),
            });
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("empty header name in entry '{pair}'"),
            });
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}
