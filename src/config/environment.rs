//! Environment variable loading and parsing helpers.
//!
//! This module handles loading configuration from .env files and environment
//! variables, ensuring all required values are present before the application
//! starts.

use std::env;
use std::str::FromStr;

/// Loads environment variables from a .env file.
///
/// Call early in main() before reading any environment variables. If no .env
/// file is present, system environment variables are used as-is.
pub fn load_env() {
    dotenvy::dotenv().ok();
}

/// Reads an environment variable, falling back to a default when unset or
/// unparseable.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Reads a required environment variable.
pub fn env_required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("{key} must be set in environment or .env file"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("LUCKYCHAMBER_DOES_NOT_EXIST", 42u64), 42);
    }

    #[test]
    fn test_env_or_parses() {
        env::set_var("LUCKYCHAMBER_TEST_PORT", "9001");
        assert_eq!(env_or("LUCKYCHAMBER_TEST_PORT", 0u16), 9001);
        env::remove_var("LUCKYCHAMBER_TEST_PORT");
    }
}
