//! Environment configuration loader
//!
//! Loads environment variables from the canonical location:
//! `/etc/openvrr/environment`. Call `load_environment()` early in `main()`
//! before reading any other configuration.

use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default OVS bridge name the gateway installs its pipeline on.
pub const DEFAULT_BRIDGE: &str = "vrr";

/// Default path to the admin HTTP basic-auth token file.
pub const DEFAULT_TOKEN_FILE: &str = "/etc/openvrr/token";

/// Default loopback listen address for the admin HTTP API.
pub const DEFAULT_ADMIN_LISTEN: &str = "127.0.0.1:10001";

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/openvrr/environment";

/// Alternative paths to check, in priority order
pub const ENV_FILE_PATHS: &[&str] = &[
    "/etc/openvrr/environment",
    "/etc/openvrr.env",
    ".env",
];

/// Load environment variables from the canonical configuration file.
///
/// Checks `OPENVRR_ENV_FILE` first, then each of [`ENV_FILE_PATHS`] in
/// order. Existing environment variables are never overridden. Returns the
/// path that was loaded, or `None` if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("OPENVRR_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("no environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();

                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        debug!(
                            "loaded: {}={}",
                            key,
                            if key.contains("TOKEN") || key.contains("SECRET") {
                                "***"
                            } else {
                                &value
                            }
                        );
                    } else {
                        skipped_count += 1;
                        debug!("skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );

            Some(path.to_string())
        }
        Err(e) => {
            warn!("failed to read environment file {}: {}", path, e);
            None
        }
    }
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get a configuration value, falling back to `default` if unset.
pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an optional configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn parse_env_line_quoted() {
        let (k, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar baz");
    }

    #[test]
    fn parse_env_line_single_quoted() {
        let (k, v) = parse_env_line("FOO='bar'").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn get_config_int_falls_back_on_garbage() {
        std::env::remove_var("VRR_TEST_INT_GARBAGE");
        std::env::set_var("VRR_TEST_INT_GARBAGE", "not-a-number");
        assert_eq!(get_config_int("VRR_TEST_INT_GARBAGE", 42), 42);
        std::env::remove_var("VRR_TEST_INT_GARBAGE");
    }
}
