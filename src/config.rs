//! Environment configuration.

// Copyright (c) 2025 Jak Bracegirdle
//
// This file is part of the speedtest_exporter crate.
//
// Licensed under the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} must be {expected} (got {value:?})")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Immutable runtime configuration, built once at startup and handed to
/// each component's constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_address: String,
    pub bind_port: u16,
    pub binary_path: PathBuf,
    /// Where `qms_lib -L` drops the server list. The binary does not take
    /// this as an argument.
    pub server_data_path: PathBuf,
    /// Template for result files; each run gets a unique sibling of it.
    pub test_result_path: PathBuf,
    pub exec_timeout: Duration,
    pub file_wait_timeout: Duration,
    pub result_wait: Duration,
    pub server_id: Option<u32>,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 8080,
            binary_path: PathBuf::from("bin/qms_lib"),
            server_data_path: PathBuf::from("server_data"),
            test_result_path: PathBuf::from("data/test.json"),
            exec_timeout: Duration::from_secs(120),
            file_wait_timeout: Duration::from_secs(40),
            result_wait: Duration::from_secs(5),
            server_id: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` beforehand to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset or blank
    /// keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Config::default();

        let port = ["BIND_PORT", "HTTP_PORT"]
            .into_iter()
            .find_map(|var| get(var).map(|value| (var, value)));
        let bind_port = match port {
            Some((var, value)) => parse(var, "a valid u16", &value)?,
            None => defaults.bind_port,
        };

        let server_id = match get("SERVER_ID") {
            Some(value) => match parse::<u32>("SERVER_ID", "a non-negative integer", &value)? {
                0 => None,
                id => Some(id),
            },
            None => defaults.server_id,
        };

        let exec_timeout = seconds(&get, "EXEC_TIMEOUT_SEC", defaults.exec_timeout)?;
        if exec_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "EXEC_TIMEOUT_SEC",
                expected: "greater than zero",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            bind_port,
            binary_path: get("BINARY_PATH").map(PathBuf::from).unwrap_or(defaults.binary_path),
            server_data_path: get("SERVER_DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.server_data_path),
            test_result_path: get("TEST_RESULT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.test_result_path),
            exec_timeout,
            file_wait_timeout: seconds(&get, "FILE_WAIT_TIMEOUT_SEC", defaults.file_wait_timeout)?,
            result_wait: seconds(&get, "RESULT_WAIT_SEC", defaults.result_wait)?,
            server_id,
            shutdown_timeout: seconds(&get, "SHUTDOWN_TIMEOUT_SEC", defaults.shutdown_timeout)?,
        })
    }

    pub fn log_summary(&self) {
        tracing::info!(
            bind = %format!("{}:{}", self.bind_address, self.bind_port),
            binary_path = %self.binary_path.display(),
            server_data = %self.server_data_path.display(),
            test_result = %self.test_result_path.display(),
            exec_timeout_sec = self.exec_timeout.as_secs_f64(),
            server_id = ?self.server_id,
            "config loaded"
        );
    }
}

fn parse<T: FromStr>(var: &'static str, expected: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value: value.to_string(),
    })
}

/// Accepts both `120` and `120s`.
fn seconds<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => {
            let trimmed = value.trim();
            let digits = trimmed.strip_suffix('s').unwrap_or(trimmed);
            parse::<u64>(var, "a number of seconds", digits)
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid {
                    var,
                    expected: "a number of seconds",
                    value,
                })
        }
        None => Ok(default),
    }
}
