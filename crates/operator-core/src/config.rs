// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use crate::steps::FanOutStrategy;

/// Operator core configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Start server workflows one after another, or as concurrent child fibers
    pub concurrent_server_starts: bool,
    /// Maximum server workflows in flight in concurrent mode (0 = unlimited)
    pub max_concurrent_server_starts: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `OPERATOR_FAN_OUT_STRATEGY`: `sequential` or `concurrent` (default: sequential)
    /// - `OPERATOR_MAX_CONCURRENT_SERVER_STARTS`: In-flight limit for concurrent
    ///   starts, 0 for unlimited (default: 0)
    pub fn from_env() -> Result<Self, ConfigError> {
        let concurrent_server_starts = match std::env::var("OPERATOR_FAN_OUT_STRATEGY")
            .unwrap_or_else(|_| "sequential".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "sequential" => false,
            "concurrent" => true,
            _ => {
                return Err(ConfigError::Invalid(
                    "OPERATOR_FAN_OUT_STRATEGY",
                    "must be 'sequential' or 'concurrent'",
                ));
            }
        };

        let max_concurrent_server_starts: usize =
            std::env::var("OPERATOR_MAX_CONCURRENT_SERVER_STARTS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "OPERATOR_MAX_CONCURRENT_SERVER_STARTS",
                        "must be a non-negative integer",
                    )
                })?;

        Ok(Self {
            concurrent_server_starts,
            max_concurrent_server_starts,
        })
    }

    /// The fan-out strategy this configuration selects.
    pub fn fan_out_strategy(&self) -> FanOutStrategy {
        if self.concurrent_server_starts {
            FanOutStrategy::Concurrent {
                max_in_flight: self.max_concurrent_server_starts,
            }
        } else {
            FanOutStrategy::Sequential
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
