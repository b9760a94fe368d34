/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Endpoint configuration loaded from XDG-compliant locations.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::common::{ConfigError, FailureKind};
use crate::message::Address;
use crate::recoverability::DelayPolicy;
use crate::routing::RouteTable;

/// Configuration for a courier endpoint.
///
/// Every section falls back to its defaults when omitted, so an empty file is
/// a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Endpoint identity and concurrency
    pub endpoint: EndpointConfig,
    /// Retry limits, delay policy and error queue
    pub recoverability: RecoverabilitySettings,
    /// Outbox switch and recovery sweep
    pub outbox: OutboxConfig,
    /// Timeouts at the transport and processing boundaries
    pub timeouts: TimeoutConfig,
    /// Message-type to destination conventions
    pub routing: RoutingConfig,
}

/// Endpoint identity and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Name of the endpoint's input queue
    pub name: String,
    /// Maximum number of messages processed at once
    pub concurrency: usize,
    /// Subscribe to handled event types on start
    pub auto_subscribe: bool,
}

/// Recoverability limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverabilitySettings {
    /// In-process re-attempts before a delayed retry
    pub immediate_retries: u32,
    /// Transport-level requeues before the message is moved to the error queue
    pub delayed_retries: u32,
    /// How long each delayed retry waits
    pub delay: DelaySettings,
    /// Where failed messages go
    pub error_queue: String,
    /// Failure kinds that skip retries entirely
    pub unrecoverable_kinds: Vec<FailureKind>,
}

/// Serializable form of a [`DelayPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DelaySettings {
    /// The same delay for every attempt.
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// `initial + increment * (attempt - 1)`.
    Increasing {
        /// First delay in milliseconds
        initial_ms: u64,
        /// Added per attempt, in milliseconds
        increment_ms: u64,
    },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        /// First delay in milliseconds
        initial_ms: u64,
        /// Growth factor per attempt
        multiplier: f64,
        /// Upper bound in milliseconds
        max_ms: u64,
    },
}

/// Outbox switch and recovery sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Deduplicate incoming messages and defer outgoing dispatch to commit
    pub enabled: bool,
    /// How often committed but undispatched records are re-dispatched, in milliseconds
    pub sweep_interval_ms: u64,
}

/// Timeout-related configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long one transport receive waits for a message, in milliseconds
    pub receive_timeout_ms: u64,
    /// Upper bound for one processing attempt, in milliseconds
    pub processing_timeout_ms: u64,
    /// How long shutdown waits for in-flight messages, in milliseconds
    pub shutdown_timeout_ms: u64,
}

/// Message-type to destination conventions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Message type name (or ancestor name) to `queue[@machine]`
    pub routes: BTreeMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "courier".to_string(),
            concurrency: 8,
            auto_subscribe: true,
        }
    }
}

impl Default for RecoverabilitySettings {
    fn default() -> Self {
        Self {
            immediate_retries: 5,
            delayed_retries: 3,
            delay: DelaySettings::default(),
            error_queue: "error".to_string(),
            unrecoverable_kinds: vec![FailureKind::Fatal, FailureKind::Routing],
        }
    }
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self::Increasing {
            initial_ms: 10_000,
            increment_ms: 10_000,
        }
    }
}

impl DelaySettings {
    /// Builds the runtime policy.
    #[must_use]
    pub fn to_policy(&self) -> DelayPolicy {
        match *self {
            Self::Fixed { delay_ms } => DelayPolicy::Fixed(Duration::from_millis(delay_ms)),
            Self::Increasing {
                initial_ms,
                increment_ms,
            } => DelayPolicy::Increasing {
                initial: Duration::from_millis(initial_ms),
                increment: Duration::from_millis(increment_ms),
            },
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => DelayPolicy::Exponential {
                initial: Duration::from_millis(initial_ms),
                multiplier,
                max: Duration::from_millis(max_ms),
            },
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sweep_interval_ms: 5_000,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 1_000,
            processing_timeout_ms: 60_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl RoutingConfig {
    /// Parses every configured route into a [`RouteTable`].
    pub fn route_table(&self) -> Result<RouteTable, ConfigError> {
        let mut table = RouteTable::new();
        for (message_type, raw) in &self.routes {
            let address = Address::parse(raw).map_err(|source| ConfigError::InvalidAddress {
                key: format!("routing.routes.{message_type}"),
                value: raw.clone(),
                source,
            })?;
            table.insert(message_type.clone(), address);
        }
        Ok(table)
    }
}

impl CourierConfig {
    /// Parses configuration from a TOML document.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&document)
    }

    /// Load configuration from XDG-compliant locations
    ///
    /// Looks for `courier/config.toml` under the XDG configuration directories
    /// (`$XDG_CONFIG_HOME`, then `~/.config`).
    ///
    /// If no configuration file is found, returns the default configuration.
    /// If a configuration file exists but is malformed, logs an error and uses defaults.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("courier") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        match xdg_dirs.find_config_file("config.toml") {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Self::load_from(&path) {
                    Ok(config) => {
                        info!("Successfully loaded configuration");
                        config
                    }
                    Err(e) => {
                        error!("Failed to load configuration file {}: {}", path.display(), e);
                        Self::default()
                    }
                }
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        }
    }

    /// Receive timeout as a `Duration`.
    #[must_use]
    pub const fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.receive_timeout_ms)
    }

    /// Processing timeout as a `Duration`.
    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.processing_timeout_ms)
    }

    /// Shutdown timeout as a `Duration`.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_timeout_ms)
    }

    /// Outbox sweep interval as a `Duration`.
    #[must_use]
    pub const fn outbox_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.outbox.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CourierConfig::default();
        assert_eq!(config.endpoint.concurrency, 8);
        assert_eq!(config.recoverability.immediate_retries, 5);
        assert_eq!(config.recoverability.delayed_retries, 3);
        assert_eq!(config.recoverability.error_queue, "error");
        assert_eq!(config.receive_timeout(), Duration::from_secs(1));
        assert_eq!(config.processing_timeout(), Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert!(!config.outbox.enabled);
        assert_eq!(config.outbox_sweep_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_documents_keep_remaining_defaults() {
        let config = CourierConfig::from_toml_str(
            r#"
            [recoverability]
            immediate_retries = 3
            delayed_retries = 2

            [recoverability.delay]
            policy = "fixed"
            delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.recoverability.immediate_retries, 3);
        assert_eq!(config.recoverability.delayed_retries, 2);
        assert_eq!(
            config.recoverability.delay.to_policy(),
            DelayPolicy::Fixed(Duration::from_millis(250))
        );
        assert_eq!(config.recoverability.error_queue, "error");
        assert_eq!(config.endpoint.concurrency, 8);
    }

    #[test]
    fn routes_are_parsed_into_a_table() {
        let config = CourierConfig::from_toml_str(
            r#"
            [routing.routes]
            "billing::ChargeCard" = "billing@host-1"
            "#,
        )
        .unwrap();

        let table = config.routing.route_table().unwrap();
        assert_eq!(
            table.get("billing::ChargeCard"),
            Some(&Address::new("billing").at("host-1"))
        );
    }

    #[test]
    fn invalid_route_addresses_are_rejected() {
        let config = CourierConfig::from_toml_str(
            r#"
            [routing.routes]
            "billing::ChargeCard" = "@host-1"
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.routing.route_table(),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn malformed_documents_fail_strict_parsing() {
        assert!(matches!(
            CourierConfig::from_toml_str("[endpoint\nconcurrency = 'many'"),
            Err(ConfigError::Parse(_))
        ));
    }
}
