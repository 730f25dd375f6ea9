//! Server configuration: built-in defaults, overridable by an optional TOML file and
//! then by CLI flags, in that priority order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::MODBUS_PORT;
use crate::error::ServerError;

/// Parameters a [`crate::server::ModbusTcpServer`] is constructed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub ipv6: bool,
    pub blocking: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host().to_string(),
            port: MODBUS_PORT,
            unit_id: 1,
            ipv6: false,
            blocking: true,
        }
    }
}

fn default_host() -> &'static str {
    "0.0.0.0"
}

impl ServerConfig {
    /// Loads a config file, then layers the given overrides on top. Any field left at
    /// its file value when the override equals `None` keeps that file value; fields
    /// absent from the file keep the built-in default.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ServerError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(ServerError::Io)?;
                toml::from_str(&text)
                    .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?
            }
            None => Self::default(),
        };
        overrides.apply(&mut config);
        Ok(config)
    }

    /// Socket address this config resolves to, e.g. `"0.0.0.0:502"` or `"[::]:502"`.
    ///
    /// `ipv6` is the family actually bound: an explicit IPv6 literal in `host` is
    /// always respected, and the IPv4-any default host (`"0.0.0.0"`) is swapped for
    /// the IPv6-any address (`"::"`) when `ipv6` is set and `host` was left at that
    /// default, so `--ipv6` with no `--host` override binds an IPv6 socket rather
    /// than silently resolving back to IPv4.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        if self.host.starts_with('[') {
            return format!("{}:{}", self.host, self.port);
        }
        if self.ipv6 && self.host.contains(':') {
            return format!("[{}]:{}", self.host, self.port);
        }
        if self.ipv6 && self.host == default_host() {
            return format!("[::]:{}", self.port);
        }
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI-sourced overrides, applied after the config file. `None` means "not given on
/// the command line" and leaves the underlying value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub unit_id: Option<u8>,
    pub ipv6: Option<bool>,
}

impl ConfigOverrides {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(unit_id) = self.unit_id {
            config.unit_id = unit_id;
        }
        if let Some(ipv6) = self.ipv6 {
            config.ipv6 = ipv6;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_listens_on_the_modbus_port() {
        let config = ServerConfig::default();
        assert_eq!(config.port, MODBUS_PORT);
        assert_eq!(config.socket_addr(), "0.0.0.0:502");
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = ServerConfig::default();
        let overrides = ConfigOverrides {
            port: Some(1502),
            ..Default::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.port, 1502);
        assert_eq!(config.host, default_host());
    }

    #[test]
    fn ipv6_flag_with_default_host_binds_the_ipv6_any_address() {
        let config = ServerConfig {
            ipv6: true,
            ..ServerConfig::default()
        };
        assert_eq!(config.socket_addr(), "[::]:502");
    }

    #[test]
    fn ipv6_literal_host_is_bracketed_regardless_of_the_flag() {
        let config = ServerConfig {
            host: "::1".into(),
            ipv6: true,
            ..ServerConfig::default()
        };
        assert_eq!(config.socket_addr(), "[::1]:502");
    }

    #[test]
    fn explicit_ipv4_host_is_left_alone_even_with_ipv6_set() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            ipv6: true,
            ..ServerConfig::default()
        };
        assert_eq!(config.socket_addr(), "127.0.0.1:502");
    }

    #[test]
    fn toml_round_trips_through_serde() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 1502,
            unit_id: 3,
            ipv6: false,
            blocking: false,
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
