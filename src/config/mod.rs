//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::rewards::Address;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Session joined when the client names none
    pub session_name: String,
    /// Required on WebSocket upgrade when set
    pub session_password: Option<String>,

    /// EVM JSON-RPC endpoint
    pub rpc_url: String,
    /// Reward contract; reward routes are disabled without it
    pub contract_address: Option<Address>,
    /// Block explorer base URL for transaction links
    pub explorer_url: String,
    pub receipt_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR when the host provides one
        let server_addr = match var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let contract_address = var("CONTRACT_ADDRESS")
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<Address>()
                    .map_err(|_| ConfigError::Invalid("CONTRACT_ADDRESS"))
            })
            .transpose()?;

        let receipt_timeout_secs = match var("RECEIPT_TIMEOUT_SECS") {
            Some(s) => s
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid("RECEIPT_TIMEOUT_SECS"))?,
            None => 120,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: var("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),

            session_name: var("SESSION_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "click-battle".to_string()),
            session_password: var("SESSION_PASSWORD").filter(|s| !s.is_empty()),

            rpc_url: var("RPC_URL").unwrap_or_else(|| "https://testnet-rpc.monad.xyz".to_string()),
            contract_address,
            explorer_url: var("EXPLORER_URL")
                .unwrap_or_else(|| "https://testnet.monadexplorer.com".to_string()),
            receipt_timeout: Duration::from_secs(receipt_timeout_secs),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.session_name, "click-battle");
        assert!(config.session_password.is_none());
        assert!(config.contract_address.is_none());
        assert_eq!(config.receipt_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_port_overrides_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:7000")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn test_contract_address_is_validated() {
        let config = load(&[(
            "CONTRACT_ADDRESS",
            "0x00000000000000000000000000000000000000aa",
        )])
        .unwrap();
        assert!(config.contract_address.is_some());

        assert!(matches!(
            load(&[("CONTRACT_ADDRESS", "0xnope")]),
            Err(ConfigError::Invalid("CONTRACT_ADDRESS"))
        ));
    }

    #[test]
    fn test_bad_address_is_rejected() {
        assert!(matches!(
            load(&[("SERVER_ADDR", "not-an-addr")]),
            Err(ConfigError::InvalidAddress)
        ));
    }
}
