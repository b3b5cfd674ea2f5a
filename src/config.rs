use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::blockchain::{
    DEFAULT_DIFFICULTY_CALCULATION_BLOCKS, DEFAULT_TARGET_BLOCK_TIME_SECS, NONCE_SPACE,
};
use crate::miner::MinerConfig;
use crate::network::{NetworkSettings, Peer, PeerTimeouts};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

/// Chain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub difficulty_calculation_blocks: u64,
    pub target_block_time: i64,
}

/// Where the P2P listener binds and what it advertises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    pub timeouts: PeerTimeouts,
    pub broadcast_ttl: Option<Duration>,
}

impl NetworkConfig {
    pub fn settings(&self) -> NetworkSettings {
        NetworkSettings {
            timeouts: self.timeouts,
            broadcast_ttl: self.broadcast_ttl,
        }
    }
}

/// Optional read-only HTTP status API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

/// Full node configuration, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub chain: ChainConfig,
    pub network: NetworkConfig,
    pub miner: MinerConfig,
    pub api: Option<ApiConfig>,
    /// Peer to join through; `None` starts a new network from genesis.
    pub bootstrap: Option<Peer>,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let difficulty_calculation_blocks = parse_or(
            &get,
            "DIFFICULTY_CALCULATION_BLOCKS",
            DEFAULT_DIFFICULTY_CALCULATION_BLOCKS,
        )?;
        if difficulty_calculation_blocks == 0 {
            return Err(ConfigError::Zero {
                key: "DIFFICULTY_CALCULATION_BLOCKS",
            });
        }
        let chain = ChainConfig {
            difficulty_calculation_blocks,
            target_block_time: parse_or(&get, "TARGET_BLOCK_TIME", DEFAULT_TARGET_BLOCK_TIME_SECS)?,
        };

        let defaults = PeerTimeouts::default();
        let ttl_secs: u64 = parse_or(&get, "BROADCAST_TTL_SECS", 3600)?;
        let network = NetworkConfig {
            host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            timeouts: PeerTimeouts {
                connect: secs_or(&get, "CONNECT_TIMEOUT_SECS", defaults.connect)?,
                write: secs_or(&get, "WRITE_TIMEOUT_SECS", defaults.write)?,
                read: secs_or(&get, "READ_TIMEOUT_SECS", defaults.read)?,
            },
            broadcast_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        };

        let max_nonce = parse_or(&get, "MAX_NONCE", NONCE_SPACE)?;
        if max_nonce == 0 {
            return Err(ConfigError::Zero { key: "MAX_NONCE" });
        }
        let miner = MinerConfig {
            network_sync_interval: secs_or(
                &get,
                "NETWORK_SYNC_INTERVAL",
                Duration::from_secs(1),
            )?,
            max_nonce,
            block_data: get("BLOCK_DATA").unwrap_or_else(|| "data".to_string()),
        };

        let api = match get("API_PORT") {
            Some(_) => Some(ApiConfig {
                host: get("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: parse_or(&get, "API_PORT", 0)?,
            }),
            None => None,
        };

        let bootstrap = match (get("INIT_HOST"), get("INIT_PORT")) {
            (Some(host), Some(_)) => {
                let port: u16 = parse_or(&get, "INIT_PORT", 0)?;
                if port == 0 {
                    return Err(ConfigError::Zero { key: "INIT_PORT" });
                }
                Some(Peer::placeholder(host, port))
            }
            _ => None,
        };

        Ok(Self {
            chain,
            network,
            miner,
            api,
            bootstrap,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{ConfigError, NodeConfig};

    fn config(pairs: &[(&str, &str)]) -> Result<NodeConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_start_a_new_network() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.chain.difficulty_calculation_blocks, 50);
        assert_eq!(cfg.chain.target_block_time, 20);
        assert_eq!(cfg.network.host, "127.0.0.1");
        assert_eq!(cfg.network.port, 8080);
        assert_eq!(cfg.network.timeouts.connect, Duration::from_secs(30));
        assert_eq!(cfg.network.timeouts.read, Duration::from_secs(10));
        assert_eq!(cfg.network.broadcast_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.miner.network_sync_interval, Duration::from_secs(1));
        assert_eq!(cfg.miner.max_nonce, 4_294_967_296);
        assert!(cfg.api.is_none());
        assert!(cfg.bootstrap.is_none());
    }

    #[test]
    fn bootstrap_requires_host_and_port() {
        let cfg = config(&[("INIT_HOST", "10.0.0.1"), ("INIT_PORT", "9000")]).unwrap();
        let peer = cfg.bootstrap.unwrap();
        assert_eq!(peer.address(), "10.0.0.1:9000");
        assert_eq!(peer.id, "0");

        assert!(config(&[("INIT_HOST", "10.0.0.1")]).unwrap().bootstrap.is_none());
        assert!(config(&[("INIT_PORT", "9000")]).unwrap().bootstrap.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("PORT", "9100"),
            ("DIFFICULTY_CALCULATION_BLOCKS", "10"),
            ("NETWORK_SYNC_INTERVAL", "3"),
            ("BROADCAST_TTL_SECS", "0"),
            ("API_PORT", "3000"),
        ])
        .unwrap();
        assert_eq!(cfg.network.port, 9100);
        assert_eq!(cfg.chain.difficulty_calculation_blocks, 10);
        assert_eq!(cfg.miner.network_sync_interval, Duration::from_secs(3));
        assert_eq!(cfg.network.broadcast_ttl, None);
        assert_eq!(cfg.api.unwrap().port, 3000);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_eq!(
            config(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".into()
            }
        );
        assert_eq!(
            config(&[("DIFFICULTY_CALCULATION_BLOCKS", "0")]).unwrap_err(),
            ConfigError::Zero {
                key: "DIFFICULTY_CALCULATION_BLOCKS"
            }
        );
        assert!(config(&[("MAX_NONCE", "0")]).is_err());
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = config(&[("PORT", "  "), ("HOST", "")]).unwrap();
        assert_eq!(cfg.network.port, 8080);
        assert_eq!(cfg.network.host, "127.0.0.1");
    }
}
