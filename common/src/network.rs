//! Network configuration.
//!
//! Networks are defined by an explicit table: the built-in known deployments,
//! optionally extended or overridden by a JSON file. Every entry is validated
//! before any sync starts.
use std::{collections::HashSet, fmt, path::Path, str::FromStr, time::Duration};

use alloy_primitives::Address;
use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use url::Url;

/// Address of the settlement contract, the same on every supported chain.
pub const SETTLEMENT_CONTRACT: &str = "0x9008D19f58AAbD9eD0D60971565AA8510560ab41";

/// Immutable configuration of one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub settlement_contract: Address,
    pub api_base_url: Url,
    pub rpc_url: Url,
    /// Average block time, used to estimate how many blocks cover a time window.
    pub block_time: Duration,
}

/// A network entry as written in the networks file.
///
/// Fields left out are taken from the known network with the same chain id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkEntry {
    pub chain_id: u64,
    pub name: Option<String>,
    pub settlement_contract: Option<String>,
    pub api_base_url: Option<String>,
    pub rpc_url: Option<String>,
    pub block_time_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct NetworksFile {
    networks: Vec<NetworkEntry>,
}

#[derive(Debug)]
pub struct NetworkConfigError;
impl error_stack::Context for NetworkConfigError {}

impl fmt::Display for NetworkConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid network configuration")
    }
}

struct KnownNetwork {
    chain_id: u64,
    name: &'static str,
    api_base_url: &'static str,
    block_time_ms: u64,
}

const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        chain_id: 1,
        name: "mainnet",
        api_base_url: "https://api.cow.fi/mainnet/api/v1",
        block_time_ms: 12_000,
    },
    KnownNetwork {
        chain_id: 100,
        name: "gnosis",
        api_base_url: "https://api.cow.fi/xdai/api/v1",
        block_time_ms: 5_000,
    },
    KnownNetwork {
        chain_id: 42161,
        name: "arbitrum-one",
        api_base_url: "https://api.cow.fi/arbitrum_one/api/v1",
        block_time_ms: 250,
    },
    KnownNetwork {
        chain_id: 8453,
        name: "base",
        api_base_url: "https://api.cow.fi/base/api/v1",
        block_time_ms: 2_000,
    },
    KnownNetwork {
        chain_id: 11155111,
        name: "sepolia",
        api_base_url: "https://api.cow.fi/sepolia/api/v1",
        block_time_ms: 12_000,
    },
];

impl NetworkConfig {
    /// Number of blocks expected to be produced in `window`.
    pub fn blocks_in_window(&self, window: Duration) -> u64 {
        let block_time = self.block_time.as_millis().max(1);
        (window.as_millis() / block_time) as u64
    }
}

impl NetworkEntry {
    /// Returns the entry of a known network, without RPC url.
    pub fn known(name_or_chain_id: &str) -> Option<Self> {
        let chain_id = u64::from_str(name_or_chain_id).ok();
        KNOWN_NETWORKS
            .iter()
            .find(|known| Some(known.chain_id) == chain_id || known.name == name_or_chain_id)
            .map(|known| NetworkEntry {
                chain_id: known.chain_id,
                ..NetworkEntry::default()
            })
    }

    /// Returns the known networks with all their defaults filled in.
    pub fn all_known() -> Vec<Self> {
        KNOWN_NETWORKS
            .iter()
            .map(|known| NetworkEntry {
                chain_id: known.chain_id,
                name: Some(known.name.to_string()),
                settlement_contract: Some(SETTLEMENT_CONTRACT.to_string()),
                api_base_url: Some(known.api_base_url.to_string()),
                rpc_url: None,
                block_time_ms: Some(known.block_time_ms),
            })
            .collect()
    }

    /// Validate the entry and fill missing fields from the known networks table.
    pub fn into_network_config(self) -> Result<NetworkConfig, NetworkConfigError> {
        let known = KNOWN_NETWORKS.iter().find(|n| n.chain_id == self.chain_id);
        let chain_id = self.chain_id;

        let name = self
            .name
            .or_else(|| known.map(|n| n.name.to_string()))
            .filter(|name| !name.trim().is_empty())
            .ok_or(NetworkConfigError)
            .attach_printable("missing network name")
            .attach_printable_lazy(|| format!("chain id: {chain_id}"))?;

        let settlement_contract = self
            .settlement_contract
            .as_deref()
            .unwrap_or(SETTLEMENT_CONTRACT)
            .parse::<Address>()
            .change_context(NetworkConfigError)
            .attach_printable("invalid settlement contract address")
            .attach_printable_lazy(|| format!("network: {name}"))?;

        let api_base_url = self
            .api_base_url
            .as_deref()
            .or_else(|| known.map(|n| n.api_base_url))
            .ok_or(NetworkConfigError)
            .attach_printable("missing settlement api url")
            .attach_printable_lazy(|| format!("network: {name}"))?;
        let api_base_url = parse_http_url(api_base_url)
            .attach_printable("invalid settlement api url")
            .attach_printable_lazy(|| format!("network: {name}"))?;

        let rpc_url = self
            .rpc_url
            .as_deref()
            .ok_or(NetworkConfigError)
            .attach_printable("missing rpc url")
            .attach_printable_lazy(|| format!("network: {name}"))?;
        let rpc_url = parse_http_url(rpc_url)
            .attach_printable("invalid rpc url")
            .attach_printable_lazy(|| format!("network: {name}"))?;

        let block_time_ms = self
            .block_time_ms
            .or_else(|| known.map(|n| n.block_time_ms))
            .unwrap_or(12_000);
        if block_time_ms == 0 {
            return Err(NetworkConfigError)
                .attach_printable("block time must be greater than zero")
                .attach_printable_lazy(|| format!("network: {name}"));
        }

        Ok(NetworkConfig {
            chain_id,
            name,
            settlement_contract,
            api_base_url,
            rpc_url,
            block_time: Duration::from_millis(block_time_ms),
        })
    }
}

/// Read network entries from a JSON file.
///
/// ```json
/// { "networks": [{ "chainId": 1, "rpcUrl": "https://eth.example.org" }] }
/// ```
pub fn read_networks_file(path: &Path) -> Result<Vec<NetworkEntry>, NetworkConfigError> {
    let content = std::fs::read_to_string(path)
        .change_context(NetworkConfigError)
        .attach_printable("failed to read networks file")
        .attach_printable_lazy(|| format!("path: {}", path.display()))?;

    let file: NetworksFile = serde_json::from_str(&content)
        .change_context(NetworkConfigError)
        .attach_printable("failed to parse networks file")
        .attach_printable_lazy(|| format!("path: {}", path.display()))?;

    Ok(file.networks)
}

/// Validate all entries. Chain ids and names must be unique.
pub fn validate_networks(
    entries: Vec<NetworkEntry>,
) -> Result<Vec<NetworkConfig>, NetworkConfigError> {
    if entries.is_empty() {
        return Err(NetworkConfigError).attach_printable("no network configured");
    }

    let mut chain_ids = HashSet::new();
    let mut names = HashSet::new();
    let mut networks = Vec::with_capacity(entries.len());

    for entry in entries {
        let network = entry.into_network_config()?;

        if !chain_ids.insert(network.chain_id) {
            return Err(NetworkConfigError)
                .attach_printable("duplicate chain id")
                .attach_printable_lazy(|| format!("chain id: {}", network.chain_id));
        }

        if !names.insert(network.name.clone()) {
            return Err(NetworkConfigError)
                .attach_printable("duplicate network name")
                .attach_printable_lazy(|| format!("network: {}", network.name));
        }

        networks.push(network);
    }

    Ok(networks)
}

fn parse_http_url(url: &str) -> Result<Url, NetworkConfigError> {
    let parsed = Url::parse(url)
        .change_context(NetworkConfigError)
        .attach_printable_lazy(|| format!("url: {url}"))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(NetworkConfigError)
            .attach_printable(format!("unsupported url scheme: {scheme}")),
    }
}

impl fmt::Display for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chain id {})", self.name, self.chain_id)
    }
}

#[cfg(test)]
impl NetworkConfig {
    pub(crate) fn test(name: &str, chain_id: u64) -> Self {
        NetworkConfig {
            chain_id,
            name: name.to_string(),
            settlement_contract: SETTLEMENT_CONTRACT.parse().unwrap(),
            api_base_url: Url::parse("http://localhost:8080/api/v1").unwrap(),
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
            block_time: Duration::from_secs(12),
        }
    }
}
