use std::fmt::Write;

use clap::Args;
use error_stack::Result;
use tradesync_common::{cli::NetworkArgs, network::NetworkEntry, NetworkConfig, SyncError};

/// Print the networks table.
///
/// Without any network option, print the known networks.
#[derive(Args, Debug)]
pub struct NetworksCommand {
    #[clap(flatten)]
    network: NetworkArgs,
}

impl NetworksCommand {
    pub fn run(self) -> Result<(), SyncError> {
        let table = if self.network.network.is_empty() && self.network.networks_file.is_none() {
            known_networks_table()
        } else {
            networks_table(&self.network.to_networks()?)
        };

        print!("{table}");
        Ok(())
    }
}

pub fn networks_table(networks: &[NetworkConfig]) -> String {
    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:<10} {:<14} {:<10} {:<48} RPC",
        "CHAIN ID", "NAME", "BLOCK", "SETTLEMENT API"
    );
    for network in networks {
        let _ = writeln!(
            table,
            "{:<10} {:<14} {:<10} {:<48} {}",
            network.chain_id,
            network.name,
            format!("{}ms", network.block_time.as_millis()),
            network.api_base_url.as_str(),
            network.rpc_url.as_str(),
        );
    }
    table
}

fn known_networks_table() -> String {
    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:<10} {:<14} {:<10} SETTLEMENT API",
        "CHAIN ID", "NAME", "BLOCK"
    );
    for entry in NetworkEntry::all_known() {
        let _ = writeln!(
            table,
            "{:<10} {:<14} {:<10} {}",
            entry.chain_id,
            entry.name.unwrap_or_default(),
            format!("{}ms", entry.block_time_ms.unwrap_or_default()),
            entry.api_base_url.unwrap_or_default(),
        );
    }
    table
}
