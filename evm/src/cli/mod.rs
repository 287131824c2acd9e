mod common;
mod historical;
mod networks;
mod prune;
mod realtime;
mod rpc;
mod scan;

use anstyle::{AnsiColor, Style};
use clap::{builder::Styles, Parser, Subcommand};
use error_stack::Result;
use tokio_util::sync::CancellationToken;
use tradesync_common::SyncError;

pub use self::networks::networks_table;
pub use self::rpc::RpcArgs;

use self::{
    historical::{BackfillCommand, HistoricalCommand},
    networks::NetworksCommand,
    prune::PruneCommand,
    realtime::RealtimeCommand,
    scan::ScanLogsCommand,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = cli_style())]
pub struct Cli {
    #[command(subcommand)]
    subcommand: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync the trades of the last hours of one network.
    Historical(HistoricalCommand),
    /// Sync the trades of the last hours of all networks, one after the other.
    Backfill(BackfillCommand),
    /// Sync the trades of new blocks as they are produced.
    Realtime(RealtimeCommand),
    /// Sync the trades of the last hours using settlement events.
    ScanLogs(ScanLogsCommand),
    /// Delete old trades.
    Prune(PruneCommand),
    /// Print the networks table.
    Networks(NetworksCommand),
}

impl Cli {
    pub async fn run(self, ct: CancellationToken) -> Result<(), SyncError> {
        match self.subcommand {
            Command::Historical(command) => command.run(ct).await,
            Command::Backfill(command) => command.run(ct).await,
            Command::Realtime(command) => command.run(ct).await,
            Command::ScanLogs(command) => command.run(ct).await,
            Command::Prune(command) => command.run().await,
            Command::Networks(command) => command.run(),
        }
    }

    /// Returns whether the command only prints to stdout.
    pub fn is_networks(&self) -> bool {
        matches!(self.subcommand, Command::Networks(_))
    }
}

pub fn cli_style() -> Styles {
    Styles::styled()
        .header(Style::new().bold().fg_color(Some(AnsiColor::Yellow.into())))
        .error(Style::new().bold().fg_color(Some(AnsiColor::Red.into())))
        .usage(Style::new().bold().fg_color(Some(AnsiColor::Yellow.into())))
        .literal(Style::new().fg_color(Some(AnsiColor::BrightCyan.into())))
        .placeholder(Style::new())
        .valid(Style::new().fg_color(Some(AnsiColor::BrightBlue.into())))
        .invalid(
            Style::new()
                .underline()
                .fg_color(Some(AnsiColor::Red.into())),
        )
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::Cli;

    #[test]
    fn test_cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_historical() {
        let cli = Cli::try_parse_from([
            "tradesync",
            "historical",
            "--network",
            "gnosis",
            "--rpc-url",
            "https://rpc.gnosischain.com",
            "--mongo.connection-string",
            "mongodb://localhost:27017",
            "--historical.block-cooldown",
            "30s",
        ])
        .unwrap();
        assert!(!cli.is_networks());
    }

    #[test]
    fn test_prune_requires_before_block() {
        assert!(Cli::try_parse_from([
            "tradesync",
            "prune",
            "--network",
            "mainnet",
            "--mongo.connection-string",
            "mongodb://localhost:27017",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_networks() {
        let cli = Cli::try_parse_from(["tradesync", "networks"]).unwrap();
        assert!(cli.is_networks());
    }
}
