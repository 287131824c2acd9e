use std::{path::PathBuf, time::Duration};

use clap::Args;
use error_stack::{Result, ResultExt};

use crate::{
    backoff::{Backoff, BackoffOptions},
    error::SyncError,
    historical::HistoricalOptions,
    log_scan::LogScanOptions,
    network::{read_networks_file, validate_networks, NetworkConfig, NetworkEntry},
    realtime::RealtimeOptions,
};

#[derive(Args, Clone, Debug)]
pub struct NetworkArgs {
    /// The networks to sync, by name or chain id.
    #[arg(
        long = "network",
        env = "TRADESYNC_NETWORK",
        value_delimiter = ',',
        num_args = 1..,
    )]
    pub network: Vec<String>,
    /// The JSON-RPC endpoints, one for each network and in the same order.
    #[arg(
        long = "rpc-url",
        env = "TRADESYNC_RPC_URL",
        value_delimiter = ',',
        num_args = 1..,
    )]
    pub rpc_url: Vec<String>,
    /// Override the settlement API url. Only with a single network.
    #[arg(long = "api-url", env = "TRADESYNC_API_URL")]
    pub api_url: Option<String>,
    /// Load the networks table from this JSON file.
    #[arg(long = "networks-file", env = "TRADESYNC_NETWORKS_FILE")]
    pub networks_file: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct BackoffArgs {
    /// How many times to retry a failed request.
    #[arg(
        long = "backoff.max-retries",
        env = "TRADESYNC_BACKOFF_MAX_RETRIES",
        default_value = "5"
    )]
    pub backoff_max_retries: u32,
    /// Delay before the first retry, for example "2s" or "500ms".
    #[arg(
        long = "backoff.base-delay",
        env = "TRADESYNC_BACKOFF_BASE_DELAY",
        default_value = "2s"
    )]
    pub backoff_base_delay: String,
    /// Maximum delay between two retries.
    #[arg(
        long = "backoff.max-delay",
        env = "TRADESYNC_BACKOFF_MAX_DELAY",
        default_value = "60s"
    )]
    pub backoff_max_delay: String,
    /// Factor applied to the delay after each retry.
    #[arg(
        long = "backoff.multiplier",
        env = "TRADESYNC_BACKOFF_MULTIPLIER",
        default_value = "2"
    )]
    pub backoff_multiplier: u32,
}

#[derive(Args, Clone, Debug)]
pub struct HistoricalArgs {
    /// How far back in time to sync, for example "24h".
    #[arg(
        long = "historical.lookback",
        env = "TRADESYNC_HISTORICAL_LOOKBACK",
        default_value = "24h"
    )]
    pub historical_lookback: String,
    /// Pause between two blocks, to stay within the provider rate limits.
    #[arg(
        long = "historical.block-cooldown",
        env = "TRADESYNC_HISTORICAL_BLOCK_COOLDOWN",
        default_value = "10m"
    )]
    pub historical_block_cooldown: String,
    /// Random delay added to each retry, at most this long.
    #[arg(
        long = "historical.jitter",
        env = "TRADESYNC_HISTORICAL_JITTER",
        default_value = "1s"
    )]
    pub historical_jitter: String,
    /// How often to log the progress.
    #[arg(
        long = "historical.report-interval",
        env = "TRADESYNC_HISTORICAL_REPORT_INTERVAL",
        default_value = "30s"
    )]
    pub historical_report_interval: String,
}

#[derive(Args, Clone, Debug)]
pub struct RealtimeArgs {
    /// How often to check for new blocks.
    #[arg(
        long = "realtime.poll-interval",
        env = "TRADESYNC_REALTIME_POLL_INTERVAL",
        default_value = "15s"
    )]
    pub realtime_poll_interval: String,
    /// Pause between two blocks of the same batch.
    #[arg(
        long = "realtime.block-cooldown",
        env = "TRADESYNC_REALTIME_BLOCK_COOLDOWN",
        default_value = "1s"
    )]
    pub realtime_block_cooldown: String,
    /// Start from this block instead of the current head.
    #[arg(long = "realtime.starting-block", env = "TRADESYNC_REALTIME_STARTING_BLOCK")]
    pub realtime_starting_block: Option<u64>,
    /// How often to log the progress.
    #[arg(
        long = "realtime.report-interval",
        env = "TRADESYNC_REALTIME_REPORT_INTERVAL",
        default_value = "30s"
    )]
    pub realtime_report_interval: String,
}

#[derive(Args, Clone, Debug)]
pub struct LogScanArgs {
    /// How far back in time to scan.
    #[arg(
        long = "scan.lookback",
        env = "TRADESYNC_SCAN_LOOKBACK",
        default_value = "24h"
    )]
    pub scan_lookback: String,
    /// Number of blocks requested at once.
    #[arg(
        long = "scan.chunk-size",
        env = "TRADESYNC_SCAN_CHUNK_SIZE",
        default_value = "2000"
    )]
    pub scan_chunk_size: u64,
    /// Ranges refused by the provider are split down to this size.
    #[arg(
        long = "scan.min-chunk-size",
        env = "TRADESYNC_SCAN_MIN_CHUNK_SIZE",
        default_value = "10"
    )]
    pub scan_min_chunk_size: u64,
    /// Pause between two ranges.
    #[arg(
        long = "scan.range-cooldown",
        env = "TRADESYNC_SCAN_RANGE_COOLDOWN",
        default_value = "1s"
    )]
    pub scan_range_cooldown: String,
    /// How often to log the progress.
    #[arg(
        long = "scan.report-interval",
        env = "TRADESYNC_SCAN_REPORT_INTERVAL",
        default_value = "30s"
    )]
    pub scan_report_interval: String,
}

impl NetworkArgs {
    /// Returns the validated configuration of the selected networks.
    ///
    /// Without `--network`, all networks of the networks file are selected.
    pub fn to_networks(&self) -> Result<Vec<NetworkConfig>, SyncError> {
        let file_entries = match &self.networks_file {
            Some(path) => read_networks_file(path).change_context(SyncError::Configuration)?,
            None => Vec::new(),
        };

        if !self.rpc_url.is_empty() && self.rpc_url.len() != self.network.len() {
            return Err(SyncError::Configuration)
                .attach_printable("expected one rpc url for each network")
                .attach_printable(format!(
                    "networks: {}, rpc urls: {}",
                    self.network.len(),
                    self.rpc_url.len()
                ));
        }

        let mut entries = if self.network.is_empty() {
            file_entries
        } else {
            self.network
                .iter()
                .map(|selector| select_entry(&file_entries, selector))
                .collect::<Result<Vec<_>, _>>()?
        };

        for (entry, rpc_url) in entries.iter_mut().zip(self.rpc_url.iter()) {
            entry.rpc_url = Some(rpc_url.clone());
        }

        if let Some(api_url) = &self.api_url {
            if entries.len() != 1 {
                return Err(SyncError::Configuration)
                    .attach_printable("--api-url requires exactly one network");
            }
            entries[0].api_base_url = Some(api_url.clone());
        }

        validate_networks(entries).change_context(SyncError::Configuration)
    }

    /// Returns the configuration of the only selected network.
    pub fn to_network(&self) -> Result<NetworkConfig, SyncError> {
        let mut networks = self.to_networks()?;
        if networks.len() != 1 {
            return Err(SyncError::Configuration)
                .attach_printable("expected exactly one network")
                .attach_printable(format!("networks: {}", networks.len()));
        }
        Ok(networks.remove(0))
    }
}

fn select_entry(entries: &[NetworkEntry], selector: &str) -> Result<NetworkEntry, SyncError> {
    let known = NetworkEntry::known(selector);
    let chain_id = selector
        .parse::<u64>()
        .ok()
        .or(known.as_ref().map(|k| k.chain_id));

    let from_file = entries
        .iter()
        .find(|entry| Some(entry.chain_id) == chain_id || entry.name.as_deref() == Some(selector));

    from_file
        .cloned()
        .or(known)
        .ok_or(SyncError::Configuration)
        .attach_printable_lazy(|| format!("unknown network: {selector}"))
}

impl BackoffArgs {
    pub fn to_backoff(&self) -> Result<Backoff, SyncError> {
        let options = BackoffOptions {
            max_retries: self.backoff_max_retries,
            base_delay: parse_duration("backoff.base-delay", &self.backoff_base_delay)?,
            max_delay: parse_duration("backoff.max-delay", &self.backoff_max_delay)?,
            multiplier: self.backoff_multiplier,
            jitter: None,
        };

        if options.multiplier == 0 {
            return Err(SyncError::Configuration)
                .attach_printable("backoff multiplier must be greater than zero");
        }

        Ok(Backoff::new(options))
    }
}

impl HistoricalArgs {
    pub fn to_historical_options(&self) -> Result<HistoricalOptions, SyncError> {
        Ok(HistoricalOptions {
            lookback: parse_duration("historical.lookback", &self.historical_lookback)?,
            block_cooldown: parse_duration(
                "historical.block-cooldown",
                &self.historical_block_cooldown,
            )?,
            report_interval: parse_positive_duration(
                "historical.report-interval",
                &self.historical_report_interval,
            )?,
        })
    }

    pub fn jitter(&self) -> Result<Duration, SyncError> {
        parse_duration("historical.jitter", &self.historical_jitter)
    }
}

impl RealtimeArgs {
    pub fn to_realtime_options(&self) -> Result<RealtimeOptions, SyncError> {
        Ok(RealtimeOptions {
            poll_interval: parse_positive_duration(
                "realtime.poll-interval",
                &self.realtime_poll_interval,
            )?,
            block_cooldown: parse_duration(
                "realtime.block-cooldown",
                &self.realtime_block_cooldown,
            )?,
            starting_block: self.realtime_starting_block,
            report_interval: parse_positive_duration(
                "realtime.report-interval",
                &self.realtime_report_interval,
            )?,
        })
    }
}

impl LogScanArgs {
    pub fn to_log_scan_options(&self) -> Result<LogScanOptions, SyncError> {
        if self.scan_chunk_size == 0 || self.scan_min_chunk_size == 0 {
            return Err(SyncError::Configuration)
                .attach_printable("chunk sizes must be greater than zero");
        }

        if self.scan_min_chunk_size > self.scan_chunk_size {
            return Err(SyncError::Configuration)
                .attach_printable("minimum chunk size is larger than the chunk size");
        }

        Ok(LogScanOptions {
            lookback: parse_duration("scan.lookback", &self.scan_lookback)?,
            chunk_size: self.scan_chunk_size,
            min_chunk_size: self.scan_min_chunk_size,
            range_cooldown: parse_duration("scan.range-cooldown", &self.scan_range_cooldown)?,
            report_interval: parse_positive_duration(
                "scan.report-interval",
                &self.scan_report_interval,
            )?,
        })
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration, SyncError> {
    duration_str::parse_std(value).or_else(|err| {
        Err(SyncError::Configuration)
            .attach_printable(format!("failed to parse {name}"))
            .attach_printable(format!("error: {}", err))
    })
}

fn parse_positive_duration(name: &str, value: &str) -> Result<Duration, SyncError> {
    let duration = parse_duration(name, value)?;
    if duration.is_zero() {
        return Err(SyncError::Configuration).attach_printable(format!("{name} must not be zero"));
    }
    Ok(duration)
}
