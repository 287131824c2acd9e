use std::process::ExitCode;

use clap::Parser;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tradesync_common::{ReportExt, SyncError};
use tradesync_evm::cli::Cli;
use tradesync_observability::init_opentelemetry;

#[cfg(not(windows))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<(), SyncError> {
    if !args.is_networks() {
        init_opentelemetry(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            .change_context(SyncError::Configuration)
            .attach_printable("failed to initialize opentelemetry")?;
    }

    let ct = CancellationToken::new();
    set_ctrlc_handler(ct.clone())
        .change_context(SyncError::Fatal)
        .attach_printable("failed to setup ctrl-c handler")?;

    args.run(ct).await
}

/// Connect the cancellation token to the ctrl-c and termination handler.
fn set_ctrlc_handler(ct: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        tracing::info!("received termination signal, stopping");
        ct.cancel();
    })?;

    Ok(())
}
