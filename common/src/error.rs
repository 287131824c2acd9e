use std::{fmt, process::ExitCode};

use error_stack::{Result, ResultExt};

/// Sync error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Invalid configuration. Should not retry.
    Configuration,
    /// Failed to initialize a dependency, for example the store or the RPC
    /// provider. The run can be retried later.
    Initialization,
    /// Processing a block failed after retries.
    BlockProcessing,
    /// Persisting or reading records failed.
    Store,
    /// Fatal error. Should not retry.
    Fatal,
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl error_stack::Context for SyncError {}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Configuration => f.write_str("sync configuration error"),
            SyncError::Initialization => f.write_str("failed to initialize sync"),
            SyncError::BlockProcessing => f.write_str("failed to process block"),
            SyncError::Store => f.write_str("store error"),
            SyncError::Fatal => f.write_str("fatal sync error"),
        }
    }
}

impl<T> ReportExt for Result<T, SyncError> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.current_context() {
                    SyncError::Configuration => ExitCode::from(78),
                    SyncError::Initialization => ExitCode::from(75),
                    _ => ExitCode::FAILURE,
                }
            }
        }
    }
}

pub trait SyncErrorResultExt {
    type Ok;
    fn configuration(self, reason: &str) -> Result<Self::Ok, SyncError>;
    fn initialization(self, reason: &str) -> Result<Self::Ok, SyncError>;
}

impl<R> SyncErrorResultExt for R
where
    R: ResultExt,
{
    type Ok = R::Ok;

    fn configuration(self, reason: &str) -> Result<R::Ok, SyncError> {
        self.change_context(SyncError::Configuration)
            .attach_printable(format!("configuration error: {reason}"))
    }

    fn initialization(self, reason: &str) -> Result<R::Ok, SyncError> {
        self.change_context(SyncError::Initialization)
            .attach_printable(format!("initialization failed: {reason}"))
    }
}
