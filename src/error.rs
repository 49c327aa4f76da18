//! Error types for export and download operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from driving an export on the printer.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The listing had no entries to pick from.
    #[error("no timelapse entries found under {path}")]
    EmptyListing { path: String },

    /// Could not reach or converse with the controller.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The device reported the export as failed.
    #[error("export of {target} failed: {reason}")]
    Export { target: String, reason: String },

    /// The export budget elapsed without a terminal notification.
    #[error("timed out after {elapsed_secs}s waiting for export of {target}")]
    TimedOut { target: String, elapsed_secs: u64 },

    /// The device said ready but the artifact was not where it claimed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// The download itself gave up.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Errors from the retrying HTTP download.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Every attempt failed.
    #[error("download failed after {attempts} attempt(s): {last_cause}")]
    Exhausted { attempts: u32, last_cause: String },

    /// The destination could not be prepared or finalized.
    #[error("cannot write to {path}: {source}")]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from the control channel transport.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Could not open the channel.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Could not push a frame out.
    #[error("send failed: {0}")]
    Send(String),

    /// The channel died while we were listening.
    #[error("receive failed: {0}")]
    Recv(String),
}

impl From<ChannelError> for ExportError {
    fn from(err: ChannelError) -> Self {
        ExportError::Connection(err.to_string())
    }
}
