//! Resilient HTTP download of the exported video.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;

/// How many downloaded bytes between progress log lines.
const PROGRESS_LOG_INTERVAL: u64 = 4 * 1024 * 1024;

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Final path of the downloaded video.
    pub path: PathBuf,
    pub bytes: u64,
    /// How many attempts it took, including the successful one.
    pub attempts_made: u32,
}

/// Retrying HTTP downloader.
///
/// Bytes stream into a hidden `.part` file that is renamed into place
/// only after the body completed and hit disk, so an interrupted run
/// never leaves a plausible-looking video behind.
pub struct Downloader {
    client: reqwest::Client,
    config: TransferConfig,
}

impl Downloader {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Download `url` into `dest_dir/file_name`, retrying transient
    /// failures with capped exponential backoff.
    pub async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_name: &str,
    ) -> Result<TransferOutcome, TransferError> {
        fs::create_dir_all(dest_dir)
            .await
            .map_err(|source| TransferError::Destination {
                path: dest_dir.to_path_buf(),
                source,
            })?;

        let dest_path = dest_dir.join(file_name);
        let part_path = dest_dir.join(format!(".{file_name}.part"));

        let max_attempts = self.config.attempts.max(1);
        let max_delay = Duration::from_millis(self.config.max_backoff_ms);
        let mut delay = Duration::from_millis(self.config.initial_backoff_ms);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(url = %url, attempt, "Starting download attempt");

            match self.attempt(url, &part_path).await {
                Ok(bytes) => {
                    if let Err(source) = fs::rename(&part_path, &dest_path).await {
                        // The partial is useless once the rename failed.
                        let _ = fs::remove_file(&part_path).await;
                        return Err(TransferError::Destination {
                            path: dest_path,
                            source,
                        });
                    }
                    if attempt > 1 {
                        info!(attempts = attempt, "Download succeeded after retry");
                    }
                    return Ok(TransferOutcome {
                        path: dest_path,
                        bytes,
                        attempts_made: attempt,
                    });
                }
                Err(cause) => {
                    // Never leave a stale partial behind.
                    let _ = fs::remove_file(&part_path).await;

                    if attempt >= max_attempts {
                        return Err(TransferError::Exhausted {
                            attempts: attempt,
                            last_cause: cause.to_string(),
                        });
                    }

                    warn!(
                        error = %cause,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Download attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f64(
                        delay.as_secs_f64() * self.config.backoff_multiplier,
                    )
                    .min(max_delay);
                }
            }
        }
    }

    /// One attempt: stream the body into the partial file and fsync it.
    async fn attempt(&self, url: &str, part_path: &Path) -> Result<u64, AttemptError> {
        let mut response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.http_timeout_secs))
            .send()
            .await
            .map_err(AttemptError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }
        let expected = response.content_length();

        let mut file = fs::File::create(part_path)
            .await
            .map_err(AttemptError::Io)?;
        let mut received: u64 = 0;
        let mut last_logged: u64 = 0;

        while let Some(chunk) = response.chunk().await.map_err(AttemptError::Http)? {
            file.write_all(&chunk).await.map_err(AttemptError::Io)?;
            received += chunk.len() as u64;
            if received - last_logged >= PROGRESS_LOG_INTERVAL {
                debug!(received, expected = ?expected, "Download progress");
                last_logged = received;
            }
        }

        file.flush().await.map_err(AttemptError::Io)?;
        file.sync_all().await.map_err(AttemptError::Io)?;

        // A present-but-empty export means the render was not really done.
        if received == 0 {
            return Err(AttemptError::Empty);
        }
        if let Some(expected) = expected {
            if received != expected {
                return Err(AttemptError::Truncated { expected, received });
            }
        }
        Ok(received)
    }
}

/// Why one attempt failed. The caller only sees the last one, stringified
/// inside [`TransferError::Exhausted`].
#[derive(Debug)]
enum AttemptError {
    Http(reqwest::Error),
    Status(reqwest::StatusCode),
    Empty,
    Truncated { expected: u64, received: u64 },
    Io(std::io::Error),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Http(e) => write!(f, "request failed: {}", e),
            AttemptError::Status(code) => write!(f, "server returned {}", code),
            AttemptError::Empty => write!(f, "server returned an empty body"),
            AttemptError::Truncated { expected, received } => {
                write!(f, "body truncated: got {} of {} bytes", received, expected)
            }
            AttemptError::Io(e) => write!(f, "write failed: {}", e),
        }
    }
}
