//! Bounded latency for reconstruction attempts.
//!
//! The pipeline itself is blocking and has no deadline: a target that stays
//! frozen after attach blocks the read indefinitely. These helpers run the
//! whole attempt on tokio's blocking pool and stop waiting after a deadline.
//! Abandoning the wait does not abandon the thread, so an attach guard alive
//! on it still detaches once the read returns.

use std::future::Future;
use std::time::Duration;

use nix::unistd::Pid;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::error::{ProcImageError, Result};
use crate::image::{ImageReconstructor, ReconstructedImage};
use crate::memory::Tracer;

/// Default timeout duration in seconds
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300; // 5 minutes

/// Deadline for one operation
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Maximum duration for the operation
    pub duration: Duration,
    /// Whether to log an error when the deadline passes
    pub log_warnings: bool,
    /// Operation name for logging
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(seconds: u64, operation: impl Into<String>) -> Self {
        Self {
            duration: Duration::from_secs(seconds),
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    pub fn from_duration(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            duration,
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    /// Default timeout configuration (5 minutes)
    pub fn default_timeout(operation: impl Into<String>) -> Self {
        Self::new(DEFAULT_TIMEOUT_SECONDS, operation)
    }
}

/// Execute an async operation with a timeout
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        operation = %config.operation_name,
        seconds = config.duration.as_secs_f64(),
        "Starting operation with deadline"
    );

    match timeout(config.duration, future).await {
        Ok(result) => {
            debug!(operation = %config.operation_name, "Operation finished before deadline");
            result
        }
        Err(_) => {
            if config.log_warnings {
                error!(
                    operation = %config.operation_name,
                    seconds = config.duration.as_secs_f64(),
                    "Operation timed out"
                );
            }
            Err(ProcImageError::Timeout {
                seconds: config.duration.as_secs(),
            })
        }
    }
}

/// Run a blocking closure on the blocking pool under `config`'s deadline.
pub async fn blocking_with_timeout<T, F>(config: TimeoutConfig, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    with_timeout(config, async move {
        handle
            .await
            .map_err(|e| ProcImageError::Io(std::io::Error::other(e)))?
    })
    .await
}

/// Reconstruct `pid`, giving up after `seconds`.
///
/// On expiry the caller gets [`ProcImageError::Timeout`] wrapped for `pid`.
pub async fn reconstruct_with_timeout<T>(
    reconstructor: ImageReconstructor<T>,
    pid: Pid,
    seconds: u64,
) -> Result<ReconstructedImage>
where
    T: Tracer + Send + Sync + 'static,
{
    let config = TimeoutConfig::new(seconds, format!("reconstruct pid {}", pid));
    blocking_with_timeout(config, move || reconstructor.reconstruct(pid))
        .await
        .map_err(|e| e.for_pid(pid.as_raw()))
}
