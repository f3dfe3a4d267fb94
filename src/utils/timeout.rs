//! Timeout helpers and default durations.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default bound for a single transport operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between `?,,` liveness probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// How long a tagged request may wait for its reply.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// How often outstanding requests are checked against the response timeout.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Await `fut`, mapping an elapsed deadline to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> =
            with_timeout_error(async { Err(ProtocolError::TransportClosed) }, DEFAULT_TIMEOUT)
                .await;
        assert!(matches!(result, Err(ProtocolError::TransportClosed)));
    }
}
