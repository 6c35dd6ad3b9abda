//! Bounded execution of external work.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};

/// Run `fut` for at most `limit`. Expiry yields [`GatewayError::Timeout`]
/// and drops the future.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}

/// Like [`with_timeout`], also giving up when `cancel` fires.
pub async fn with_deadline<T, F>(limit: Duration, cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        result = with_timeout(limit, fut) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expiry_reports_the_limit() {
        let err = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(err.to_string(), "timeout after 50ms");
    }

    #[tokio::test]
    async fn inner_result_passes_through() {
        let v = with_timeout(Duration::from_secs(1), async { Ok(7) }).await.unwrap();
        assert_eq!(v, 7);
        let err = with_timeout::<(), _>(Duration::from_secs(1), async {
            Err(GatewayError::not_found("x"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let token = CancellationToken::new();
        token.cancel();
        let err = with_deadline(Duration::from_secs(10), &token, std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
    }
}
