//! Bounded waits for store and collaborator calls.
//!
//! Every external call the services make goes through [`bounded`], so a hung
//! database or identity service turns into [`ControlPlaneError::Timeout`]
//! instead of a stuck request.
use crate::error::{ControlPlaneError, ControlPlaneResult};
use std::future::Future;
use std::time::Duration;

pub async fn bounded<T, E, F>(limit: Duration, operation: &'static str, fut: F) -> ControlPlaneResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ControlPlaneError>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            tracing::warn!(operation, limit_ms = limit.as_millis() as u64, "call timed out");
            Err(ControlPlaneError::Timeout { operation })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn passes_through_completed_results() {
        let value = bounded(Duration::from_millis(50), "noop", async {
            Ok::<_, StoreError>(7)
        })
        .await
        .expect("value");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let err = bounded(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(())
        })
        .await
        .expect_err("timeout");
        assert!(matches!(err, ControlPlaneError::Timeout { operation: "slow" }));
    }
}
