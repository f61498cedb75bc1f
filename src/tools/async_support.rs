// src/tools/async_support.rs
//! Deadlines for device calls
//!
//! Device operations can stall indefinitely (a user who never presses a
//! button). Callers bound them here and get a `ConnectionTimeout` back.

use crate::core::errors::{HardwareError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// 超时配置
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub duration: Duration,
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(duration: Duration, operation_name: impl Into<String>) -> Self {
        Self { duration, operation_name: operation_name.into() }
    }
}

/// 带超时执行异步操作
pub async fn execute_with_timeout<F, T>(future: F, config: TimeoutConfig) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(config.duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", config.operation_name, config.duration);
            Err(HardwareError::timeout(format!(
                "Operation '{}' timed out after {:?}",
                config.operation_name, config.duration
            )))
        }
    }
}

/// Like [`execute_with_timeout`] but without a deadline when `duration` is `None`.
pub async fn execute_with_optional_timeout<F, T>(
    future: F,
    duration: Option<Duration>,
    operation_name: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match duration {
        Some(duration) => {
            execute_with_timeout(future, TimeoutConfig::new(duration, operation_name)).await
        }
        None => future.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::HardwareErrorKind;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result = execute_with_timeout(
            async { Ok::<_, HardwareError>(7) },
            TimeoutConfig::new(Duration::from_millis(100), "fast"),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_connection_timeout() {
        let result: Result<()> = execute_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
            TimeoutConfig::new(Duration::from_millis(10), "sign_transaction"),
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), HardwareErrorKind::ConnectionTimeout);
        assert!(err.message().contains("sign_transaction"));
    }

    #[tokio::test]
    async fn test_inner_error_is_kept() {
        let result: Result<()> = execute_with_optional_timeout(
            async { Err(HardwareError::user_rejected("no")) },
            Some(Duration::from_secs(1)),
            "op",
        )
        .await;
        assert_eq!(result.unwrap_err().kind(), HardwareErrorKind::UserRejected);
    }
}
