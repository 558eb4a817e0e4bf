use std::future::Future;

#[cfg(not(test))]
use std::time::Duration;

use crate::error::{ChatError, ChatErrorCode};

pub const DEFAULT_TRANSPORT_RETRY_COUNT: usize = 2;

/// Re-runs an idempotent request while it fails at the transport level.
/// HTTP and decoding failures are returned immediately.
pub(crate) async fn retry_transport_operation_async<T, F, Fut>(
    retries: usize,
    mut operation: F,
) -> Result<T, ChatError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut remaining_retries = retries;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) if error.code == ChatErrorCode::Transport && remaining_retries > 0 => {
                remaining_retries -= 1;
                tracing::debug!(
                    error = %error,
                    remaining_retries,
                    "transport failure; retrying request"
                );
                sleep_retry_interval_async().await;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn sleep_retry_interval_async() {
    #[cfg(not(test))]
    {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
