use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::warn;

/// Total tries for one outbound call, first attempt included.
pub const ATTEMPTS: usize = 3;

const DELAY: Duration = Duration::from_millis(250);

pub fn retry_strategy() -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(DELAY)
        .with_max_times(ATTEMPTS - 1)
}

/// Runs `op` up to [`ATTEMPTS`] times while `retryable` accepts the error.
/// Only the last error is returned.
pub async fn with_retry<T, E, F, Fut, P>(op: F, retryable: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    op.retry(retry_strategy())
        .when(retryable)
        .notify(|err: &E, dur: Duration| {
            warn!("Transient failure, retrying in {:?}: {}", dur, err);
        })
        .await
}
