// clustervault/src/utils/poll.rs
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a bounded poll. `TimedOut` means the condition was never
/// observed within the window; it does not imply the underlying operation
/// failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    TimedOut,
    Failed(String),
}

/// Polls `check` every `interval` until it reports completion, a hard error,
/// or `timeout` elapses.
///
/// `check` returns:
/// * `Ok(true)`  - condition reached, stop with `Succeeded`
/// * `Ok(false)` - keep waiting
/// * `Err(_)`    - hard failure, stop with `Failed`
pub async fn bounded_poll<F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        match check().await {
            Ok(true) => return PollOutcome::Succeeded,
            Ok(false) => {}
            Err(e) => return PollOutcome::Failed(format!("{:#}", e)),
        }

        if Instant::now() + interval > deadline {
            return PollOutcome::TimedOut;
        }
        tokio::time::sleep(interval).await;
    }
}
