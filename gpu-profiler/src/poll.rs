//! Bounded polling with exponential backoff

use std::time::Duration;
use tracing::debug;

/// Longest wait between two polls
pub const MAX_POLL_DELAY: Duration = Duration::from_millis(50);

/// Poll until `f` yields a value, an error, or attempts run out.
///
/// Returns `Ok(Some(_))` on the first ready value, `Ok(None)` when every
/// attempt came back empty, and the first `Err` immediately.
/// Delays: `initial_delay`, `2 * initial_delay`, ... capped at [`MAX_POLL_DELAY`].
pub fn poll_with_backoff<F, T, E>(
    operation_name: &str,
    max_attempts: u32,
    initial_delay: Duration,
    mut f: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    let mut delay = initial_delay.min(MAX_POLL_DELAY);

    for attempt in 1..=max_attempts {
        if let Some(value) = f()? {
            return Ok(Some(value));
        }
        debug!("{} not ready (attempt {}/{})", operation_name, attempt, max_attempts);
        if attempt < max_attempts && !delay.is_zero() {
            std::thread::sleep(delay);
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    }

    Ok(None)
}
