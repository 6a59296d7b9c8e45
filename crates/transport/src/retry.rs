//! Exponential-backoff retry for opening ports.

use std::time::{Duration, SystemTime};

use crate::config::RetryConfig;
use crate::{PortError, ServiceClass};

/// Run `open`, retrying while it fails with a retryable error.
///
/// TryAgain-class failures are repeated straight away; NoService-class
/// failures sleep with exponential backoff first. Anything else is returned
/// as-is. When every attempt failed, the last error is wrapped in
/// [`PortError::RetriesExhausted`].
pub fn retry_open<T, F>(config: &RetryConfig, mut open: F) -> Result<T, PortError>
where
    F: FnMut() -> Result<T, PortError>,
{
    if config.max_attempts == 0 {
        return Err(PortError::InvalidConfig(
            "max_attempts must be >= 1".into(),
        ));
    }

    let mut attempt = 0;
    loop {
        match open() {
            Ok(val) => return Ok(val),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(PortError::RetriesExhausted {
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                if e.class() == ServiceClass::TryAgain {
                    log::debug!("open attempt {attempt} busy, retrying");
                    continue;
                }
                let delay = compute_delay(config, attempt - 1);
                log::warn!(
                    "open attempt {attempt}/{} failed: {e}; retrying in {delay:?}",
                    config.max_attempts
                );
                std::thread::sleep(delay);
            }
        }
    }
}

/// Backoff before retry number `attempt` (0-indexed).
///
/// delay = min(initial_delay * 2^attempt, max_delay), optionally jittered
/// into [delay/2, delay].
pub(crate) fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let capped = base.min(config.max_delay);

    if !config.jitter {
        return capped;
    }
    // Subsecond clock nanos are enough entropy for spreading reconnects.
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let half = capped / 2;
    let range = capped.as_nanos().saturating_sub(half.as_nanos());
    if range == 0 {
        return capped;
    }
    let offset = u128::from(nanos) % range;
    half + Duration::from_nanos(offset as u64)
}
