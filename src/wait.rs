//! Bounded, fixed-interval polling.
//!
//! All waits share [`poll_until`]: check, and if the condition is not met,
//! sleep one interval and check again until the timeout has elapsed. A zero
//! timeout checks exactly once and returns without sleeping. Time is measured
//! with `tokio::time`, so tests drive it with a paused clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, trace, warn};

use crate::client::ApplyClient;
use crate::error::ProviderError;
use crate::jsonpath::JsonPath;
use crate::types::{GroupVersionResource, ResourceIdentity, WaitForUpsert, WaitSpec};

/// Floor applied to poll intervals so a zero interval cannot spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition was observed to hold.
    Satisfied {
        /// Number of checks performed.
        attempts: u32,
    },
    /// The timeout was zero and the single check did not satisfy the condition.
    NotMet,
}

impl WaitOutcome {
    /// Whether the condition was observed to hold.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }
}

/// Run `check` until it returns `Ok(true)` or `spec`'s timeout elapses.
///
/// Errors from `check` end the wait immediately. The final check happens at
/// the deadline; if it fails, a [`ProviderError::DeadlineExceeded`] naming
/// `what` is returned.
pub async fn poll_until<F, Fut>(
    spec: &WaitSpec,
    what: &str,
    mut check: F,
) -> Result<WaitOutcome, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ProviderError>>,
{
    let timeout = spec.timeout();
    let interval = spec.poll_interval().max(MIN_POLL_INTERVAL);
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if check().await? {
            return Ok(WaitOutcome::Satisfied { attempts });
        }
        if timeout.is_zero() {
            return Ok(WaitOutcome::NotMet);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProviderError::DeadlineExceeded(format!(
                "{} did not complete within {}s ({} checks)",
                what, spec.timeout_seconds, attempts
            )));
        }

        trace!(what, attempts, "Condition not met, polling again");
        sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Wait until `get` reports the object absent.
///
/// With a zero timeout the object is checked once and `Ok` is returned
/// whether or not it still exists.
#[instrument(skip_all, fields(gvr = %gvr, id = %identity, timeout = spec.timeout_seconds))]
pub async fn wait_for_absence(
    client: &dyn ApplyClient,
    gvr: &GroupVersionResource,
    identity: &ResourceIdentity,
    spec: &WaitSpec,
) -> Result<WaitOutcome, ProviderError> {
    let what = format!("deletion of {}", identity);
    let outcome = poll_until(spec, &what, || async move {
        match client.get(gvr, identity).await {
            Ok(_) => Ok(false),
            Err(err) if err.is_not_found() => Ok(true),
            Err(err) => Err(err),
        }
    })
    .await?;

    match outcome {
        WaitOutcome::Satisfied { attempts } => debug!(attempts, "Object is gone"),
        WaitOutcome::NotMet => debug!("Object still present, not waiting"),
    }
    Ok(outcome)
}

/// Wait until every condition holds on the observed object, one after another.
#[instrument(skip_all, fields(gvr = %gvr, id = %identity, conditions = conditions.len()))]
pub async fn wait_for_upsert(
    client: &dyn ApplyClient,
    gvr: &GroupVersionResource,
    identity: &ResourceIdentity,
    conditions: &[WaitForUpsert],
) -> Result<(), ProviderError> {
    for condition in conditions {
        let path: JsonPath = condition.jsonpath.parse()?;
        let what = format!(
            "{} reaching {}={:?}",
            identity, condition.jsonpath, condition.value
        );
        let path = &path;
        let expected = condition.value.as_str();

        let outcome = poll_until(&condition.wait_spec(), &what, || async move {
            let observed = client.get(gvr, identity).await?;
            Ok(path.matches(&observed, expected))
        })
        .await?;

        match outcome {
            WaitOutcome::Satisfied { attempts } => {
                info!(jsonpath = %path, attempts, "Upsert condition met")
            },
            WaitOutcome::NotMet => {
                warn!(jsonpath = %path, "Upsert condition not met and timeout is zero")
            },
        }
    }
    Ok(())
}
