//! Asynchronous operation coordinator
//!
//! Cloud operations are asynchronous: a create call returns while the object
//! is still `BUILD`, and the API refuses concurrent operations on the same
//! object with serialization errors. The helpers here poll until a target
//! state is reached and retry operations the classifier considers transient.
//! All sleeps observe cancellation and never run past the phase deadline.

use crate::context::Context;
use crate::error::{Classifier, Error, ErrorClass, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Pseudo-state reported when the refreshed object no longer exists
pub const DELETED: &str = "deleted";

/// Cap for exponential backoff on server-side errors
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Poll a remote object until it reaches one of `target`
#[derive(Debug, Clone)]
pub struct StateWait {
    pub what: String,
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Initial pause before the first refresh
    pub delay: Duration,
    pub poll_interval: Duration,
}

impl StateWait {
    pub fn new(what: impl Into<String>, pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            what: what.into(),
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: crate::context::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_target(&self, state: &str) -> bool {
        self.target.iter().any(|t| t == state)
    }

    fn is_pending(&self, state: &str) -> bool {
        self.pending.iter().any(|p| p == state)
    }
}

/// Retry an operation while it fails with transient errors
#[derive(Debug, Clone, Copy)]
pub struct RetrySpec {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub classifier: Classifier,
}

async fn sleep_until_deadline(ctx: &Context, pause: Duration, deadline: Instant) -> Result<()> {
    let left = deadline.saturating_duration_since(Instant::now());
    ctx.sleep(pause.min(left)).await
}

/// Poll `refresh` until the reported state is in `target`.
///
/// Returns `Some(value)` for a target state and `None` when the object
/// disappeared and [`DELETED`] is a target. Transient refresh errors are
/// ignored; any state outside `pending` and `target` aborts.
pub async fn wait_for_state<T, F, Fut>(ctx: &Context, spec: &StateWait, mut refresh: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(T, String)>>,
{
    let start = Instant::now();
    let deadline = ctx.deadline_after(spec.timeout);
    let classifier = ctx.classifier();
    let mut last_state = String::from("unknown");

    if !spec.delay.is_zero() {
        sleep_until_deadline(ctx, spec.delay, deadline).await?;
    }

    loop {
        ctx.check_cancelled()?;

        match refresh().await {
            Ok((value, state)) => {
                if spec.is_target(&state) {
                    tracing::debug!("{} reached state {}", spec.what, state);
                    return Ok(Some(value));
                }
                if !spec.is_pending(&state) {
                    return Err(Error::UnexpectedState {
                        state,
                        target: spec.target.clone(),
                    });
                }
                tracing::debug!("{} is {}, waiting for {:?}", spec.what, state, spec.target);
                last_state = state;
            }
            Err(err) => match classifier.classify(&err) {
                ErrorClass::NotFound if spec.is_target(DELETED) => {
                    tracing::debug!("{} is gone", spec.what);
                    return Ok(None);
                }
                ErrorClass::NotFound if spec.is_pending(DELETED) => {
                    last_state = DELETED.to_string();
                }
                ErrorClass::Transient => {
                    tracing::debug!("Ignoring transient error while waiting for {}: {}", spec.what, err);
                }
                _ => return Err(err),
            },
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout {
                what: spec.what.clone(),
                elapsed: now - start,
                last_state,
            });
        }
        sleep_until_deadline(ctx, spec.poll_interval, deadline).await?;
    }
}

/// Run `op` until it succeeds, fails permanently or the deadline passes.
///
/// Transients carrying a retry code sleep `poll_interval`; server-side and
/// network failures back off exponentially up to [`MAX_BACKOFF`]. When the
/// deadline passes the last error is returned.
pub async fn retry_while_transient<T, F, Fut>(ctx: &Context, spec: &RetrySpec, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = ctx.deadline_after(spec.timeout);
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt: u32 = 1;

    loop {
        ctx.check_cancelled()?;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if spec.classifier.is_transient(&err) => err,
            Err(err) => return Err(err),
        };

        if Instant::now() >= deadline {
            tracing::warn!("Giving up after {} attempt(s): {}", attempt, err);
            return Err(err);
        }

        let pause = if err.is_server_side() {
            let pause = backoff;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            pause
        } else {
            spec.poll_interval
        };

        tracing::warn!("Retrying after transient error (attempt {}): {}", attempt, err);
        sleep_until_deadline(ctx, pause, deadline).await?;
        attempt += 1;
    }
}

/// Like [`retry_while_transient`], but waits for the object to become
/// quiescent (`wait` reaching its target) before each retry.
pub async fn retry_with_wait<T, F, Fut, W, R, RFut>(
    ctx: &Context,
    spec: &RetrySpec,
    mut op: F,
    wait: &StateWait,
    mut refresh: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<(W, String)>>,
{
    let deadline = ctx.deadline_after(spec.timeout);
    let mut attempt: u32 = 1;

    loop {
        ctx.check_cancelled()?;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if spec.classifier.is_transient(&err) => err,
            Err(err) => return Err(err),
        };

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!("Giving up after {} attempt(s): {}", attempt, err);
            return Err(err);
        }

        tracing::warn!(
            "Transient error (attempt {}), waiting for {} before retrying: {}",
            attempt,
            wait.what,
            err
        );

        let quiesce = wait.clone().with_timeout(wait.timeout.min(deadline - now));
        match wait_for_state(ctx, &quiesce, &mut refresh).await {
            Ok(_) => {}
            Err(Error::Timeout { .. }) => return Err(err),
            Err(other) => return Err(other),
        }

        sleep_until_deadline(ctx, spec.poll_interval, deadline).await?;
        attempt += 1;
    }
}
