//! Waiter and retry behaviour under paused time

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;
use tfotc::config::ProviderConfig;
use tfotc::context::{CancelToken, Context};
use tfotc::error::{ApiError, Classifier, Error};
use tfotc::otc::ClientFactory;
use tfotc::waiter::{retry_while_transient, retry_with_wait, wait_for_state, StateWait};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

const BUSY: &[&str] = &["DBS.200019"];

fn context(cancel: CancelToken) -> Context {
    let factory = ClientFactory::new(ProviderConfig::default()).unwrap();
    Context::new(Arc::new(factory))
        .with_cancel(cancel)
        .with_poll_interval(Duration::from_secs(10))
        .scoped(Classifier::new(BUSY), Duration::from_secs(600))
}

fn busy() -> Error {
    Error::Api(ApiError::from_response(
        "POST",
        "https://rds/instances/i-1/action",
        400,
        r#"{"error_code": "DBS.200019", "error_msg": "busy"}"#,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_retry_code_waits_poll_interval() {
    let ctx = context(CancelToken::new());
    let calls = Cell::new(0);
    let start = Instant::now();

    let value = assert_ok!(
        retry_while_transient(&ctx, &ctx.retry(), || {
            let n = calls.get();
            calls.set(n + 1);
            async move { if n < 2 { Err(busy()) } else { Ok("done") } }
        })
        .await
    );

    assert_eq!(value, "done");
    assert_eq!(calls.get(), 3);
    assert!(start.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_retry_returns_last_error_at_deadline() {
    let ctx = context(CancelToken::new());
    let mut spec = ctx.retry();
    spec.timeout = Duration::from_secs(35);

    let err = assert_err!(retry_while_transient(&ctx, &spec, || async { Err::<(), _>(busy()) }).await);
    assert_eq!(err.api().and_then(|a| a.code.as_deref()), Some("DBS.200019"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_wait_quiesces_between_attempts() {
    let ctx = context(CancelToken::new());
    let attempts = Cell::new(0);
    let polls = Cell::new(0);
    let quiesce = ctx.state_wait("instance i-1", &["MODIFYING"], &["ACTIVE"]);

    assert_ok!(
        retry_with_wait(
            &ctx,
            &ctx.retry(),
            || {
                let n = attempts.get();
                attempts.set(n + 1);
                async move { if n == 0 { Err(busy()) } else { Ok(()) } }
            },
            &quiesce,
            || {
                let n = polls.get();
                polls.set(n + 1);
                let state = if n == 0 { "MODIFYING" } else { "ACTIVE" };
                async move { Ok(((), state.to_string())) }
            },
        )
        .await
    );

    assert_eq!(attempts.get(), 2);
    assert_eq!(polls.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_with_wait_stops_on_failed_object() {
    let ctx = context(CancelToken::new());
    let quiesce = ctx.state_wait("instance i-1", &["MODIFYING"], &["ACTIVE"]);

    let err = assert_err!(
        retry_with_wait(
            &ctx,
            &ctx.retry(),
            || async { Err::<(), _>(busy()) },
            &quiesce,
            || async { Ok(((), "FAILED".to_string())) },
        )
        .await
    );
    assert!(matches!(err, Error::UnexpectedState { ref state, .. } if state == "FAILED"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_wait() {
    let cancel = CancelToken::new();
    let ctx = context(cancel.clone());
    let spec = StateWait::new("instance i-1", &["BUILD"], &["ACTIVE"], Duration::from_secs(3600))
        .with_poll_interval(Duration::from_secs(10));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
    });

    let start = Instant::now();
    let err = assert_err!(wait_for_state(&ctx, &spec, || async { Ok(((), "BUILD".to_string())) }).await);
    assert!(matches!(err, Error::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_wait_honours_initial_delay() {
    let ctx = context(CancelToken::new());
    let spec = ctx
        .state_wait("instance i-1", &["MODIFYING"], &["ACTIVE"])
        .with_delay(Duration::from_secs(30));

    let start = Instant::now();
    let value = assert_ok!(wait_for_state(&ctx, &spec, || async { Ok((7, "ACTIVE".to_string())) }).await);
    assert_eq!(value, Some(7));
    assert!(start.elapsed() >= Duration::from_secs(30));
}
