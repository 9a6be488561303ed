//! Lifecycle tests for `RetryingCaller`, on tokio's paused clock.

use super::*;
use crate::testing::{CallRecorder, FlakyOperation, RecordedEvent};
use crate::{assert_failed, assert_idle, assert_succeeded};
use std::sync::atomic::AtomicU32;
use std::time::Duration;

fn flaky_caller(
    op: &FlakyOperation<u32>,
    recorder: &CallRecorder,
    max_retries: u32,
) -> RetryingCaller<u32> {
    let op = op.clone();
    recorder
        .attach(RetryingCaller::builder(move || op.call()))
        .max_retries(max_retries)
        .base_delay(Duration::from_millis(100))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_fires_only_on_success() {
    let op = FlakyOperation::new(1, 0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    assert_eq!(caller.run().await, Ok(1));

    assert_eq!(recorder.events(), vec![RecordedEvent::Success]);
    assert_succeeded!(caller.state(), 1);
    assert_eq!(caller.state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds() {
    let op = FlakyOperation::new(9, 2);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    assert_eq!(caller.run().await, Ok(9));

    assert_eq!(op.calls(), 3);
    assert_eq!(
        recorder.retries(),
        vec![
            (1, Duration::from_millis(100)),
            (2, Duration::from_millis(200)),
        ]
    );
    assert_eq!(recorder.successes(), 1);
    assert!(recorder.errors().is_empty());
    assert_eq!(caller.state().attempt, 2);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_reports_final_error_once() {
    let op = FlakyOperation::always_failing(0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let err = caller.run().await.unwrap_err();

    match err {
        CallError::Failed(exhausted) => {
            assert_eq!(exhausted.attempts, 4);
            assert_eq!(exhausted.final_error.message(), "attempt 4 failed");
            // 100 + 200 + 400
            assert!(exhausted.total_duration >= Duration::from_millis(700));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(recorder.retries().len(), 3);
    assert_eq!(recorder.errors(), vec![ErrorInfo::new("attempt 4 failed")]);
    assert_eq!(recorder.successes(), 0);
    assert_failed!(caller.state(), "attempt 4 failed");
}

#[tokio::test(start_paused = true)]
async fn zero_retries_fails_on_first_error() {
    let op = FlakyOperation::new(1, 1);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 0);

    assert!(caller.run().await.is_err());
    assert_eq!(op.calls(), 1);
    assert!(recorder.retries().is_empty());
    assert_eq!(recorder.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_while_backing_off() {
    let op = FlakyOperation::new(5, 1);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let handle = caller.execute();
    assert!(caller.state().in_flight);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = caller.state();
    assert!(state.in_flight);
    assert!(state.result.is_none() && state.error.is_none());
    assert_eq!(state.attempt, 1);

    assert_eq!(handle.await, Ok(5));
    assert!(!caller.state().in_flight);
}

#[tokio::test(start_paused = true)]
async fn execute_joins_running_call() {
    let op = FlakyOperation::new(3, 2);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let first = caller.execute();
    let second = caller.execute();

    assert_eq!(first.await, Ok(3));
    assert_eq!(second.await, Ok(3));
    assert_eq!(op.calls(), 3);
    assert_eq!(recorder.successes(), 1);
}

#[tokio::test(start_paused = true)]
async fn execute_after_settlement_starts_fresh_call() {
    let op = FlakyOperation::new(3, 1);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    assert_eq!(caller.run().await, Ok(3));
    assert_eq!(caller.state().attempt, 1);

    assert_eq!(caller.run().await, Ok(3));
    assert_eq!(caller.state().attempt, 0);
    assert_eq!(op.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_skips_pending_backoff() {
    let op = FlakyOperation::new(8, 1);
    let caller = RetryingCaller::builder({
        let op = op.clone();
        move || op.call()
    })
    .base_delay(Duration::from_secs(60))
    .build()
    .unwrap();

    let stale = caller.execute();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(op.calls(), 1);
    assert_eq!(caller.state().attempt, 1);

    let started = Instant::now();
    let fresh = caller.retry();
    assert_eq!(caller.state().attempt, 0);
    assert_eq!(fresh.await, Ok(8));

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(op.calls(), 2);
    assert_eq!(stale.await, Err(CallError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn reset_clears_settled_state() {
    let op = FlakyOperation::always_failing(0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 1);

    assert!(caller.run().await.is_err());
    assert_failed!(caller.state());

    caller.reset();
    assert_idle!(caller.state());
    assert_eq!(caller.state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn reset_abandons_pending_retry() {
    let op = FlakyOperation::new(1, 1);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let handle = caller.execute();
    tokio::time::sleep(Duration::from_millis(1)).await;
    caller.reset();

    assert_eq!(handle.await, Err(CallError::Cancelled));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(op.calls(), 1);
    assert_idle!(caller.state());
    assert_eq!(recorder.successes(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_handle_stops_future_attempts() {
    let op = FlakyOperation::always_failing(0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let handle = caller.execute();
    tokio::time::sleep(Duration::from_millis(1)).await;
    handle.cancel();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(op.calls(), 1);
    assert!(handle.is_finished());
    assert_idle!(caller.state());
    assert!(recorder.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_after_settlement_keeps_result() {
    let op = FlakyOperation::new(4, 0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let handle = caller.execute();
    assert_eq!(handle.clone().await, Ok(4));
    handle.cancel();

    assert_succeeded!(caller.state(), 4);
}

#[tokio::test(start_paused = true)]
async fn dropping_caller_cancels_scheduled_retry() {
    let op = FlakyOperation::always_failing(0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);

    let handle = caller.execute();
    tokio::time::sleep(Duration::from_millis(1)).await;
    drop(caller);

    assert_eq!(handle.await, Err(CallError::Cancelled));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(op.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_if_settles_permanent_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let recorder = CallRecorder::new();
    let caller = recorder
        .attach(RetryingCaller::builder({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("job not found") }
            }
        }))
        .retry_if(|error| !error.message().contains("not found"))
        .build()
        .unwrap();

    let err = caller.run().await.unwrap_err();

    assert_eq!(err.error_info().map(ErrorInfo::message), Some("job not found"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(recorder.retries().is_empty());
    assert_eq!(recorder.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_operation_is_normalized() {
    let caller = RetryingCaller::<u8>::builder(|| async {
        if true {
            panic!("lost connection pool");
        }
        Ok::<_, String>(0)
    })
    .max_retries(1)
    .base_delay(Duration::from_millis(1))
    .build()
    .unwrap();

    let err = caller.run().await.unwrap_err();

    let info = err.error_info().cloned().unwrap();
    assert_eq!(info.message(), "operation panicked: lost connection pool");
    assert_failed!(caller.state(), "operation panicked: lost connection pool");
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_settlement() {
    let op = FlakyOperation::new(2, 1);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);
    let mut updates = caller.subscribe();

    let _handle = caller.execute();
    let settled = updates
        .wait_for(|state| !state.in_flight)
        .await
        .unwrap()
        .clone();

    assert_succeeded!(settled, 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_hook_settles_the_call() {
    let op = FlakyOperation::new(6, 1);
    let caller = RetryingCaller::builder({
        let op = op.clone();
        move || op.call()
    })
    .base_delay(Duration::from_millis(10))
    .on_retry(|_| panic!("hook bug"))
    .build()
    .unwrap();

    let err = caller.run().await.unwrap_err();

    assert!(matches!(err, CallError::Panicked(_)));
    assert!(!err.is_cancelled());
    assert_eq!(
        err.error_info().map(ErrorInfo::message),
        Some("hook panicked: hook bug")
    );
    assert_failed!(caller.state(), "hook panicked: hook bug");

    // The next call runs the operation again instead of joining the dead one.
    assert_eq!(caller.run().await, Ok(6));
    assert_eq!(op.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_caller_leaves_subscribers_idle() {
    let op = FlakyOperation::always_failing(0);
    let recorder = CallRecorder::new();
    let caller = flaky_caller(&op, &recorder, 3);
    let updates = caller.subscribe();

    let _handle = caller.execute();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(updates.borrow().in_flight);

    drop(caller);

    let last = updates.borrow().clone();
    assert_idle!(last);
}
