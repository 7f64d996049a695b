use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Barrier, oneshot};
use tripswitch::{
    CircuitBreaker, CircuitError, CircuitState, Config, FallbackContext, ManualClock,
    SlidingWindow,
};

fn breaker(permitted: usize) -> (Arc<CircuitBreaker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let breaker = CircuitBreaker::builder("recommendations")
        .config(Config {
            sliding_window: SlidingWindow::Count(10),
            minimum_number_of_calls: 4,
            failure_rate_threshold: 50.0,
            wait_duration_in_open_state: Duration::from_secs(10),
            permitted_calls_in_half_open_state: permitted,
            ..Default::default()
        })
        .clock(clock.clone())
        .build()
        .expect("valid config");
    (Arc::new(breaker), clock)
}

async fn trip(breaker: &CircuitBreaker) {
    for _ in 0..4 {
        let _ = breaker
            .call_async(|| async { Err::<(), _>("connection refused") })
            .await;
    }
    assert!(breaker.is_open());
}

#[tokio::test]
async fn async_call_returns_value_and_records_success() {
    let (breaker, _clock) = breaker(2);

    let books = breaker
        .call_async(|| async { Ok::<_, String>(vec!["Spring in Action"]) })
        .await
        .expect("closed breaker runs the call");

    assert_eq!(books, vec!["Spring in Action"]);
    assert_eq!(breaker.metrics().successful_calls, 1);
}

#[tokio::test]
async fn async_fallback_recovers_rejection() {
    let (breaker, _clock) = breaker(2);
    trip(&breaker).await;

    let result = breaker
        .call_async_with_fallback(
            || async { Ok::<_, String>("live".to_string()) },
            |ctx: FallbackContext<String>| {
                assert_eq!(ctx.state, CircuitState::Open);
                Ok("Cloud Native Java".to_string())
            },
        )
        .await;

    assert_eq!(result.unwrap(), "Cloud Native Java");
    assert_eq!(breaker.metrics().rejected_calls, 1);
}

#[tokio::test]
async fn async_fallback_failure_propagates() {
    let (breaker, _clock) = breaker(2);

    let result = breaker
        .call_async_with_fallback(
            || async { Err::<String, _>("upstream 503".to_string()) },
            |ctx: FallbackContext<String>| {
                let cause = ctx.into_error().unwrap_or_default();
                Err(format!("no cached copy after {}", cause))
            },
        )
        .await;

    match result {
        Err(CircuitError::Fallback(e)) => assert_eq!(e, "no cached copy after upstream 503"),
        other => panic!("Expected CircuitError::Fallback, got {:?}", other),
    }
}

#[tokio::test]
async fn timed_out_call_is_recorded_as_cancelled_failure() {
    let (breaker, _clock) = breaker(2);

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        breaker.call_async(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(())
        }),
    )
    .await;

    assert!(outcome.is_err(), "the caller gave up");
    let metrics = breaker.metrics();
    assert_eq!(metrics.failed_calls, 1);
    assert_eq!(metrics.cancelled_calls, 1);
    assert_eq!(metrics.buffered_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_trials_never_exceed_the_batch() {
    let permitted = 3;
    let (breaker, clock) = breaker(permitted);
    trip(&breaker).await;
    clock.advance(Duration::from_secs(10));

    // Trials stay in flight until released, so every admitted call is pending
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let barrier = Arc::new(Barrier::new(8));
    let mut handles = Vec::new();

    for _ in 0..8 {
        let breaker = Arc::clone(&breaker);
        let barrier = Arc::clone(&barrier);
        let mut release = release_rx.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            breaker
                .call_async(|| async move {
                    let _ = release.wait_for(|released| *released).await;
                    Ok::<_, String>(())
                })
                .await
        }));
    }

    // Give every task time to either take a slot or be rejected
    tokio::time::sleep(Duration::from_millis(100)).await;
    release_tx.send(true).expect("receivers alive");

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.expect("task completed") {
            Ok(()) => admitted += 1,
            Err(CircuitError::HalfOpenLimitReached { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(admitted, permitted);
    assert_eq!(rejected, 8 - permitted);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_outcomes_are_each_recorded_once() {
    let clock = Arc::new(ManualClock::new());
    let breaker = Arc::new(
        CircuitBreaker::builder("bulk")
            .count_window(1000)
            .minimum_calls(1000)
            .clock(clock)
            .build()
            .expect("valid config"),
    );

    let mut handles = Vec::new();
    for i in 0..200 {
        let breaker = Arc::clone(&breaker);
        handles.push(tokio::spawn(async move {
            breaker
                .call_async(|| async move {
                    tokio::task::yield_now().await;
                    if i % 4 == 0 { Err("flaky") } else { Ok(i) }
                })
                .await
        }));
    }
    for handle in handles {
        let _ = handle.await.expect("task completed");
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.buffered_calls, 200);
    assert_eq!(metrics.failed_calls, 50);
    assert_eq!(metrics.successful_calls, 150);
    assert_eq!(metrics.state, CircuitState::Closed);
}

#[tokio::test]
async fn oneshot_backed_call_completes_after_sender_fires() {
    let (breaker, _clock) = breaker(2);
    let (tx, rx) = oneshot::channel::<String>();

    let pending = {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move {
            breaker
                .call_async(|| async move { rx.await.map_err(|e| e.to_string()) })
                .await
        })
    };

    tx.send("Reactive Spring".to_string()).expect("receiver alive");
    let title = pending.await.expect("task completed").expect("call succeeded");
    assert_eq!(title, "Reactive Spring");
}
