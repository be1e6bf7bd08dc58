use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;

use attempt::{
    Attempt, AttemptContext, AttemptError, DeferQueue, Engine, ErrorMatcher, Fallbackable, Outcome,
    PolicyTable, RecordingEventSink, RecordingReporter, RecordingSleeper, Resolution,
    RetryStrategy, UnitRef, UnitRegistry,
};

/// Engine whose waits are recorded instead of slept
fn recording_engine() -> (Engine, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = Engine::new(PolicyTable::default()).with_sleeper(sleeper.clone());
    (engine, sleeper)
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

#[tokio::test]
async fn test_attempts_counted_until_success() {
    for failures in 0..4u32 {
        let (engine, _) = recording_engine();
        let calls = counter();
        let seen = Arc::clone(&calls);

        let outcome = engine
            .attempt(move || {
                let seen = Arc::clone(&seen);
                async move {
                    let call = seen.fetch_add(1, Ordering::SeqCst);
                    if call < failures {
                        anyhow::bail!("failure {}", call + 1);
                    }
                    Ok(call)
                }
            })
            .retry(5)
            .run()
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempts(), failures + 1);
        let expected = if failures == 0 {
            Resolution::Primary
        } else {
            Resolution::Retry(failures + 1)
        };
        assert_eq!(outcome.resolved_by(), Some(&expected));
    }
}

#[tokio::test]
async fn test_exhaustion_keeps_last_error() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let outcome: Outcome<()> = engine
        .attempt(move || {
            let seen = Arc::clone(&seen);
            async move {
                let call = seen.fetch_add(1, Ordering::SeqCst) + 1;
                anyhow::bail!("failure {}", call)
            }
        })
        .retry(2)
        .run()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(outcome.failed());
    assert!(outcome.value().is_none());
    assert_eq!(outcome.attempts(), 3);
    assert_eq!(outcome.error().unwrap().to_string(), "failure 3");

    let stages: Vec<&str> = outcome.log().iter().map(|e| e.stage.as_str()).collect();
    assert_eq!(stages, vec!["attempt:1", "attempt:2", "attempt:3"]);
}

#[tokio::test]
async fn test_delay_list_clamps_to_last_entry() {
    let (engine, sleeper) = recording_engine();

    let outcome: Outcome<()> = engine
        .attempt(|| async { anyhow::bail!("down") })
        .retry(5)
        .delays(vec![100, 200, 300])
        .run()
        .await
        .unwrap();

    assert!(outcome.failed());
    assert_eq!(sleeper.waits_ms(), vec![100, 200, 300, 300, 300]);
}

#[tokio::test]
async fn test_no_wait_after_final_attempt() {
    let (engine, sleeper) = recording_engine();

    let _: Outcome<()> = engine
        .attempt(|| async { anyhow::bail!("down") })
        .retry(3)
        .exponential_backoff(100, 10_000, 2.0)
        .run()
        .await
        .unwrap();

    assert_eq!(sleeper.waits_ms(), vec![100, 200, 400]);
}

#[tokio::test]
async fn test_named_backoff_preset() {
    let (engine, sleeper) = recording_engine();

    let _: Outcome<()> = engine
        .attempt(|| async { anyhow::bail!("down") })
        .retry(4)
        .backoff("fibonacci")
        .run()
        .await
        .unwrap();

    assert_eq!(sleeper.waits_ms(), vec![100, 100, 200, 300]);
}

#[tokio::test]
async fn test_jitter_stays_within_bounds() {
    let (engine, sleeper) = recording_engine();

    let _: Outcome<()> = engine
        .attempt(|| async { anyhow::bail!("down") })
        .retry(50)
        .delay(1_000)
        .with_jitter(0.25)
        .run()
        .await
        .unwrap();

    let waits = sleeper.waits_ms();
    assert_eq!(waits.len(), 50);
    assert!(waits.iter().all(|ms| (750..=1_250).contains(ms)), "{:?}", waits);
}

#[tokio::test]
async fn test_fallback_chain_order() {
    let (engine, _) = recording_engine();
    let third = counter();
    let reached = Arc::clone(&third);

    let outcome = engine
        .attempt(|| async { anyhow::bail!("primary down") })
        .retry(1)
        .fallback(|()| async { anyhow::bail!("replica down") })
        .fallback(|()| async { Ok("from cache") })
        .fallback(move |()| {
            reached.fetch_add(1, Ordering::SeqCst);
            async { Ok("never") }
        })
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.value(), Some(&"from cache"));
    assert_eq!(
        outcome.resolved_by(),
        Some(&Resolution::Fallback("closure:2".to_string()))
    );
    assert_eq!(third.load(Ordering::SeqCst), 0);

    let stages: Vec<&str> = outcome.log().iter().map(|e| e.stage.as_str()).collect();
    assert_eq!(
        stages,
        vec!["attempt:1", "attempt:2", "fallback:closure:1", "fallback:closure:2"]
    );
}

#[tokio::test]
async fn test_outcome_is_memoized() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let attempt = engine
        .attempt(move || {
            let seen = Arc::clone(&seen);
            async move { Ok(seen.fetch_add(1, Ordering::SeqCst)) }
        })
        .build()
        .unwrap();

    assert!(!attempt.has_run());
    let first = attempt.run().await.unwrap();
    let second = attempt.clone().run().await.unwrap();

    assert!(attempt.has_run());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.value(), second.value());
    assert_eq!(first.attempts(), second.attempts());
    assert_eq!(first.log(), second.log());
}

#[tokio::test]
async fn test_condition_gate_skips_run() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);
    let finals = counter();
    let final_seen = Arc::clone(&finals);
    let events = Arc::new(RecordingEventSink::new());

    let outcome = engine
        .with_event_sink(events.clone())
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .when(false)
        .finally(move |_| {
            final_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .run()
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.attempts(), 0);
    assert_eq!(outcome.resolved_by(), Some(&Resolution::Skipped));
    assert!(outcome.value().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(finals.load(Ordering::SeqCst), 1);
    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_unless_fn_evaluated_at_run() {
    let (engine, _) = recording_engine();
    let maintenance = Arc::new(Mutex::new(true));
    let flag = Arc::clone(&maintenance);

    let attempt = engine
        .attempt(|| async { Ok(7) })
        .unless_fn(move || *flag.lock().unwrap())
        .build()
        .unwrap();

    *maintenance.lock().unwrap() = false;
    let outcome = attempt.run().await.unwrap();
    assert_eq!(outcome.resolved_by(), Some(&Resolution::Primary));
}

#[tokio::test]
async fn test_never_retry_stops_immediately() {
    let (engine, sleeper) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let outcome: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async {
                Err(anyhow::Error::new(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "access denied",
                )))
            }
        })
        .retry(10)
        .delay(50)
        .never_retry::<io::Error>()
        .run()
        .await
        .unwrap();

    assert!(outcome.failed());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sleeper.waits().is_empty());
}

#[tokio::test]
async fn test_always_retry_wins_over_predicate() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let _: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::Error::new(io::Error::new(io::ErrorKind::TimedOut, "timeout"))) }
        })
        .retry(3)
        .retry_if(|_, _| false)
        .always_retry_matching(ErrorMatcher::io(io::ErrorKind::TimedOut))
        .run()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_policy_table_never_retry_list() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let policy = PolicyTable::default()
        .never_retry(ErrorMatcher::message("(?i)invalid credentials").unwrap());
    let engine = Engine::new(policy).with_sleeper(sleeper);
    let calls = counter();
    let seen = Arc::clone(&calls);

    let _: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("login failed: Invalid credentials") }
        })
        .retry(5)
        .run()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_if_sees_attempt_number() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let outcome: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("still failing") }
        })
        .retry(5)
        .retry_if(|_, attempt| attempt < 2)
        .run()
        .await
        .unwrap();

    assert!(outcome.failed());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.attempts(), 2);
}

#[tokio::test]
async fn test_retry_if_wins_over_retry_unless() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let _: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("busy") }
        })
        .retry(3)
        .retry_if(|_, _| true)
        .retry_unless(|_, _| true)
        .run()
        .await
        .unwrap();

    // retry_unless alone would stop after the first attempt
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_retry_unless_sees_attempt_number() {
    let (engine, _) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let outcome: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("busy") }
        })
        .retry(10)
        .retry_unless(|_, attempt| attempt >= 2)
        .run()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.attempts(), 2);
}

#[derive(Debug, Clone, Copy)]
struct TwoTries;

impl RetryStrategy for TwoTries {
    fn delay(&mut self, _attempt: u32, _base_delay: u64) -> u64 {
        5
    }

    fn should_retry(&self, _error: &(dyn std::error::Error + 'static), attempt: u32, _max: u32) -> bool {
        attempt < 2
    }

    fn fresh(&self) -> Box<dyn RetryStrategy> {
        Box::new(*self)
    }
}

#[tokio::test]
async fn test_strategy_can_stop_retries() {
    let (engine, sleeper) = recording_engine();
    let calls = counter();
    let seen = Arc::clone(&calls);

    let _: Outcome<()> = engine
        .attempt(move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("nope") }
        })
        .retry(10)
        .using_strategy(TwoTries)
        .run()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(sleeper.waits_ms(), vec![5]);
}

#[tokio::test]
async fn test_lifecycle_event_order() {
    let (engine, _) = recording_engine();
    let events = Arc::new(RecordingEventSink::new());
    let calls = counter();
    let seen = Arc::clone(&calls);

    let _ = engine
        .with_event_sink(events.clone())
        .attempt(move || {
            let first = seen.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    anyhow::bail!("cold start");
                }
                Ok(())
            }
        })
        .retry(1)
        .run()
        .await
        .unwrap();

    assert_eq!(
        events.names(),
        vec!["started", "failed", "retrying", "succeeded"]
    );
}

#[tokio::test]
async fn test_fallback_and_exhaustion_events() {
    let (engine, _) = recording_engine();
    let events = Arc::new(RecordingEventSink::new());

    let _: Outcome<()> = engine
        .with_event_sink(events.clone())
        .attempt(|| async { anyhow::bail!("down") })
        .fallback(|()| async { anyhow::bail!("also down") })
        .run()
        .await
        .unwrap();

    assert_eq!(
        events.names(),
        vec!["started", "failed", "fallback_triggered", "all_failed"]
    );
}

#[tokio::test]
async fn test_without_events_publishes_nothing() {
    let (engine, _) = recording_engine();
    let events = Arc::new(RecordingEventSink::new());

    let _ = engine
        .with_event_sink(events.clone())
        .attempt(|| async { Ok(1) })
        .without_events()
        .run()
        .await
        .unwrap();

    assert!(events.events().is_empty());
}

#[tokio::test]
async fn test_hooks_see_context() {
    let (engine, _) = recording_engine();
    let trail = Arc::new(Mutex::new(Vec::<String>::new()));
    let (on_retry, on_fallback, on_success, finally) = (
        Arc::clone(&trail),
        Arc::clone(&trail),
        Arc::clone(&trail),
        Arc::clone(&trail),
    );

    let outcome = engine
        .attempt(|| async { anyhow::bail!("primary down") })
        .retry(1)
        .fallback(|()| async { Ok(3) })
        .on_retry(move |ctx: &AttemptContext, error: Option<&anyhow::Error>| {
            on_retry.lock().unwrap().push(format!(
                "retry {} after {}",
                ctx.attempt(),
                error.map(|e| e.to_string()).unwrap_or_default()
            ));
            Ok(())
        })
        .on_fallback(move |ctx: &AttemptContext, label: &str, _: &anyhow::Error| {
            assert!(!ctx.is_fallback());
            on_fallback.lock().unwrap().push(format!("fallback {}", label));
            Ok(())
        })
        .on_success(move |ctx: &AttemptContext, value: &i32| {
            assert!(ctx.is_fallback());
            on_success.lock().unwrap().push(format!("success {}", value));
            Ok(())
        })
        .finally(move |ctx: &AttemptContext| {
            finally.lock().unwrap().push(format!("finally {}", ctx.succeeded()));
            Ok(())
        })
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.value(), Some(&3));
    assert_eq!(
        *trail.lock().unwrap(),
        vec![
            "retry 2 after primary down",
            "fallback closure:1",
            "success 3",
            "finally true",
        ]
    );
}

#[tokio::test]
async fn test_failing_hook_is_reported_not_raised() {
    let reporter = Arc::new(RecordingReporter::new());
    let (engine, _) = recording_engine();

    let outcome = engine
        .with_reporter(reporter.clone())
        .attempt(|| async { Ok("done") })
        .on_success(|_: &AttemptContext, _: &&str| {
            anyhow::bail!("metrics backend offline")
        })
        .finally(|_: &AttemptContext| panic!("finally blew up"))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.value(), Some(&"done"));
    let reports = reporter.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].0, "on_success");
    assert_eq!(reports[0].1, "metrics backend offline");
    assert_eq!(reports[1].0, "finally");
}

#[tokio::test]
async fn test_defer_hooks_go_to_sink() {
    let queue = Arc::new(DeferQueue::default());
    let (engine, _) = recording_engine();
    let ran = counter();
    let seen = Arc::clone(&ran);

    let outcome = engine
        .with_deferred_sink(queue.clone())
        .attempt(|| async { Ok(()) })
        .defer(move |ctx: &AttemptContext| {
            assert!(ctx.succeeded());
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .run()
        .await
        .unwrap();

    assert!(outcome.succeeded());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.flush(), 1);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_throw_on_failure_reraises_domain_error() {
    let (engine, _) = recording_engine();

    let result: Result<Outcome<()>, AttemptError> = engine
        .attempt(|| async { Err(anyhow::Error::new(io::Error::new(io::ErrorKind::NotFound, "missing"))) })
        .throw_on_failure()
        .run()
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, AttemptError::Failed(_)));
    let domain = error.domain().unwrap();
    assert_eq!(
        domain.downcast_ref::<io::Error>().unwrap().kind(),
        io::ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_quiet_wins_over_throw() {
    let (engine, _) = recording_engine();

    let outcome: Outcome<()> = engine
        .attempt(|| async { anyhow::bail!("down") })
        .throw_on_failure()
        .quiet()
        .run()
        .await
        .unwrap();

    assert!(outcome.failed());
}

#[tokio::test]
async fn test_panicking_unit_falls_back() {
    let (engine, _) = recording_engine();

    let outcome = engine
        .attempt(|| async { panic!("index out of bounds") })
        .fallback(|()| async { Ok(0u8) })
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.value(), Some(&0));
    assert!(outcome.log()[0]
        .error
        .as_deref()
        .unwrap()
        .contains("index out of bounds"));
}

#[tokio::test]
async fn test_panicking_catch_handler_still_runs_failure_hooks() {
    let (engine, _) = recording_engine();
    let trail = Arc::new(Mutex::new(Vec::<String>::new()));
    let (failed, finally) = (Arc::clone(&trail), Arc::clone(&trail));

    let attempt: Attempt<()> = engine
        .attempt(|| async { anyhow::bail!("disk full") })
        .catch_all(|_: &anyhow::Error, _: &AttemptContext| panic!("handler bug"))
        .on_failure(move |_: &AttemptContext, error: Option<&anyhow::Error>| {
            let message = error.map(|e| e.to_string()).unwrap_or_default();
            failed.lock().unwrap().push(format!("failure {}", message));
            Ok(())
        })
        .finally(move |_: &AttemptContext| {
            finally.lock().unwrap().push("finally".to_string());
            Ok(())
        })
        .build()
        .unwrap();

    let result = AssertUnwindSafe(attempt.run()).catch_unwind().await;

    assert!(result.is_err());
    assert_eq!(*trail.lock().unwrap(), vec!["failure disk full", "finally"]);
}

#[tokio::test]
async fn test_catch_runs_for_each_matching_failure() {
    let (engine, _) = recording_engine();
    let typed = Arc::new(Mutex::new(Vec::new()));
    let typed_seen = Arc::clone(&typed);
    let all = counter();
    let all_seen = Arc::clone(&all);

    let _: Outcome<()> = engine
        .attempt(|| async {
            Err(anyhow::Error::new(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        })
        .retry(2)
        .catch::<io::Error, _>(move |error: &io::Error, ctx: &AttemptContext| {
            typed_seen.lock().unwrap().push((error.kind(), ctx.attempt()));
        })
        .catch::<std::fmt::Error, _>(|_: &std::fmt::Error, _: &AttemptContext| {
            panic!("wrong type must not be caught")
        })
        .catch_all(move |_: &anyhow::Error, _: &AttemptContext| {
            all_seen.fetch_add(1, Ordering::SeqCst);
        })
        .run()
        .await
        .unwrap();

    assert_eq!(
        *typed.lock().unwrap(),
        vec![
            (io::ErrorKind::ConnectionReset, 1),
            (io::ErrorKind::ConnectionReset, 2),
            (io::ErrorKind::ConnectionReset, 3),
        ]
    );
    assert_eq!(all.load(Ordering::SeqCst), 3);
}

struct StaleCache;

#[async_trait]
impl Fallbackable<String, ()> for StaleCache {
    async fn handle_fallback(&self, error: &anyhow::Error, _input: ()) -> anyhow::Result<String> {
        Ok(format!("stale ({})", error))
    }

    fn should_skip(&self, error: &anyhow::Error) -> bool {
        error.to_string().contains("corrupt")
    }
}

#[tokio::test]
async fn test_fallbackable_receives_trigger_and_may_skip() {
    let (engine, _) = recording_engine();

    let served = engine
        .attempt(|| async { anyhow::bail!("timeout") })
        .fallback_unit(UnitRef::fallbackable(Arc::new(StaleCache)).labeled("stale-cache"))
        .run()
        .await
        .unwrap();
    assert_eq!(served.value().map(String::as_str), Some("stale (timeout)"));
    assert_eq!(
        served.resolved_by(),
        Some(&Resolution::Fallback("stale-cache".to_string()))
    );

    let skipped = engine
        .attempt(|| async { anyhow::bail!("corrupt payload") })
        .fallback_unit(UnitRef::fallbackable(Arc::new(StaleCache)))
        .fallback(|()| async { Ok("default".to_string()) })
        .run()
        .await
        .unwrap();
    assert_eq!(skipped.value().map(String::as_str), Some("default"));
}

#[tokio::test]
async fn test_fallbackable_primary_is_rejected() {
    let (engine, _) = recording_engine();
    let result = engine
        .attempt_unit(UnitRef::fallbackable(Arc::new(StaleCache)))
        .build();
    assert!(matches!(result, Err(AttemptError::Resolution(_))));
}

#[tokio::test]
async fn test_named_units_resolve_through_registry() {
    let (engine, _) = recording_engine();
    let mut registry = UnitRegistry::<u32, ()>::new();
    registry.register_fn("static-value", |()| async { Ok(99) });
    let registry = Arc::new(registry);

    let value = engine
        .attempt(|| async { anyhow::bail!("down") })
        .fallback_named("static-value")
        .resolve_with(Arc::clone(&registry))
        .value()
        .await
        .unwrap();
    assert_eq!(value, Some(99));

    let missing = engine
        .attempt(|| async { Ok(1u32) })
        .fallback_named("does-not-exist")
        .resolve_with(registry)
        .build();
    assert!(matches!(missing, Err(AttemptError::Resolution(_))));
}

#[tokio::test]
async fn test_alternative_primaries_run_before_fallbacks() {
    let (engine, _) = recording_engine();
    let first = counter();
    let seen = Arc::clone(&first);

    let outcome = engine
        .attempt_any(vec![
            UnitRef::function(move |()| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { anyhow::bail!("primary region down") }
            }),
            UnitRef::function(|()| async { Ok("secondary region") }).labeled("secondary"),
        ])
        .retry(2)
        .fallback(|()| async { Ok("fallback") })
        .run()
        .await
        .unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.value(), Some(&"secondary region"));
    assert_eq!(
        outcome.resolved_by(),
        Some(&Resolution::Fallback("secondary".to_string()))
    );
}

#[tokio::test]
async fn test_input_reaches_every_execution() {
    let (engine, _) = recording_engine();
    let inputs = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&inputs);

    let outcome = engine
        .attempt_with("order-17".to_string(), move |id: String| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(id.clone());
                anyhow::bail!("payment gateway busy")
            }
        })
        .retry(1)
        .fallback(|id: String| async move { Ok(format!("queued {}", id)) })
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.value().map(String::as_str), Some("queued order-17"));
    assert_eq!(*inputs.lock().unwrap(), vec!["order-17", "order-17"]);
}

#[tokio::test]
async fn test_configuration_snapshot() {
    let (engine, _) = recording_engine();
    let attempt = engine
        .attempt(|| async { Ok(()) })
        .retry(2)
        .backoff("linear")
        .with_jitter(0.2)
        .fallback(|()| async { Ok(()) })
        .never_retry::<io::Error>()
        .throw_on_failure()
        .build()
        .unwrap();

    let configuration = attempt.configuration();
    assert_eq!(configuration.max_attempts, 3);
    assert!(configuration.strategy.as_ref().unwrap().contains("Linear"));
    assert_eq!(configuration.fallbacks, vec!["closure:1"]);
    assert!(configuration.throw_on_failure);
    assert_eq!(configuration.never_retry.len(), 1);

    let json = serde_json::to_value(&configuration).unwrap();
    assert_eq!(json["max_attempts"], 3);
}
