//! BDD-style behavioral tests for the measurement protocol.
//!
//! These tests drive full coordinator/executor/observer runs against the
//! simulated generational runtime, following the Given-When-Then pattern.

use std::sync::Arc;

use heapmeter_measure::{
    MeasureConfig, MeasurementResult, Meter, Outcome, SimulatedRuntime, UnsupportedProbe,
    measure_with,
};

const WORD: u64 = 8;

fn runtime() -> SimulatedRuntime {
    SimulatedRuntime::new().with_word_size(WORD)
}

/// Route protocol logs to the test harness; `RUST_LOG=debug` shows transitions.
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn meter(runtime: &SimulatedRuntime) -> Meter {
    init_test_tracing();
    Meter::new(runtime.clone()).with_config(MeasureConfig::for_testing())
}

fn assert_no_leaks(runtime: &SimulatedRuntime) {
    assert_eq!(runtime.open_contexts(), 0, "context should be detached");
    assert_eq!(runtime.subscribers(), 0, "observer should have unsubscribed");
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASELINE BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_non_allocating_callable_when_measured_then_zero_bytes_and_value() {
    // Given: A runtime with some pre-existing heap in every context
    let runtime = runtime().with_initial_heap(233);

    // When: Measuring a callable that allocates nothing
    let result = meter(&runtime).measure(|| 42).await;

    // Then: Zero bytes, not None, and the callable's value
    assert_eq!(result, MeasurementResult::measured(Some(0), 42));
    assert_no_leaks(&runtime);
}

#[tokio::test]
async fn given_retained_words_without_collection_when_measured_then_bytes_match() {
    // Given: A callable that retains 125 words
    let runtime = runtime();
    let rt = runtime.clone();

    // When: Measured
    let result = meter(&runtime)
        .measure(move || {
            rt.allocate(125);
            "kept"
        })
        .await;

    // Then: 125 words worth of bytes
    assert_eq!(result.bytes, Some(125 * WORD));
    assert_eq!(result.value, Outcome::Returned("kept"));
    assert_no_leaks(&runtime);
}

#[tokio::test]
async fn given_custom_word_size_when_measured_then_bytes_scale() {
    let runtime = SimulatedRuntime::new().with_word_size(4);
    let rt = runtime.clone();

    let result = meter(&runtime).measure(move || rt.allocate(10)).await;

    assert_eq!(result.bytes, Some(40));
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTION RECONCILIATION BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_minor_collection_during_run_when_measured_then_reclaimed_words_counted() {
    // Given: A callable that allocates 100 words, drops 40 and triggers a minor GC
    let runtime = runtime();
    let rt = runtime.clone();

    // When: Measured
    let result = meter(&runtime)
        .measure(move || {
            rt.allocate(100);
            rt.discard(40);
            rt.minor_collection();
        })
        .await;

    // Then: heap grew by 60 words and the observer saw 40 reclaimed
    assert_eq!(result.bytes, Some(100 * WORD));
    assert_no_leaks(&runtime);
}

#[tokio::test]
async fn given_several_collections_when_measured_then_every_collection_reconciled() {
    let runtime = runtime().with_initial_heap(50);
    let rt = runtime.clone();

    let result = meter(&runtime)
        .measure(move || {
            rt.allocate(200);
            rt.minor_collection();
            rt.discard(150);
            rt.minor_collection();
            rt.allocate(30);
            rt.discard(30);
            rt.major_collection();
            rt.allocate(10);
        })
        .await;

    // 240 words were allocated over the run; 180 of them were reclaimed.
    assert_eq!(result.bytes, Some(240 * WORD));
}

#[tokio::test]
async fn given_garbage_left_uncollected_when_measured_then_counted_as_heap() {
    // Given: Garbage that no collection reclaims before the callable returns
    let runtime = runtime();
    let rt = runtime.clone();

    let result = meter(&runtime)
        .measure(move || {
            rt.allocate(64);
            rt.discard(64);
        })
        .await;

    // Then: It still occupies the heap at the second snapshot
    assert_eq!(result.bytes, Some(64 * WORD));
}

#[tokio::test]
async fn given_auxiliary_trace_events_when_measured_then_ignored() {
    let runtime = runtime();
    let rt = runtime.clone();

    let result = meter(&runtime)
        .measure(move || {
            rt.trace_auxiliary("heap_grow");
            rt.allocate(3);
            rt.trace_auxiliary("binary_alloc");
            7_u8
        })
        .await;

    assert_eq!(result, MeasurementResult::measured(Some(3 * WORD), 7));
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNMEASURABLE AND FAILURE BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_heap_shrinking_without_trace_when_measured_then_bytes_none_not_zero() {
    // Given: A callable that hands memory back without a traced collection
    let runtime = runtime().with_initial_heap(100);
    let rt = runtime.clone();

    // When: Measured
    let result = meter(&runtime)
        .measure(move || {
            rt.release(50);
            "shrunk"
        })
        .await;

    // Then: The negative delta is unmeasurable, and the value survives
    assert_eq!(result.bytes, None);
    assert_eq!(result.value, Outcome::Returned("shrunk"));
    assert_no_leaks(&runtime);
}

#[tokio::test]
async fn given_panicking_callable_when_measured_then_failure_and_no_leaked_actors() {
    // Given: A callable that panics halfway through
    let runtime = runtime();
    let rt = runtime.clone();

    // When: Measured
    let result: MeasurementResult<u32> = meter(&runtime)
        .measure(move || {
            rt.allocate(10);
            std::panic::panic_any("callable exploded")
        })
        .await;

    // Then: Failure marker, no bytes, and nothing left attached
    assert!(result.is_failure());
    assert_eq!(result.bytes, None);
    assert_no_leaks(&runtime);
}

#[tokio::test]
async fn given_unsupported_probe_when_measured_then_bytes_none_and_value_returned() {
    let result = measure_with(UnsupportedProbe, || vec![1, 2, 3]).await;

    assert_eq!(result.bytes, None);
    assert_eq!(result.into_value(), Some(vec![1, 2, 3]));
}

#[tokio::test]
async fn given_failing_callable_on_unsupported_probe_when_measured_then_failure() {
    let result: MeasurementResult<()> =
        measure_with(UnsupportedProbe, || std::panic::panic_any(String::from("no"))).await;

    assert!(result.is_failure());
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPEATABILITY AND ISOLATION BEHAVIORS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn given_same_callable_when_measured_repeatedly_then_classification_consistent() {
    let runtime = runtime();
    let meter = meter(&runtime);

    for _ in 0..5 {
        let rt = runtime.clone();
        let result = meter.measure(move || rt.allocate(16)).await;
        assert_eq!(result.bytes, Some(16 * WORD));
    }
    assert_no_leaks(&runtime);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_concurrent_measurements_when_run_then_each_receives_its_own_result() {
    // Given: Many measurements sharing one runtime, each retaining a distinct size
    let runtime = runtime();
    let meter = Arc::new(meter(&runtime));

    // When: All run at once
    let tasks: Vec<_> = (1..=24_u64)
        .map(|words| {
            let meter = Arc::clone(&meter);
            let rt = runtime.clone();
            tokio::spawn(async move {
                let result = meter
                    .measure(move || {
                        rt.allocate(words);
                        words
                    })
                    .await;
                (words, result)
            })
        })
        .collect();

    // Then: Every task gets its own value and its own byte count
    for task in tasks {
        let (words, result) = task.await.expect("measurement task should not panic");
        assert_eq!(result.value, Outcome::Returned(words));
        assert_eq!(result.bytes, Some(words * WORD));
    }
    assert_no_leaks(&runtime);
}
