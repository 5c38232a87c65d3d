//! Behavioral tests for the observer actor in isolation.
//!
//! The observer is spawned directly against a simulated runtime context and
//! fed trace events by hand, so the tests can reach the edge cases a real
//! collector rarely produces.

use std::sync::Arc;
use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};

use heapmeter_measure::actors::{ObserverActor, ObserverArguments, ObserverMessage};
use heapmeter_measure::{
    ContextId, CorrelationToken, GcKind, HeapProbe, HeapSnapshot, SimulatedRuntime, TraceEvent,
};

/// Helper to spawn an observer watching a fresh simulated context.
async fn setup_observer() -> (SimulatedRuntime, ContextId, ActorRef<ObserverMessage>) {
    let runtime = SimulatedRuntime::new();
    let ctx = runtime.attach().expect("simulated attach never fails");
    let args = ObserverArguments {
        context: ctx,
        probe: Arc::new(runtime.clone()),
    };
    let (observer, _handle) = Actor::spawn(None, ObserverActor, args)
        .await
        .expect("Failed to spawn observer");
    (runtime, ctx, observer)
}

/// Helper to query the collected total and check the echoed token.
async fn collected_total(observer: &ActorRef<ObserverMessage>) -> i64 {
    let token = CorrelationToken::new();
    let result = observer
        .call(
            |reply| ObserverMessage::CollectedTotal { token, reply },
            Some(Duration::from_millis(1000)),
        )
        .await
        .expect("Call failed");

    match result {
        CallResult::Success((echoed, total)) => {
            assert_eq!(echoed, token, "reply must carry the request token");
            total
        }
        CallResult::Timeout => std::panic::panic_any("Call timed out"),
        CallResult::SenderError => std::panic::panic_any("Sender error"),
    }
}

fn send(observer: &ActorRef<ObserverMessage>, event: TraceEvent) {
    observer
        .send_message(ObserverMessage::Trace(event))
        .expect("Observer should accept trace events");
}

#[tokio::test]
async fn given_armed_observer_when_spawned_then_subscribed_to_context() {
    // Given/When: An observer spawned for a context
    let (runtime, _ctx, observer) = setup_observer().await;

    // Then: The runtime has a subscriber before any work runs
    assert_eq!(runtime.subscribers(), 1);
    assert_eq!(collected_total(&observer).await, 0);

    observer.stop(None);
}

#[tokio::test]
async fn given_start_and_end_events_when_queried_then_reclaimed_words_reported() {
    let (_runtime, ctx, observer) = setup_observer().await;

    send(
        &observer,
        TraceEvent::collection_start(ctx, GcKind::Minor, HeapSnapshot::new(90, 10)),
    );
    send(
        &observer,
        TraceEvent::collection_end(ctx, GcKind::Minor, HeapSnapshot::new(0, 70)),
    );

    assert_eq!(collected_total(&observer).await, 30);
    observer.stop(None);
}

#[tokio::test]
async fn given_heap_growing_collection_when_queried_then_negative_amount_added() {
    let (_runtime, ctx, observer) = setup_observer().await;

    send(
        &observer,
        TraceEvent::collection_start(ctx, GcKind::Major, HeapSnapshot::new(0, 40)),
    );
    send(
        &observer,
        TraceEvent::collection_end(ctx, GcKind::Major, HeapSnapshot::new(0, 44)),
    );

    assert_eq!(collected_total(&observer).await, -4);
    observer.stop(None);
}

#[tokio::test]
async fn given_events_from_other_context_when_queried_then_not_attributed() {
    let (_runtime, _ctx, observer) = setup_observer().await;
    let foreign = ContextId::new(u64::MAX);

    send(
        &observer,
        TraceEvent::collection_start(foreign, GcKind::Minor, HeapSnapshot::new(500, 0)),
    );
    send(
        &observer,
        TraceEvent::collection_end(foreign, GcKind::Minor, HeapSnapshot::new(0, 0)),
    );

    assert_eq!(collected_total(&observer).await, 0);
    observer.stop(None);
}

#[tokio::test]
async fn given_unrecognized_events_when_received_then_observer_keeps_running() {
    let (_runtime, ctx, observer) = setup_observer().await;

    send(&observer, TraceEvent::auxiliary(ctx, "heap_grow"));
    send(
        &observer,
        TraceEvent::collection_end(ctx, GcKind::Minor, HeapSnapshot::new(1, 1)),
    );

    assert_eq!(collected_total(&observer).await, 0);
    observer.stop(None);
}

#[tokio::test]
async fn given_stop_when_observer_exits_then_unsubscribed() {
    let (runtime, _ctx, observer) = setup_observer().await;

    observer
        .stop_and_wait(None, Some(Duration::from_millis(1000)))
        .await
        .expect("Observer should stop");

    assert_eq!(runtime.subscribers(), 0);
}

#[tokio::test]
async fn given_stopped_observer_when_queried_then_call_fails_instead_of_hanging() {
    let (_runtime, _ctx, observer) = setup_observer().await;
    observer
        .stop_and_wait(None, Some(Duration::from_millis(1000)))
        .await
        .expect("Observer should stop");

    let token = CorrelationToken::new();
    let result = observer
        .call(
            |reply| ObserverMessage::CollectedTotal { token, reply },
            Some(Duration::from_millis(200)),
        )
        .await;

    assert!(!matches!(result, Ok(CallResult::Success(_))));
}
