//! Observer actor: accumulates memory reclaimed by collections on one context.
//!
//! The observer subscribes to the probe in `pre_start`, so by the time its
//! spawn returns it is armed. Trace events are forwarded into its own
//! mailbox and folded into the collected total by a small state machine:
//!
//! ```text
//! Idle --start--> AwaitingEnd --matching end--> Idle
//! Idle | AwaitingEnd --stop--> Terminated
//! ```

use std::sync::Arc;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tracing::{debug, info, warn};

use crate::probe::{EventSink, HeapProbe, TraceEvent, TraceKind};
use crate::types::{ContextId, GcKind};

use super::messages::ObserverMessage;

/// Where the observer is in the collection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverPhase {
    /// No collection in progress.
    Idle,
    /// A collection started and its end event has not arrived yet.
    AwaitingEnd {
        /// Kind of the pending collection.
        gc: GcKind,
        /// Heap total, in words, when it started.
        heap_before: u64,
    },
    /// The observer stopped.
    Terminated,
}

/// What applying one trace event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A collection started.
    Armed,
    /// A collection finished and `reclaimed` words were added to the total.
    Reconciled { reclaimed: i64 },
    /// A start arrived while another collection was pending; the new one replaces it.
    Restarted,
    /// The event belongs to a different context.
    ForeignContext,
    /// An end event without a matching start.
    Unmatched,
    /// Not a collection event.
    Ignored,
}

/// Arguments for the observer actor.
pub struct ObserverArguments {
    /// Context to watch.
    pub context: ContextId,
    /// Probe delivering the context's trace events.
    pub probe: Arc<dyn HeapProbe>,
}

/// State for the observer actor.
pub struct ObserverState {
    context: ContextId,
    probe: Arc<dyn HeapProbe>,
    phase: ObserverPhase,
    collected: i64,
    collections: u64,
}

impl ObserverState {
    /// Create a fresh, idle state watching `context`.
    #[must_use]
    pub fn new(context: ContextId, probe: Arc<dyn HeapProbe>) -> Self {
        Self {
            context,
            probe,
            phase: ObserverPhase::Idle,
            collected: 0,
            collections: 0,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> ObserverPhase {
        self.phase
    }

    /// Words reclaimed by the collections completed so far.
    #[must_use]
    pub const fn collected(&self) -> i64 {
        self.collected
    }

    /// Number of collections reconciled so far.
    #[must_use]
    pub const fn collections(&self) -> u64 {
        self.collections
    }

    /// Stop folding events; the collected total is final from here on.
    pub fn terminate(&mut self) {
        self.phase = ObserverPhase::Terminated;
    }

    /// Fold one trace event into the state.
    pub fn apply(&mut self, event: &TraceEvent) -> Transition {
        if event.context != self.context {
            return Transition::ForeignContext;
        }
        match (&event.kind, self.phase) {
            (_, ObserverPhase::Terminated) => Transition::Ignored,
            (TraceKind::CollectionStart { gc, heap }, ObserverPhase::Idle) => {
                self.phase = ObserverPhase::AwaitingEnd {
                    gc: *gc,
                    heap_before: heap.total(),
                };
                Transition::Armed
            }
            (TraceKind::CollectionStart { gc, heap }, ObserverPhase::AwaitingEnd { .. }) => {
                self.phase = ObserverPhase::AwaitingEnd {
                    gc: *gc,
                    heap_before: heap.total(),
                };
                Transition::Restarted
            }
            (
                TraceKind::CollectionEnd { gc, heap },
                ObserverPhase::AwaitingEnd {
                    gc: pending,
                    heap_before,
                },
            ) if *gc == pending => {
                // A collection may grow the heap; the negative amount still counts.
                let reclaimed = reclaimed(heap_before, heap.total());
                self.collected = self.collected.saturating_add(reclaimed);
                self.collections = self.collections.saturating_add(1);
                self.phase = ObserverPhase::Idle;
                Transition::Reconciled { reclaimed }
            }
            (TraceKind::CollectionEnd { .. }, _) => Transition::Unmatched,
            (TraceKind::Auxiliary { .. }, _) => Transition::Ignored,
        }
    }
}

fn reclaimed(before: u64, after: u64) -> i64 {
    let diff = i128::from(before).saturating_sub(i128::from(after));
    i64::try_from(diff).unwrap_or(if diff < 0 { i64::MIN } else { i64::MAX })
}

/// Definition for the observer actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserverActor;

impl Actor for ObserverActor {
    type Msg = ObserverMessage;
    type State = ObserverState;
    type Arguments = ObserverArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let target = myself.clone();
        let sink: EventSink = Arc::new(move |event| {
            // The observer may already be gone; late events are dropped.
            let _ = target.send_message(ObserverMessage::Trace(event));
        });
        args.probe.subscribe(args.context, sink)?;

        debug!(context = %args.context, probe = args.probe.name(), "Observer armed");
        Ok(ObserverState::new(args.context, args.probe))
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ObserverMessage::Trace(event) => match state.apply(&event) {
                Transition::Armed => {
                    debug!(context = %state.context, kind = ?event.kind, "Collection started");
                }
                Transition::Reconciled { reclaimed } => {
                    debug!(
                        context = %state.context,
                        reclaimed,
                        collected = state.collected,
                        "Collection finished"
                    );
                }
                Transition::Restarted => {
                    warn!(context = %state.context, "Collection started before the previous one ended");
                }
                Transition::ForeignContext => {
                    debug!(
                        context = %state.context,
                        foreign = %event.context,
                        "Ignoring event from another context"
                    );
                }
                Transition::Unmatched => {
                    debug!(context = %state.context, kind = ?event.kind, "Ignoring unmatched collection end");
                }
                Transition::Ignored => {
                    debug!(context = %state.context, kind = ?event.kind, "Ignoring trace event");
                }
            },
            ObserverMessage::CollectedTotal { token, reply } => {
                if let ObserverPhase::AwaitingEnd { gc, .. } = state.phase {
                    debug!(gc = %gc, "Collected total requested mid-collection");
                }
                if reply.send((token, state.collected)).is_err() {
                    debug!(token = %token, "Collected total requester went away");
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.probe.unsubscribe(state.context);
        state.terminate();
        info!(
            context = %state.context,
            collections = state.collections,
            collected = state.collected,
            "Observer stopped"
        );
        Ok(())
    }
}
