//! Simulated generational runtime.
//!
//! A small model of a managed heap with a young and an old generation per
//! context. The measured work drives it explicitly: it allocates, drops
//! references (turning live words into garbage) and triggers minor or major
//! collections, which are traced to the context's subscriber exactly like a
//! real runtime would. Embedders of a real managed runtime can use it as the
//! reference for wiring their own collector into [`HeapProbe`].

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ProbeError;
use crate::types::{ContextId, GcKind, HeapSnapshot};

use super::{EventSink, HeapProbe, TraceEvent, word_size};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Words held by one simulated context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GenerationalHeap {
    young_live: u64,
    young_garbage: u64,
    old_live: u64,
    old_garbage: u64,
}

impl GenerationalHeap {
    const fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot::new(
            self.young_live.saturating_add(self.young_garbage),
            self.old_live.saturating_add(self.old_garbage),
        )
    }

    /// Turn up to `words` live words into garbage, youngest first.
    fn discard(&mut self, words: u64) {
        let from_young = words.min(self.young_live);
        self.young_live = self.young_live.saturating_sub(from_young);
        self.young_garbage = self.young_garbage.saturating_add(from_young);

        let from_old = words.saturating_sub(from_young).min(self.old_live);
        self.old_live = self.old_live.saturating_sub(from_old);
        self.old_garbage = self.old_garbage.saturating_add(from_old);
    }

    /// Return up to `words` live words without a collection.
    fn release(&mut self, words: u64) {
        let from_young = words.min(self.young_live);
        self.young_live = self.young_live.saturating_sub(from_young);
        let from_old = words.saturating_sub(from_young).min(self.old_live);
        self.old_live = self.old_live.saturating_sub(from_old);
    }

    fn collect(&mut self, gc: GcKind) {
        self.young_garbage = 0;
        self.old_live = self.old_live.saturating_add(self.young_live);
        self.young_live = 0;
        if gc == GcKind::Major {
            self.old_garbage = 0;
        }
    }
}

#[derive(Default)]
struct RuntimeState {
    heaps: HashMap<ContextId, GenerationalHeap>,
    subscribers: HashMap<ContextId, EventSink>,
}

/// In-process generational heap model implementing [`HeapProbe`].
///
/// Cheap to clone; clones share the same contexts. The work under
/// measurement calls [`allocate`](Self::allocate) and friends, which act on
/// the context bound to the calling thread and do nothing outside a
/// measurement.
#[derive(Clone)]
pub struct SimulatedRuntime {
    state: Arc<Mutex<RuntimeState>>,
    word_size: u64,
    initial_heap: u64,
}

impl std::fmt::Debug for SimulatedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRuntime")
            .field("word_size", &self.word_size)
            .field("initial_heap", &self.initial_heap)
            .field("open_contexts", &self.open_contexts())
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RuntimeState::default())),
            word_size: word_size(),
            initial_heap: 0,
        }
    }

    /// Use a different word size.
    #[must_use]
    pub const fn with_word_size(mut self, word_size: u64) -> Self {
        self.word_size = word_size;
        self
    }

    /// Start every context with `words` live young words of its own.
    #[must_use]
    pub const fn with_initial_heap(mut self, words: u64) -> Self {
        self.initial_heap = words;
        self
    }

    /// Number of attached contexts.
    #[must_use]
    pub fn open_contexts(&self) -> usize {
        self.state.lock().heaps.len()
    }

    /// Number of contexts with an event subscriber.
    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Allocate `words` live young words.
    pub fn allocate(&self, words: u64) {
        self.with_current(|heap| {
            heap.young_live = heap.young_live.saturating_add(words);
        });
    }

    /// Drop references to `words` live words; they stay on the heap until collected.
    pub fn discard(&self, words: u64) {
        self.with_current(|heap| heap.discard(words));
    }

    /// Hand `words` live words back to the runtime without tracing a collection.
    pub fn release(&self, words: u64) {
        self.with_current(|heap| heap.release(words));
    }

    /// Collect young garbage and promote the young survivors.
    pub fn minor_collection(&self) {
        self.collect(GcKind::Minor);
    }

    /// Collect all garbage.
    pub fn major_collection(&self) {
        self.collect(GcKind::Major);
    }

    /// Emit a runtime-specific trace record for the current context.
    pub fn trace_auxiliary(&self, label: &str) {
        let Some(ctx) = current() else {
            return;
        };
        let sink = self.state.lock().subscribers.get(&ctx).cloned();
        if let Some(sink) = sink {
            sink(TraceEvent::auxiliary(ctx, label));
        }
    }

    fn with_current(&self, update: impl FnOnce(&mut GenerationalHeap)) {
        let Some(ctx) = current() else {
            debug!("Simulated heap operation outside a measurement, ignoring");
            return;
        };
        if let Some(heap) = self.state.lock().heaps.get_mut(&ctx) {
            update(heap);
        }
    }

    fn collect(&self, gc: GcKind) {
        let Some(ctx) = current() else {
            debug!(gc = %gc, "Simulated collection outside a measurement, ignoring");
            return;
        };

        // Sinks run outside the lock.
        let traced = {
            let mut state = self.state.lock();
            let Some(heap) = state.heaps.get_mut(&ctx) else {
                return;
            };
            let before = heap.snapshot();
            heap.collect(gc);
            let after = heap.snapshot();
            state
                .subscribers
                .get(&ctx)
                .cloned()
                .map(|sink| (sink, before, after))
        };

        if let Some((sink, before, after)) = traced {
            sink(TraceEvent::collection_start(ctx, gc, before));
            sink(TraceEvent::collection_end(ctx, gc, after));
        }
    }
}

fn current() -> Option<ContextId> {
    CURRENT.try_with(Cell::get).ok().flatten()
}

impl HeapProbe for SimulatedRuntime {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn word_size(&self) -> u64 {
        self.word_size
    }

    fn attach(&self) -> Result<ContextId, ProbeError> {
        let ctx = ContextId::new(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        let heap = GenerationalHeap {
            young_live: self.initial_heap,
            ..GenerationalHeap::default()
        };
        self.state.lock().heaps.insert(ctx, heap);
        Ok(ctx)
    }

    fn enter(&self, ctx: ContextId) {
        let _ = CURRENT.try_with(|current| current.set(Some(ctx)));
    }

    fn exit(&self, _ctx: ContextId) {
        let _ = CURRENT.try_with(|current| current.set(None));
    }

    fn snapshot(&self, ctx: ContextId) -> Option<HeapSnapshot> {
        self.state.lock().heaps.get(&ctx).map(GenerationalHeap::snapshot)
    }

    fn subscribe(&self, ctx: ContextId, sink: EventSink) -> Result<(), ProbeError> {
        let mut state = self.state.lock();
        if !state.heaps.contains_key(&ctx) {
            return Err(ProbeError::UnknownContext(ctx));
        }
        if state.subscribers.contains_key(&ctx) {
            return Err(ProbeError::AlreadySubscribed(ctx));
        }
        state.subscribers.insert(ctx, sink);
        Ok(())
    }

    fn unsubscribe(&self, ctx: ContextId) {
        self.state.lock().subscribers.remove(&ctx);
    }

    fn detach(&self, ctx: ContextId) {
        let mut state = self.state.lock();
        state.subscribers.remove(&ctx);
        state.heaps.remove(&ctx);
    }
}
