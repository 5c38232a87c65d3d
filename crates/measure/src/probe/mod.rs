//! Heap introspection seam.
//!
//! The protocol needs two things from the runtime hosting the measured work:
//! per-context heap snapshots and a feed of that context's collection events.
//! [`HeapProbe`] abstracts both so the actors never know where the numbers
//! come from.
//!
//! # Implementations
//!
//! - [`AllocationProbe`]: live bytes attributed by the [`TrackingAllocator`]
//! - [`SimulatedRuntime`]: a generational heap model driven by the measured work
//! - [`UnsupportedProbe`]: no introspection; every measurement is unmeasurable

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::ProbeError;
use crate::types::{ContextId, GcKind, HeapSnapshot};

pub mod alloc;
pub mod simulated;

pub use alloc::{AllocationProbe, TrackingAllocator};
pub use simulated::SimulatedRuntime;

/// One trace record delivered for a watched context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Context the event happened on.
    pub context: ContextId,
    /// What happened.
    pub kind: TraceKind,
}

/// Trace record payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    /// A collection is starting; `heap` is the size before it ran.
    CollectionStart { gc: GcKind, heap: HeapSnapshot },
    /// A collection finished; `heap` is the size after it ran.
    CollectionEnd { gc: GcKind, heap: HeapSnapshot },
    /// Runtime-specific record the protocol does not interpret.
    Auxiliary { label: String },
}

impl TraceEvent {
    #[must_use]
    pub const fn collection_start(context: ContextId, gc: GcKind, heap: HeapSnapshot) -> Self {
        Self {
            context,
            kind: TraceKind::CollectionStart { gc, heap },
        }
    }

    #[must_use]
    pub const fn collection_end(context: ContextId, gc: GcKind, heap: HeapSnapshot) -> Self {
        Self {
            context,
            kind: TraceKind::CollectionEnd { gc, heap },
        }
    }

    pub fn auxiliary(context: ContextId, label: impl Into<String>) -> Self {
        Self {
            context,
            kind: TraceKind::Auxiliary {
                label: label.into(),
            },
        }
    }
}

/// Callback receiving the trace events of one subscribed context.
///
/// Called synchronously from whatever thread the runtime raises the event
/// on, so implementations must not block.
pub type EventSink = Arc<dyn Fn(TraceEvent) + Send + Sync>;

/// Runtime heap introspection used by the executor and observer.
///
/// A context is opened per measurement with [`attach`](Self::attach) and
/// released with [`detach`](Self::detach). The executor brackets its
/// synchronous measured section with [`enter`](Self::enter) and
/// [`exit`](Self::exit) on the thread that runs the callable.
pub trait HeapProbe: Send + Sync + 'static {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Size of one heap word in bytes.
    fn word_size(&self) -> u64;

    /// Open a fresh context for one measurement.
    ///
    /// # Errors
    ///
    /// Returns error if no context can be opened.
    fn attach(&self) -> Result<ContextId, ProbeError>;

    /// Bind the calling thread to `ctx`.
    fn enter(&self, ctx: ContextId);

    /// Unbind the calling thread from `ctx`.
    fn exit(&self, ctx: ContextId);

    /// Current heap size of `ctx`; `None` when introspection has no valid answer.
    fn snapshot(&self, ctx: ContextId) -> Option<HeapSnapshot>;

    /// Deliver the trace events of `ctx` to `sink`.
    ///
    /// # Errors
    ///
    /// Returns error if the context is unknown or already watched.
    fn subscribe(&self, ctx: ContextId, sink: EventSink) -> Result<(), ProbeError>;

    /// Stop delivering events for `ctx`.
    fn unsubscribe(&self, ctx: ContextId);

    /// Release `ctx`.
    fn detach(&self, ctx: ContextId);
}

impl fmt::Debug for dyn HeapProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapProbe")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// An attached context that is detached when released or dropped.
///
/// Actors that are killed skip `post_stop`, but their state is still
/// dropped, so holding the context here is what guarantees it is released.
pub struct ContextLease {
    probe: Arc<dyn HeapProbe>,
    id: ContextId,
    released: bool,
}

impl ContextLease {
    /// Attach a fresh context on `probe`.
    ///
    /// # Errors
    ///
    /// Returns error if the probe cannot open a context.
    pub fn attach(probe: Arc<dyn HeapProbe>) -> Result<Self, ProbeError> {
        let id = probe.attach()?;
        Ok(Self {
            probe,
            id,
            released: false,
        })
    }

    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Detach the context (idempotent).
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.probe.detach(self.id);
        self.released = true;
        debug!(context = %self.id, probe = self.probe.name(), "Context released");
    }
}

impl fmt::Debug for ContextLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLease")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Probe for platforms without heap introspection.
///
/// Contexts attach and subscriptions succeed so the full protocol still runs,
/// but snapshots are never available and every measurement reports
/// `bytes: None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedProbe;

impl HeapProbe for UnsupportedProbe {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn word_size(&self) -> u64 {
        word_size()
    }

    fn attach(&self) -> Result<ContextId, ProbeError> {
        Ok(ContextId::new(0))
    }

    fn enter(&self, _ctx: ContextId) {}

    fn exit(&self, _ctx: ContextId) {}

    fn snapshot(&self, _ctx: ContextId) -> Option<HeapSnapshot> {
        None
    }

    fn subscribe(&self, _ctx: ContextId, _sink: EventSink) -> Result<(), ProbeError> {
        Ok(())
    }

    fn unsubscribe(&self, _ctx: ContextId) {}

    fn detach(&self, _ctx: ContextId) {}
}

/// Native word size of the host.
#[must_use]
pub const fn word_size() -> u64 {
    std::mem::size_of::<usize>() as u64
}
