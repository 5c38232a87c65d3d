//! Allocation-tracking probe.
//!
//! [`TrackingAllocator`] wraps the system allocator and attributes every
//! allocation and deallocation made on a thread to the context that thread is
//! currently bound to. [`AllocationProbe`] reads those balances back as heap
//! snapshots. Rust frees memory deterministically, so there are no collection
//! events: memory released during the callable is already reflected in the
//! second snapshot.
//!
//! The allocator must be installed by the final binary:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: heapmeter_measure::TrackingAllocator = heapmeter_measure::TrackingAllocator::new();
//! ```

#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crate::error::ProbeError;
use crate::types::{ContextId, HeapSnapshot};

use super::{EventSink, HeapProbe, word_size};

/// Number of measurements that can be tracked at the same time.
pub const CAPACITY: usize = 64;

const NO_SLOT: usize = usize::MAX;
const SLOT_BITS: u32 = 16;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static CLAIMED: [AtomicBool; CAPACITY] = [const { AtomicBool::new(false) }; CAPACITY];
static GENERATION: [AtomicU64; CAPACITY] = [const { AtomicU64::new(0) }; CAPACITY];
static LIVE: [AtomicI64; CAPACITY] = [const { AtomicI64::new(0) }; CAPACITY];

thread_local! {
    // Const-initialized with no destructor so access never allocates.
    static ACTIVE: Cell<usize> = const { Cell::new(NO_SLOT) };
}

fn record(delta: i64) {
    let slot = ACTIVE.try_with(Cell::get).unwrap_or(NO_SLOT);
    if let Some(live) = LIVE.get(slot) {
        live.fetch_add(delta, Ordering::Relaxed);
    }
}

fn bytes(size: usize) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Global allocator that attributes heap traffic to measurement contexts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingAllocator;

impl TrackingAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Whether this allocator is serving allocations in the current binary.
    #[must_use]
    pub fn is_installed() -> bool {
        INSTALLED.load(Ordering::Relaxed)
    }

    fn mark_installed() {
        if !INSTALLED.load(Ordering::Relaxed) {
            INSTALLED.store(true, Ordering::Relaxed);
        }
    }
}

// SAFETY: every call delegates to `System`, which upholds the GlobalAlloc
// contract. Bookkeeping only touches atomics and a const thread-local.
unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        Self::mark_installed();
        // SAFETY: caller upholds the layout contract for `System`.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            record(bytes(layout.size()));
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        Self::mark_installed();
        // SAFETY: caller upholds the layout contract for `System`.
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record(bytes(layout.size()));
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: ptr was allocated by `System` with the same layout.
        unsafe { System.dealloc(ptr, layout) };
        record(bytes(layout.size()).wrapping_neg());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: ptr was allocated by `System` with `layout`.
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            record(bytes(new_size).wrapping_sub(bytes(layout.size())));
        }
        new_ptr
    }
}

const fn encode(slot: usize, generation: u64) -> ContextId {
    ContextId::new(generation.wrapping_shl(SLOT_BITS) | (slot as u64 & SLOT_MASK))
}

/// Probe reading the balances kept by [`TrackingAllocator`].
///
/// Young size is the live bytes allocated by the context, rounded up to
/// whole words; old size is always zero. Snapshots are unavailable when the
/// allocator is not installed or when the context freed more than it
/// allocated (it released memory it did not own).
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationProbe;

impl AllocationProbe {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Resolve a context to its slot if it is still the live claim.
    fn slot(ctx: ContextId) -> Option<usize> {
        let slot = usize::try_from(ctx.raw() & SLOT_MASK).ok()?;
        let generation = ctx.raw().wrapping_shr(SLOT_BITS);
        let claimed = CLAIMED.get(slot)?.load(Ordering::Acquire);
        let current = GENERATION.get(slot)?.load(Ordering::Acquire);
        (claimed && current == generation).then_some(slot)
    }
}

impl HeapProbe for AllocationProbe {
    fn name(&self) -> &'static str {
        "allocation"
    }

    fn word_size(&self) -> u64 {
        word_size()
    }

    fn attach(&self) -> Result<ContextId, ProbeError> {
        CLAIMED
            .iter()
            .enumerate()
            .find_map(|(slot, claimed)| {
                claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .ok()
                    .map(|_| slot)
            })
            .and_then(|slot| {
                LIVE.get(slot)?.store(0, Ordering::Release);
                let generation = GENERATION
                    .get(slot)?
                    .fetch_add(1, Ordering::AcqRel)
                    .wrapping_add(1);
                Some(encode(slot, generation))
            })
            .ok_or(ProbeError::Exhausted { capacity: CAPACITY })
    }

    fn enter(&self, ctx: ContextId) {
        if let Some(slot) = Self::slot(ctx) {
            let _ = ACTIVE.try_with(|active| active.set(slot));
        }
    }

    fn exit(&self, _ctx: ContextId) {
        let _ = ACTIVE.try_with(|active| active.set(NO_SLOT));
    }

    fn snapshot(&self, ctx: ContextId) -> Option<HeapSnapshot> {
        if !TrackingAllocator::is_installed() {
            return None;
        }
        let slot = Self::slot(ctx)?;
        let live = u64::try_from(LIVE.get(slot)?.load(Ordering::Acquire)).ok()?;
        Some(HeapSnapshot::new(live.div_ceil(self.word_size()), 0))
    }

    fn subscribe(&self, ctx: ContextId, _sink: EventSink) -> Result<(), ProbeError> {
        Self::slot(ctx)
            .map(|_| ())
            .ok_or(ProbeError::UnknownContext(ctx))
    }

    fn unsubscribe(&self, _ctx: ContextId) {}

    fn detach(&self, ctx: ContextId) {
        if let Some(claimed) = Self::slot(ctx).and_then(|slot| CLAIMED.get(slot)) {
            claimed.store(false, Ordering::Release);
        }
    }
}
