//! # Heapmeter measurement protocol
//!
//! Measures the net heap retained by one invocation of a zero-argument
//! callable, reconciling the before/after heap delta of the callable's own
//! execution context with the memory reclaimed by collections observed on
//! that context while it ran.
//!
//! The protocol runs as three ractor actors:
//! - **Coordinator**: caller-facing, supervises the executor, returns the answer
//! - **Executor**: runs the callable between two heap snapshots
//! - **Observer**: accumulates memory reclaimed by collections on the executor's context
//!
//! Heap introspection goes through the [`HeapProbe`] seam so the protocol is
//! the same whether the numbers come from the [`TrackingAllocator`], a managed
//! runtime embedding (see [`SimulatedRuntime`]) or nowhere at all
//! ([`UnsupportedProbe`]).
//!
//! # Example
//!
//! ```ignore
//! use heapmeter_measure::{Meter, TrackingAllocator, AllocationProbe};
//!
//! #[global_allocator]
//! static ALLOC: TrackingAllocator = TrackingAllocator::new();
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = Meter::new(AllocationProbe::new())
//!         .measure(|| vec![0u8; 4096])
//!         .await;
//!     println!("{:?}", result.bytes);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod actors;
pub mod config;
pub mod error;
pub mod meter;
pub mod probe;
pub mod types;

pub use config::MeasureConfig;
pub use error::{MeasureError, ProbeError};
pub use meter::{Meter, measure, measure_with};
pub use probe::{
    AllocationProbe, ContextLease, EventSink, HeapProbe, SimulatedRuntime, TraceEvent, TraceKind,
    TrackingAllocator, UnsupportedProbe,
};
pub use types::{
    ContextId, CorrelationToken, GcKind, HeapSnapshot, MeasurementResult, Outcome, net_bytes,
};

/// Result type for fallible heapmeter operations.
pub type Result<T> = std::result::Result<T, MeasureError>;
