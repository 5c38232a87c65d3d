//! Actor-based measurement protocol.
//!
//! This module provides the ractor actors that carry out one measurement
//! with message-passing concurrency and supervision.
//!
//! # Architecture
//!
//! The actors follow Erlang-inspired patterns:
//! - **Message passing**: Actors communicate via messages, no shared mutable state
//! - **Process isolation**: Each actor owns its state exclusively
//! - **Supervision**: The coordinator supervises the executor, the executor the observer
//! - **Graceful degradation**: A failed callable or observer is reported, never re-raised
//!
//! # Components
//!
//! - `CoordinatorActor`: issues the correlation token and returns the answer
//! - `ExecutorActor`: runs the callable between two heap snapshots
//! - `ObserverActor`: accumulates memory reclaimed by collections
//!
//! One invocation creates one of each; all three have terminated by the
//! time the caller gets its answer.

pub mod coordinator;
pub mod executor;
pub mod messages;
pub mod observer;

// Re-export main types for convenience
pub use coordinator::{CoordinatorActor, CoordinatorArguments, CoordinatorState};
pub use executor::{ExecutorActor, ExecutorArguments, ExecutorState};
pub use messages::{CoordinatorMessage, ExecutorMessage, ExecutorReport, ObserverMessage};
pub use observer::{ObserverActor, ObserverArguments, ObserverPhase, ObserverState, Transition};
