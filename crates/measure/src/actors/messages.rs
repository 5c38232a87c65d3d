//! Messages exchanged by the measurement actors.
//!
//! Design principles:
//! - Trace events and commands are fire-and-forget (`send_message`)
//! - Queries and reports carry an `RpcReplyPort` (`call`)
//! - Every reply that could be confused with another carries a `CorrelationToken`

use std::fmt;

use ractor::RpcReplyPort;

use crate::probe::TraceEvent;
use crate::types::{CorrelationToken, MeasurementResult};

/// Messages for the ObserverActor.
pub enum ObserverMessage {
    /// A trace record forwarded from the probe's subscription.
    Trace(TraceEvent),

    /// Ask for the accumulated collected total, in words.
    CollectedTotal {
        /// Echoed back with the reply.
        token: CorrelationToken,
        /// Reply port for `(token, total)`.
        reply: RpcReplyPort<(CorrelationToken, i64)>,
    },
}

impl fmt::Debug for ObserverMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace(event) => f.debug_tuple("Trace").field(event).finish(),
            Self::CollectedTotal { token, .. } => f
                .debug_struct("CollectedTotal")
                .field("token", token)
                .finish_non_exhaustive(),
        }
    }
}

/// Messages for the ExecutorActor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorMessage {
    /// Run the measured section. Sent once by the executor to itself.
    Run,
}

/// What the executor reports to the coordinator.
#[derive(Debug)]
pub enum ExecutorReport<T> {
    /// The callable returned; the result carries the measurement.
    Completed(MeasurementResult<T>),
    /// The callable aborted; no measurement is available.
    Failed,
}

/// Messages for the CoordinatorActor.
pub enum CoordinatorMessage<T> {
    /// The executor's single outcome for this invocation.
    Report {
        /// Token the coordinator issued for this invocation.
        token: CorrelationToken,
        /// The outcome.
        report: ExecutorReport<T>,
        /// Acknowledged once the report is recorded.
        ack: RpcReplyPort<()>,
    },
}

impl<T> fmt::Debug for CoordinatorMessage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Report { token, report, .. } => {
                let outcome = match report {
                    ExecutorReport::Completed(_) => "completed",
                    ExecutorReport::Failed => "failed",
                };
                f.debug_struct("Report")
                    .field("token", token)
                    .field("report", &outcome)
                    .finish_non_exhaustive()
            }
        }
    }
}
