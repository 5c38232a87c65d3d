//! Executor actor: runs the callable between two heap snapshots.
//!
//! `pre_start` attaches a fresh context and spawns the observer linked to
//! the executor; spawn only returns once the observer subscribed, so it is
//! armed before the first snapshot. `Run` then executes the measured section
//! synchronously on the current thread, asks the observer for its collected
//! total, and reports exactly once to the coordinator.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, SupervisionEvent};
use tracing::{debug, info, warn};

use crate::config::MeasureConfig;
use crate::error::MeasureError;
use crate::probe::{ContextLease, HeapProbe};
use crate::types::{ContextId, CorrelationToken, HeapSnapshot, MeasurementResult, net_bytes};

use super::messages::{CoordinatorMessage, ExecutorMessage, ExecutorReport, ObserverMessage};
use super::observer::{ObserverActor, ObserverArguments};

/// Arguments for the executor actor.
pub struct ExecutorArguments<T, F> {
    /// The callable under measurement.
    pub work: F,
    /// Token of this invocation.
    pub token: CorrelationToken,
    /// Where to report.
    pub coordinator: ActorRef<CoordinatorMessage<T>>,
    /// Heap introspection.
    pub probe: Arc<dyn HeapProbe>,
    /// Protocol timeouts.
    pub config: MeasureConfig,
}

/// State for the executor actor.
pub struct ExecutorState<T, F> {
    work: Option<F>,
    token: CorrelationToken,
    coordinator: ActorRef<CoordinatorMessage<T>>,
    probe: Arc<dyn HeapProbe>,
    config: MeasureConfig,
    context: Option<ContextLease>,
    observer: ObserverLink,
}

/// The executor's handle on its observer.
///
/// `armed` is fixed in `pre_start`: an observer that was subscribed before
/// the first snapshot and is lost afterwards still counts as armed, and its
/// collected total is taken as zero.
#[derive(Debug)]
struct ObserverLink {
    observer: Option<ActorRef<ObserverMessage>>,
    armed: bool,
}

impl ObserverLink {
    fn armed(observer: ActorRef<ObserverMessage>) -> Self {
        Self {
            observer: Some(observer),
            armed: true,
        }
    }

    const fn unarmed() -> Self {
        Self {
            observer: None,
            armed: false,
        }
    }

    const fn is_armed(&self) -> bool {
        self.armed
    }

    fn current(&self) -> Option<&ActorRef<ObserverMessage>> {
        self.observer.as_ref()
    }

    fn take(&mut self) -> Option<ActorRef<ObserverMessage>> {
        self.observer.take()
    }

    /// Drop the reference if `cell` is the observer; returns whether it was.
    fn forget(&mut self, cell: &ActorCell) -> bool {
        let matches = self
            .observer
            .as_ref()
            .is_some_and(|observer| observer.get_id() == cell.get_id());
        if matches {
            self.observer = None;
        }
        matches
    }
}

/// Snapshots and outcome of the synchronous measured section.
struct Section<T> {
    before: Option<HeapSnapshot>,
    after: Option<HeapSnapshot>,
    value: std::thread::Result<T>,
}

/// Run `work` bound to `context`, bracketed by two snapshots.
///
/// Nothing in here may allocate besides the callable itself: the allocation
/// probe attributes every byte allocated on this thread to the context.
fn run_section<T>(
    probe: &dyn HeapProbe,
    context: Option<ContextId>,
    work: impl FnOnce() -> T,
) -> Section<T> {
    if let Some(ctx) = context {
        probe.enter(ctx);
    }
    let before = context.and_then(|ctx| probe.snapshot(ctx));
    let value = panic::catch_unwind(AssertUnwindSafe(work));
    let after = match (&value, context) {
        (Ok(_), Some(ctx)) => probe.snapshot(ctx),
        _ => None,
    };
    if let Some(ctx) = context {
        probe.exit(ctx);
    }
    Section {
        before,
        after,
        value,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Ask the observer for its collected total; `None` when it cannot answer.
async fn request_collected_total(
    observer: &ActorRef<ObserverMessage>,
    timeout: Duration,
) -> Option<i64> {
    let token = CorrelationToken::new();
    let result = observer
        .call(
            |reply| ObserverMessage::CollectedTotal { token, reply },
            Some(timeout),
        )
        .await;

    match result {
        Ok(CallResult::Success((echoed, total))) if echoed == token => Some(total),
        Ok(CallResult::Success((echoed, _))) => {
            warn!(expected = %token, received = %echoed, "Stale collected total reply, ignoring");
            None
        }
        Ok(CallResult::Timeout) => {
            warn!(timeout_ms = timeout.as_millis(), "Observer did not answer in time");
            None
        }
        Ok(CallResult::SenderError) => {
            warn!("Observer dropped the collected total request");
            None
        }
        Err(_) => {
            warn!(error = %MeasureError::ActorUnavailable, "Observer unreachable");
            None
        }
    }
}

/// Definition for the executor actor.
pub struct ExecutorActor<T, F>(PhantomData<fn() -> (T, F)>);

impl<T, F> ExecutorActor<T, F> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T, F> Default for ExecutorActor<T, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F> ExecutorActor<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    /// Stop the observer and wait for it to unsubscribe.
    async fn stop_observer(state: &mut ExecutorState<T, F>) {
        if let Some(observer) = state.observer.take() {
            let stopped = observer
                .stop_and_wait(
                    Some("measurement finished".to_string()),
                    Some(state.config.shutdown_timeout()),
                )
                .await;
            if stopped.is_err() {
                warn!(token = %state.token, "Observer did not stop in time");
            }
        }
    }

    /// Deliver the single outcome of this invocation.
    async fn report(state: &mut ExecutorState<T, F>, report: ExecutorReport<T>) {
        let token = state.token;
        let timeout = state.config.report_timeout();
        let acked = state
            .coordinator
            .call(
                |ack| CoordinatorMessage::Report { token, report, ack },
                Some(timeout),
            )
            .await;
        match acked {
            Ok(CallResult::Success(())) => debug!(token = %token, "Report acknowledged"),
            _ => warn!(token = %token, "Coordinator did not acknowledge report"),
        }
    }

    async fn run(
        myself: &ActorRef<ExecutorMessage>,
        state: &mut ExecutorState<T, F>,
    ) -> Result<(), ActorProcessingErr> {
        let Some(work) = state.work.take() else {
            debug!(token = %state.token, "Callable already ran, ignoring Run");
            return Ok(());
        };

        let context = state.context.as_ref().map(ContextLease::id);
        let section = run_section(state.probe.as_ref(), context, work);

        let value = match section.value {
            Ok(value) => value,
            Err(payload) => {
                warn!(
                    token = %state.token,
                    reason = panic_message(payload.as_ref()),
                    "Callable aborted"
                );
                Self::stop_observer(state).await;
                Self::report(state, ExecutorReport::Failed).await;
                myself.stop(None);
                return Ok(());
            }
        };

        debug!(token = %state.token, before = ?section.before, after = ?section.after, "Heap snapshots");

        let collected = match state.observer.current() {
            Some(observer) => request_collected_total(observer, state.config.observer_timeout())
                .await
                .unwrap_or(0),
            None if state.observer.is_armed() => {
                warn!(token = %state.token, "Observer lost, counting collected total as zero");
                0
            }
            None => 0,
        };

        // Without an armed observer collections went unseen.
        let armed = state.observer.is_armed();
        let bytes = match (section.before, section.after) {
            (Some(before), Some(after)) if armed => {
                net_bytes(before, after, collected, state.probe.word_size())
            }
            _ => None,
        };

        info!(token = %state.token, collected, bytes = ?bytes, "Measurement complete");

        Self::stop_observer(state).await;
        Self::report(
            state,
            ExecutorReport::Completed(MeasurementResult::measured(bytes, value)),
        )
        .await;
        myself.stop(None);
        Ok(())
    }
}

impl<T, F> Actor for ExecutorActor<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    type Msg = ExecutorMessage;
    type State = ExecutorState<T, F>;
    type Arguments = ExecutorArguments<T, F>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let context = match ContextLease::attach(Arc::clone(&args.probe)) {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!(token = %args.token, error = %e, "No measurement context available");
                None
            }
        };

        let observer = match &context {
            Some(lease) => {
                let observer_args = ObserverArguments {
                    context: lease.id(),
                    probe: Arc::clone(&args.probe),
                };
                match Actor::spawn_linked(None, ObserverActor, observer_args, myself.get_cell())
                    .await
                {
                    Ok((observer, _handle)) => ObserverLink::armed(observer),
                    Err(e) => {
                        warn!(token = %args.token, error = %e, "Failed to arm observer");
                        ObserverLink::unarmed()
                    }
                }
            }
            None => ObserverLink::unarmed(),
        };

        let mut state = ExecutorState {
            work: Some(args.work),
            token: args.token,
            coordinator: args.coordinator,
            probe: args.probe,
            config: args.config,
            context,
            observer,
        };

        if myself.send_message(ExecutorMessage::Run).is_err() {
            Self::stop_observer(&mut state).await;
            if let Some(lease) = state.context.as_mut() {
                lease.release();
            }
            return Err(MeasureError::ActorUnavailable.into());
        }

        debug!(
            token = %state.token,
            context = ?state.context.as_ref().map(ContextLease::id),
            armed = state.observer.is_armed(),
            "Executor started"
        );
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ExecutorMessage::Run => Self::run(&myself, state).await,
        }
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, error) => {
                if state.observer.forget(&cell) {
                    warn!(token = %state.token, error = %error, "Observer failed");
                }
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if state.observer.forget(&cell) {
                    debug!(token = %state.token, reason = ?reason, "Observer terminated");
                }
            }
            other => {
                debug!(token = %state.token, event = ?other, "Ignoring supervision event");
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        Self::stop_observer(state).await;
        if let Some(lease) = state.context.as_mut() {
            lease.release();
        }
        debug!(token = %state.token, "Executor stopped");
        Ok(())
    }
}
