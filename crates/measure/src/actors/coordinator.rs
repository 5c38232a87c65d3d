//! Coordinator actor: the caller-facing end of one measurement.
//!
//! The coordinator issues the invocation's correlation token, spawns the
//! executor linked to itself, and answers on a oneshot channel once the
//! executor has terminated. Supervision events are delivered ahead of
//! ordinary messages, so the executor reports with an acknowledged call
//! before it stops; by the time `ActorTerminated` arrives the report (if any)
//! is already recorded.

use std::marker::PhantomData;
use std::sync::Arc;

use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::MeasureConfig;
use crate::error::MeasureError;
use crate::probe::HeapProbe;
use crate::types::{CorrelationToken, MeasurementResult};

use super::executor::{ExecutorActor, ExecutorArguments};
use super::messages::{CoordinatorMessage, ExecutorReport};

/// Arguments for the coordinator actor.
pub struct CoordinatorArguments<T, F> {
    /// The callable under measurement.
    pub work: F,
    /// Heap introspection.
    pub probe: Arc<dyn HeapProbe>,
    /// Protocol timeouts.
    pub config: MeasureConfig,
    /// Where the final answer goes.
    pub reply: oneshot::Sender<MeasurementResult<T>>,
}

/// State for the coordinator actor.
pub struct CoordinatorState<T> {
    token: CorrelationToken,
    executor: ActorCell,
    report: Option<ExecutorReport<T>>,
    reply: Option<oneshot::Sender<MeasurementResult<T>>>,
}

impl<T> CoordinatorState<T> {
    /// Send the final answer, once.
    fn finish(&mut self) {
        let result = match self.report.take() {
            Some(ExecutorReport::Completed(result)) => result,
            Some(ExecutorReport::Failed) | None => MeasurementResult::failed(),
        };
        if let Some(reply) = self.reply.take() {
            if reply.send(result).is_err() {
                debug!(token = %self.token, "Caller stopped waiting for the result");
            }
        }
    }

    fn is_executor(&self, cell: &ActorCell) -> bool {
        cell.get_id() == self.executor.get_id()
    }
}

/// Definition for the coordinator actor.
pub struct CoordinatorActor<T, F>(PhantomData<fn() -> (T, F)>);

impl<T, F> CoordinatorActor<T, F> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T, F> Default for CoordinatorActor<T, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, F> Actor for CoordinatorActor<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    type Msg = CoordinatorMessage<T>;
    type State = CoordinatorState<T>;
    type Arguments = CoordinatorArguments<T, F>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let token = CorrelationToken::new();
        let executor_args = ExecutorArguments {
            work: args.work,
            token,
            coordinator: myself.clone(),
            probe: args.probe,
            config: args.config,
        };

        let (executor, _handle) = Actor::spawn_linked(
            None,
            ExecutorActor::<T, F>::new(),
            executor_args,
            myself.get_cell(),
        )
        .await
        .map_err(|e| MeasureError::spawn_failed(format!("Failed to spawn executor: {e}")))?;

        debug!(token = %token, "Coordinator started");
        Ok(CoordinatorState {
            token,
            executor: executor.get_cell(),
            report: None,
            reply: Some(args.reply),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMessage::Report { token, report, ack } => {
                if token != state.token {
                    warn!(expected = %state.token, received = %token, "Ignoring report with stale token");
                } else if state.report.is_some() {
                    warn!(token = %token, "Ignoring duplicate report");
                } else {
                    state.report = Some(report);
                }
                if ack.send(()).is_err() {
                    debug!(token = %token, "Executor stopped waiting for the ack");
                }
            }
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, executor_state, reason)
                if state.is_executor(&cell) =>
            {
                debug!(token = %state.token, reason = ?reason, "Executor terminated");
                // A killed executor skips post_stop; its context goes with its state.
                drop(executor_state);
                state.finish();
                myself.stop(None);
            }
            SupervisionEvent::ActorFailed(cell, error) if state.is_executor(&cell) => {
                warn!(token = %state.token, error = %error, "Executor failed");
                state.finish();
                myself.stop(None);
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
        // Stopped from outside before the executor finished.
        if state.reply.is_some() {
            state.executor.stop(Some("coordinator stopped".to_string()));
            state.report = None;
            state.finish();
        }
        info!(token = %state.token, "Coordinator stopped");
        Ok(())
    }
}
