//! Bounded-concurrency event dispatch.
//!
//! One consumer loop pulls events from the transport channel. Each event gets
//! its own task holding one semaphore permit, so a full pool stalls the loop
//! and, through the bounded channel, the transport listener.

use std::sync::Arc;

use async_trait::async_trait;
use relay_channels::InboundEvent;
use relay_common::event_span;
use relay_common::logging::generate_trace_id;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

/// Processes one inbound event.
///
/// Errors are logged by the dispatcher and never retried.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: InboundEvent) -> anyhow::Result<()>;
}

/// Totals for one dispatcher run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl DispatchStats {
    fn record(&mut self, result: Result<anyhow::Result<()>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => self.completed += 1,
            Ok(Err(e)) => {
                self.failed += 1;
                tracing::error!(error = %format!("{e:#}"), "Event handler failed");
            }
            Err(join_err) if join_err.is_panic() => {
                self.panicked += 1;
                tracing::error!(error = %join_err, "Event handler panicked");
            }
            Err(join_err) => {
                self.failed += 1;
                tracing::warn!(error = %join_err, "Event handler cancelled");
            }
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.panicked
    }
}

pub struct Dispatcher<H> {
    handler: Arc<H>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl<H: EventHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            handler,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Dispatch events until `rx` closes, then wait for in-flight handlers.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundEvent>) -> DispatchStats {
        let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
        let mut stats = DispatchStats::default();

        tracing::info!(max_concurrent = self.max_concurrent, "Dispatcher started");

        while let Some(event) = rx.recv().await {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!("Dispatcher semaphore closed");
                    break;
                }
            };

            while let Some(result) = tasks.try_join_next() {
                stats.record(result);
            }

            let trace_id = generate_trace_id();
            let span = event_span!(
                trace_id,
                user_id = event.user_id(),
                chat_id = event.chat_id(),
                kind = event.kind()
            );
            let handler = self.handler.clone();

            tasks.spawn(
                async move {
                    let _permit = permit;
                    tracing::debug!("Event received");
                    handler.handle(event).await
                }
                .instrument(span),
            );
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Event stream closed, draining in-flight events");
        }
        while let Some(result) = tasks.join_next().await {
            stats.record(result);
        }

        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            panicked = stats.panicked,
            "Dispatcher stopped"
        );
        stats
    }
}
