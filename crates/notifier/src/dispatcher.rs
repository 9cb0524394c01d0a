//! Broadcast dispatcher.
//!
//! Fans one notification out to every subscriber:
//! 1. Records without a chat id are skipped without touching the transport
//! 2. Valid records are sent concurrently, at most `max_concurrency` at a time
//! 3. Each send fails on its own; failures are logged and counted, never raised
//! 4. The report is built only after every issued send has settled
//!
//! A deadline or shutdown signal stops new sends from being issued. Records
//! reached after that point are reported as skipped, and sends already in
//! flight are still awaited.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use herald_common::error::{AppError, DeliveryError};
use herald_common::types::{
    BatchReport, DispatchOutcome, NotificationPayload, SkipReason, SubscriberRecord,
};

use crate::source::SubscriberSource;
use crate::transport::MessageTransport;

/// Default number of sends allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 25;

/// Invoked for recipients the transport reports as permanently unreachable.
///
/// The dispatcher only calls this; what to do about such recipients (for
/// example unsubscribing them) is up to the implementation.
#[async_trait]
pub trait PermanentFailureHook: Send + Sync {
    async fn on_permanent_failure(&self, recipient_id: &str, error: &DeliveryError);
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrency: usize,
    pub deadline: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline: None,
        }
    }
}

pub struct Dispatcher {
    transport: Arc<dyn MessageTransport>,
    config: DispatcherConfig,
    hook: Option<Arc<dyn PermanentFailureHook>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn MessageTransport>, config: DispatcherConfig) -> Self {
        Self {
            transport,
            config,
            hook: None,
            shutdown: None,
        }
    }

    pub fn with_permanent_failure_hook(mut self, hook: Arc<dyn PermanentFailureHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Stop issuing new sends once `true` is published on this channel.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Fetch the subscriber list and dispatch to it.
    ///
    /// A source failure aborts before any send is issued.
    pub async fn broadcast(
        &self,
        source: &dyn SubscriberSource,
        payload: &NotificationPayload,
    ) -> Result<BatchReport, AppError> {
        tracing::info!("Starting broadcast");

        let records = source.fetch_all().await?;
        if records.is_empty() {
            tracing::info!("No subscribers found");
        }

        Ok(self.run(records, payload).await)
    }

    /// Deliver `payload` to every record and summarize the outcomes.
    pub async fn run(
        &self,
        records: Vec<SubscriberRecord>,
        payload: &NotificationPayload,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("broadcast", run_id = %run_id);

        async {
            let deadline = self.config.deadline.map(|d| Instant::now() + d);
            let max_concurrency = self.config.max_concurrency.max(1);
            let mut tally = BatchReport::tally(run_id);

            tracing::info!(
                recipients = records.len(),
                max_concurrency,
                deadline_secs = self.config.deadline.map(|d| d.as_secs()),
                "Dispatching"
            );

            let mut outcomes = stream::iter(records)
                .map(|record| self.dispatch_one(record, payload, deadline))
                .buffer_unordered(max_concurrency);

            while let Some(outcome) = outcomes.next().await {
                tally.record(&outcome);
            }

            let report = tally.finish();
            tracing::info!(
                attempted = report.attempted,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                permanent_failures = report.permanent_failures,
                "Broadcast complete"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn dispatch_one(
        &self,
        record: SubscriberRecord,
        payload: &NotificationPayload,
        deadline: Option<Instant>,
    ) -> DispatchOutcome {
        let Some(chat_id) = record.recipient_id() else {
            tracing::debug!(subscriber_id = %record.id, "Skipping subscriber without chat id");
            return DispatchOutcome::Skipped(SkipReason::MissingIdentifier);
        };

        if self.is_cancelled(deadline) {
            tracing::debug!(chat_id, "Broadcast cancelled, not sending");
            return DispatchOutcome::Skipped(SkipReason::Cancelled);
        }

        let result = AssertUnwindSafe(self.transport.send(chat_id, payload))
            .catch_unwind()
            .await
            .unwrap_or(Err(DeliveryError::Panicked));

        match result {
            Ok(()) => {
                tracing::info!(chat_id, "Message sent");
                DispatchOutcome::Sent
            }
            Err(err) => {
                tracing::warn!(
                    chat_id,
                    code = err.code(),
                    permanent = err.is_permanent(),
                    error = %err,
                    "Failed to send message"
                );

                if err.is_permanent() {
                    if let Some(hook) = &self.hook {
                        let hook_result =
                            AssertUnwindSafe(hook.on_permanent_failure(chat_id, &err))
                                .catch_unwind()
                                .await;
                        if hook_result.is_err() {
                            tracing::warn!(chat_id, "Permanent failure hook panicked");
                        }
                    }
                }

                DispatchOutcome::Failed(err)
            }
        }
    }

    fn is_cancelled(&self, deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
            || self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
