//! Resilient consumer harness: retry, backoff, dead-lettering, manual
//! per-record commits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::producer::TRACE_HEADER;
use super::{BusError, ConsumerRecord, ProducerRecord, RecordPublisher, RecordStream};
use crate::context::{EntryPoint, RequestContext};

/// Pause after a failed poll, to avoid a tight error loop.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// What to do when a dead-letter publish itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqPolicy {
    /// Return the error; the record stays uncommitted and the process is
    /// expected to exit and be restarted by the orchestrator.
    Strict,
    /// Log, commit, and proceed; bias towards liveness.
    Permissive,
}

/// Per-topic consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to consume.
    pub topic: String,
    /// Consumer group id.
    pub group: String,
    /// Handler attempts before dead-lettering. Zero retries forever.
    pub max_retries: u32,
    /// First retry delay.
    pub initial_backoff: Duration,
    /// Retry delay ceiling.
    pub max_backoff: Duration,
    /// Dead-letter topic; `None` derives `<topic>.dlq`.
    pub dlq_topic: Option<String>,
    /// Behaviour when the dead-letter publish fails.
    pub dlq_policy: DlqPolicy,
}

impl ConsumerConfig {
    /// Defaults for a topic/group pair.
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            dlq_topic: None,
            dlq_policy: DlqPolicy::Strict,
        }
    }

    /// The effective dead-letter topic.
    ///
    /// Always resolvable: records are never dropped for want of
    /// configuration.
    pub fn dead_letter_topic(&self) -> String {
        self.dlq_topic
            .clone()
            .unwrap_or_else(|| format!("{}.dlq", self.topic))
    }
}

/// Processes one record at a time.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Handles one delivery. An error triggers the retry loop.
    async fn handle(
        &self,
        ctx: RequestContext,
        record: &ConsumerRecord,
    ) -> Result<(), anyhow::Error>;
}

enum Interrupted {
    Cancelled,
    DeadLetterFailed(BusError),
}

/// One worker consuming one topic.
pub struct Consumer<S, P> {
    stream: S,
    dlq: Arc<P>,
    handler: Arc<dyn RecordHandler>,
    cfg: ConsumerConfig,
}

impl<S, P> Consumer<S, P>
where
    S: RecordStream,
    P: RecordPublisher,
{
    /// Builds a consumer over a subscription stream. The publisher is only
    /// used for dead-lettering.
    pub fn new(stream: S, dlq: Arc<P>, handler: Arc<dyn RecordHandler>, cfg: ConsumerConfig) -> Self {
        Self { stream, dlq, handler, cfg }
    }

    /// Drives the consume loop until cancellation, end of subscription, or a
    /// strict-policy dead-letter failure.
    ///
    /// A record already being processed when `shutdown` fires finishes its
    /// current attempt; nothing new is polled afterwards.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), BusError> {
        info!(topic = %self.cfg.topic, group = %self.cfg.group, "consumer started");

        loop {
            let record = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(topic = %self.cfg.topic, "consumer stopping");
                    return Ok(());
                }
                polled = self.stream.next_record() => match polled {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        info!(topic = %self.cfg.topic, "subscription ended");
                        return Ok(());
                    }
                    Err(err) => {
                        error!(topic = %self.cfg.topic, error = %err, "poll failed");
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                        }
                    }
                }
            };

            match self.process_with_retry(&record, &shutdown).await {
                Ok(()) => {
                    if let Err(err) = self.stream.commit(&record).await {
                        error!(topic = %self.cfg.topic, offset = record.offset, error = %err, "commit failed");
                        return Err(err);
                    }
                }
                Err(Interrupted::Cancelled) => {
                    // Uncommitted on purpose: the record will be redelivered.
                    info!(topic = %self.cfg.topic, "consumer cancelled mid-record");
                    return Ok(());
                }
                Err(Interrupted::DeadLetterFailed(err)) => return Err(err),
            }
        }
    }

    async fn process_with_retry(
        &self,
        record: &ConsumerRecord,
        shutdown: &CancellationToken,
    ) -> Result<(), Interrupted> {
        let base_ctx = context_for(record);
        let mut attempt: u32 = 0;
        let mut backoff = self.cfg.initial_backoff;

        loop {
            if shutdown.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }

            let ctx = base_ctx.clone().with_retry_attempt(attempt);
            match self.handler.handle(ctx, record).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if self.cfg.max_retries > 0 && attempt >= self.cfg.max_retries {
                        return self.dead_letter(record, &err).await;
                    }

                    warn!(
                        topic = %self.cfg.topic,
                        offset = record.offset,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "handler failed, retrying"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => return Err(Interrupted::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.cfg.max_backoff);
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        record: &ConsumerRecord,
        cause: &anyhow::Error,
    ) -> Result<(), Interrupted> {
        let topic = self.cfg.dead_letter_topic();

        let mut headers = record.headers.clone();
        headers.push(("x-dlq-source-topic".to_string(), record.topic.clone()));
        headers.push(("x-dlq-attempts".to_string(), self.cfg.max_retries.to_string()));
        headers.push(("x-dlq-error".to_string(), cause.to_string()));

        let dead = ProducerRecord {
            topic: topic.clone(),
            key: record
                .key
                .as_deref()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: record.payload.clone(),
            headers,
            partition: None,
        };

        match self.dlq.publish(dead).await {
            Ok(_) => {
                warn!(
                    topic = %self.cfg.topic,
                    dlq = %topic,
                    offset = record.offset,
                    "retries exhausted, record dead-lettered"
                );
                Ok(())
            }
            Err(err) => match self.cfg.dlq_policy {
                DlqPolicy::Strict => {
                    error!(
                        topic = %self.cfg.topic,
                        dlq = %topic,
                        error = %err,
                        "dead-letter publish failed, stopping consumer"
                    );
                    Err(Interrupted::DeadLetterFailed(err))
                }
                DlqPolicy::Permissive => {
                    error!(
                        topic = %self.cfg.topic,
                        dlq = %topic,
                        error = %err,
                        "dead-letter publish failed, committing anyway"
                    );
                    Ok(())
                }
            },
        }
    }
}

fn context_for(record: &ConsumerRecord) -> RequestContext {
    let ctx = RequestContext::new().with_entry_point(EntryPoint::Consumer);
    match record.header(TRACE_HEADER) {
        Some(trace_id) if !trace_id.is_empty() => ctx.with_trace_id(trace_id.to_string()),
        _ => ctx.with_trace_id(uuid::Uuid::new_v4().to_string()),
    }
}

/// Owns the lifecycle of a set of consumers.
pub struct ConsumerManager {
    tasks: JoinSet<Result<(), BusError>>,
    shutdown: CancellationToken,
}

impl ConsumerManager {
    /// A manager whose consumers stop when `shutdown` fires.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            shutdown,
        }
    }

    /// Spawns a consumer under management.
    pub fn register<S, P>(&mut self, consumer: Consumer<S, P>)
    where
        S: RecordStream + Send + Sync + 'static,
        P: RecordPublisher + 'static,
    {
        let token = self.shutdown.child_token();
        self.tasks.spawn(consumer.run(token));
    }

    /// Number of managed consumers still running.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Signals all consumers and waits for them to finish their in-flight
    /// records.
    pub async fn close(mut self) {
        info!("stopping consumers");
        self.shutdown.cancel();
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "consumer stopped with error"),
                Err(err) => error!(error = %err, "consumer task panicked"),
            }
        }
        info!("all consumers stopped");
    }
}
