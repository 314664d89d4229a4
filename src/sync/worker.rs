use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::Repository;
use crate::error::Result;
use crate::models::ActionKind;
use crate::services::reader_api::{edit_labels, ReaderApi};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_BATCH_SIZE: usize = 10;

/// Outcome of one outbox push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub offline: bool,
    pub delivered: usize,
    pub failed_kinds: usize,
    /// The server rejected our tokens for at least one kind.
    pub unauthorized: bool,
}

/// Why [`Worker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    /// The session expired; the caller has to log in again and restart.
    Unauthorized,
}

/// Pushes queued local status changes to the server.
///
/// Every tick drains one batch per action kind, the four kinds concurrently.
/// A batch is removed from the outbox only after the server accepted it;
/// otherwise it stays queued and is retried on the next tick.
pub struct Worker {
    api: Arc<dyn ReaderApi>,
    repository: Arc<Repository>,
    write_token: String,
    batch_size: usize,
    interval: Duration,
    is_online: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Worker {
    pub fn new(api: Arc<dyn ReaderApi>, repository: Arc<Repository>, write_token: String) -> Self {
        Self {
            api,
            repository,
            write_token,
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
            is_online: Box::new(|| true),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Ticks are skipped while `is_online` returns false.
    #[allow(dead_code)]
    pub fn with_connectivity_check(
        mut self,
        is_online: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_online = Box::new(is_online);
        self
    }

    /// Push the outbox every interval until `cancel` fires or the session expires.
    pub async fn run(&self, cancel: CancellationToken) -> WorkerExit {
        tracing::info!("Outbox worker started, pushing every {:?}", self.interval);

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break WorkerExit::Cancelled,
                _ = ticker.tick() => {}
            }

            // Dropping an unfinished tick leaves its batches queued.
            let report = tokio::select! {
                _ = cancel.cancelled() => break WorkerExit::Cancelled,
                report = self.tick() => report,
            };
            if report.unauthorized {
                break WorkerExit::Unauthorized;
            }
        };

        tracing::info!("Outbox worker stopped: {:?}", exit);
        exit
    }

    pub async fn tick(&self) -> TickReport {
        if !(self.is_online)() {
            tracing::info!("No network connection, skipping outbox push");
            return TickReport {
                offline: true,
                ..Default::default()
            };
        }

        let results = join_all(ActionKind::ALL.map(|kind| self.push_pending(kind))).await;

        let mut report = TickReport::default();
        for (kind, result) in ActionKind::ALL.into_iter().zip(results) {
            match result {
                Ok(0) => {}
                Ok(n) => {
                    tracing::debug!("Pushed {} pending {} actions", n, kind);
                    report.delivered += n;
                }
                Err(e) => {
                    tracing::error!("Failed to push pending {} actions: {}", kind, e);
                    report.failed_kinds += 1;
                    report.unauthorized |= e.is_unauthorized();
                }
            }
        }
        report
    }

    /// Deliver the oldest batch queued for `kind`, returning its size.
    pub async fn push_pending(&self, kind: ActionKind) -> Result<usize> {
        let batch = self
            .repository
            .list_pending_actions(kind, self.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let article_ids: Vec<String> = batch.iter().map(|p| p.article_id.clone()).collect();
        let (add, remove) = edit_labels(kind);
        self.api
            .edit_tag(&self.write_token, &article_ids, add, remove)
            .await?;

        self.repository.delete_pending_actions(kind, batch).await?;
        Ok(article_ids.len())
    }
}
