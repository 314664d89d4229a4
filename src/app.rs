use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{ActionKind, Article, ArticleFilter, Feed};
use crate::services::{FreshRssClient, ReaderApi};
use crate::sync::{SyncSummary, Syncer, TickReport, Worker, WorkerExit};

/// Tokens of an authenticated connection to the server.
#[derive(Clone)]
pub struct Session {
    pub auth_token: String,
    pub write_token: String,
}

/// Overview of the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub last_sync: Option<i64>,
    pub feeds: usize,
    pub folders: usize,
    pub pending: Vec<(ActionKind, usize)>,
}

/// An article with the feed and folders it belongs to.
#[derive(Debug, Clone)]
pub struct ArticleDetails {
    pub article: Article,
    pub feed: Option<Feed>,
    pub folders: Vec<String>,
}

pub struct App {
    config: Config,
    pub repository: Arc<Repository>,
    client: Arc<FreshRssClient>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        if let Some(parent) = Path::new(&config.db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let repository = Arc::new(Repository::new(&config.db_path).await?);
        let client = Arc::new(FreshRssClient::new(
            &config.freshrss.host,
            config.sync.request_timeout(),
        )?);

        Ok(Self {
            config,
            repository,
            client,
        })
    }

    /// Reuse stored tokens, logging in only for the ones that are missing.
    ///
    /// A rejected stored token is discarded and the login is repeated once.
    pub async fn authenticate(&self) -> Result<Session> {
        match self.open_session().await {
            Err(e) if e.is_unauthorized() => {
                tracing::warn!("Stored session was rejected, logging in again");
                self.repository.clear_tokens().await?;
                self.open_session().await
            }
            other => other,
        }
    }

    async fn open_session(&self) -> Result<Session> {
        let auth_token = match self.repository.get_token().await? {
            Some(token) => token,
            None => {
                tracing::info!("Requesting auth token");
                let token = self
                    .client
                    .login(&self.config.freshrss.username, &self.config.freshrss.password)
                    .await?;
                self.repository.set_token(&token).await?;
                token
            }
        };
        self.client.set_auth_token(&auth_token);

        let write_token = match self.repository.get_write_token().await? {
            Some(token) => token,
            None => {
                tracing::info!("Requesting write token");
                let token = self.client.write_token().await?;
                self.repository.set_write_token(&token).await?;
                token
            }
        };

        Ok(Session {
            auth_token,
            write_token,
        })
    }

    /// Run one sync pass, re-authenticating once if the session expired.
    pub async fn sync(&self) -> Result<SyncSummary> {
        self.authenticate().await?;

        let syncer = Syncer::new(
            self.client.clone(),
            self.repository.clone(),
            self.config.sync.page_size,
        );

        match syncer.sync().await {
            Err(e) if e.is_unauthorized() => {
                tracing::warn!("Session expired during sync, logging in again");
                self.reauthenticate().await?;
                syncer.sync().await
            }
            other => other,
        }
    }

    pub async fn mark(&self, article_id: &str, kind: ActionKind) -> Result<()> {
        self.repository.change_article_status(article_id, kind).await
    }

    pub async fn articles(&self, filter: ArticleFilter) -> Result<Vec<Article>> {
        self.repository.get_articles(filter).await
    }

    pub async fn article(&self, article_id: &str) -> Result<ArticleDetails> {
        let article = self
            .repository
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article {}", article_id)))?;

        let feed = self
            .repository
            .get_all_feeds()
            .await?
            .into_iter()
            .find(|feed| feed.id == article.feed_id);
        let folders = self.repository.get_feed_folders(&article.feed_id).await?;

        Ok(ArticleDetails {
            article,
            feed,
            folders,
        })
    }

    pub async fn status(&self) -> Result<Status> {
        let mut pending = Vec::with_capacity(ActionKind::ALL.len());
        for kind in ActionKind::ALL {
            pending.push((kind, self.repository.count_pending_actions(kind).await?));
        }

        Ok(Status {
            last_sync: self.repository.get_last_sync_time().await?,
            feeds: self.repository.get_all_feeds().await?.len(),
            folders: self.repository.get_all_folders().await?.len(),
            pending,
        })
    }

    /// Push one batch of every pending action kind.
    ///
    /// If the server rejects the session, log in again and push once more.
    pub async fn push(&self) -> Result<TickReport> {
        let session = self.authenticate().await?;
        let report = self.worker(session).tick().await;
        if !report.unauthorized {
            return Ok(report);
        }

        tracing::warn!("Session expired during push, logging in again");
        let session = self.reauthenticate().await?;
        let retry = self.worker(session).tick().await;
        Ok(TickReport {
            delivered: report.delivered + retry.delivered,
            ..retry
        })
    }

    /// Push pending actions on the configured interval until `cancel` fires.
    ///
    /// An expired session is replaced with a fresh login and the worker
    /// restarted. Failed logins are retried every interval.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut session = self.authenticate().await?;

        loop {
            match self.worker(session).run(cancel.clone()).await {
                WorkerExit::Cancelled => return Ok(()),
                WorkerExit::Unauthorized => {
                    tracing::warn!("Session expired, logging in again");
                }
            }

            session = loop {
                match self.reauthenticate().await {
                    Ok(session) => break session,
                    Err(e) => {
                        tracing::error!("Login failed: {}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(self.config.sync.worker_interval()) => {}
                        }
                    }
                }
            };
        }
    }

    async fn reauthenticate(&self) -> Result<Session> {
        self.repository.clear_tokens().await?;
        self.authenticate().await
    }

    fn worker(&self, session: Session) -> Worker {
        let Session {
            auth_token,
            write_token,
        } = session;
        self.client.set_auth_token(&auth_token);

        Worker::new(self.client.clone(), self.repository.clone(), write_token)
            .with_batch_size(self.config.sync.batch_size)
            .with_interval(self.config.sync.worker_interval())
    }
}
