use std::sync::Arc;

use chrono::Utc;

use crate::db::Repository;
use crate::error::{BatchError, Result};
use crate::models::NewFeed;
use crate::services::reader_api::{
    is_folder_tag, ReaderApi, StreamContentsQuery, StreamIdsQuery, STATE_READ,
    STATE_READING_LIST, STATE_STARRED,
};

/// What a sync pass changed locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub folders: usize,
    pub feeds: usize,
    pub removed_feeds: usize,
    pub new_articles: usize,
    pub unread: usize,
    pub starred: usize,
}

/// Pulls remote state into the local repository.
///
/// A pass runs its steps strictly in order and only advances the stored
/// checkpoint when every step succeeded, so a failed pass is simply repeated
/// over the same window next time.
pub struct Syncer {
    api: Arc<dyn ReaderApi>,
    repository: Arc<Repository>,
    page_size: usize,
    clock: fn() -> i64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl Syncer {
    pub fn new(api: Arc<dyn ReaderApi>, repository: Arc<Repository>, page_size: usize) -> Self {
        Self {
            api,
            repository,
            page_size,
            clock: now,
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub async fn sync(&self) -> Result<SyncSummary> {
        let since = match self.repository.get_last_sync_time().await? {
            Some(last_sync) => {
                tracing::info!("Last sync at {}", last_sync);
                last_sync
            }
            None => {
                tracing::info!("No previous sync, pulling the newest {} items", self.page_size);
                0
            }
        };

        // Captured up front so anything arriving mid-pass is pulled again next time.
        let checkpoint = (self.clock)();

        let mut summary = SyncSummary {
            folders: self.sync_tags().await?,
            ..Default::default()
        };

        let (feeds, removed_feeds) = self.sync_subscriptions().await?;
        summary.feeds = feeds;
        summary.removed_feeds = removed_feeds;

        summary.new_articles += self.sync_unread_items(since).await?;
        summary.unread = self.sync_unread_statuses().await?;
        summary.new_articles += self.sync_starred_items(since).await?;
        summary.starred = self.sync_starred_statuses().await?;

        self.repository.set_last_sync_time(checkpoint).await?;
        tracing::info!("Sync finished, checkpoint {}", checkpoint);

        Ok(summary)
    }

    async fn sync_tags(&self) -> Result<usize> {
        tracing::info!("Syncing tags");

        let tags = self.api.tags().await?;

        let mut errors = BatchError::new();
        let mut folders = 0;
        for tag in tags.iter().filter(|tag| is_folder_tag(&tag.id)) {
            tracing::debug!("Upserting folder {} ({:?})", tag.id, tag.kind);
            match self.repository.upsert_folder(&tag.id).await {
                Ok(()) => folders += 1,
                Err(e) => errors.push(e),
            }
        }

        tracing::info!("Finished tag sync: {} folders, {} errors", folders, errors.len());
        errors.into_result().map(|_| folders)
    }

    async fn sync_subscriptions(&self) -> Result<(usize, usize)> {
        tracing::info!("Syncing subscriptions");

        let subscriptions = self.api.subscriptions().await?;

        let mut errors = BatchError::new();
        for sub in &subscriptions {
            let feed = NewFeed {
                id: sub.id.clone(),
                title: sub.title.clone(),
                url: sub.url.clone(),
                html_url: sub.html_url.clone(),
            };
            if let Err(e) = self.repository.upsert_feed(feed).await {
                errors.push(e);
                continue;
            }

            for category in sub.categories.iter().filter(|c| c.is_label()) {
                tracing::debug!("Linking {} to {}", sub.id, category.label);
                // The label may not have been listed as a tag.
                let linked = match self.repository.upsert_folder(&category.id).await {
                    Ok(()) => self.repository.link_feed_folder(&sub.id, &category.id).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = linked {
                    errors.push(e);
                }
            }
        }

        let mut removed = 0;
        if subscriptions.is_empty() {
            tracing::warn!("Server listed no subscriptions, keeping local feeds");
        } else {
            let ids = subscriptions.iter().map(|sub| sub.id.clone()).collect();
            match self.repository.remove_feeds_not_in(ids).await {
                Ok(n) => removed = n,
                Err(e) => errors.push(e),
            }
        }

        tracing::info!(
            "Finished subscription sync: {} feeds, {} removed, {} errors",
            subscriptions.len(),
            removed,
            errors.len()
        );
        errors.into_result().map(|_| (subscriptions.len(), removed))
    }

    async fn sync_unread_items(&self, since: i64) -> Result<usize> {
        tracing::info!("Syncing unread items");

        let query = StreamContentsQuery {
            stream_id: STATE_READING_LIST.to_string(),
            exclude: Some(STATE_READ.to_string()),
            since,
            limit: self.page_size,
        };
        self.store_items(query).await
    }

    async fn sync_unread_statuses(&self) -> Result<usize> {
        tracing::info!("Syncing unread item ids");

        let ids = self
            .api
            .stream_item_ids(StreamIdsQuery {
                include: STATE_READING_LIST.to_string(),
                exclude: Some(STATE_READ.to_string()),
                limit: self.page_size,
            })
            .await?;

        tracing::debug!("Got {} unread ids: {:?}", ids.len(), ids);
        let unread = ids.len();
        self.repository.reconcile_read_status(ids).await?;
        Ok(unread)
    }

    async fn sync_starred_items(&self, since: i64) -> Result<usize> {
        tracing::info!("Syncing starred items");

        let query = StreamContentsQuery {
            stream_id: STATE_STARRED.to_string(),
            exclude: None,
            since,
            limit: self.page_size,
        };
        self.store_items(query).await
    }

    async fn sync_starred_statuses(&self) -> Result<usize> {
        tracing::info!("Syncing starred item ids");

        let ids = self
            .api
            .stream_item_ids(StreamIdsQuery {
                include: STATE_STARRED.to_string(),
                exclude: None,
                limit: self.page_size,
            })
            .await?;

        tracing::debug!("Got {} starred ids: {:?}", ids.len(), ids);
        let starred = ids.len();
        self.repository.reconcile_starred_status(ids).await?;
        Ok(starred)
    }

    async fn store_items(&self, query: StreamContentsQuery) -> Result<usize> {
        let stream_id = query.stream_id.clone();
        let items = self.api.stream_contents(query).await?;
        tracing::debug!("Got {} items from {}", items.len(), stream_id);

        let mut errors = BatchError::new();
        let mut inserted = 0;
        for item in items {
            tracing::trace!("Item {} in {:?}", item.article.id, item.categories);
            match self.repository.upsert_article(item.article).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        tracing::info!(
            "Finished syncing {}: {} new, {} errors",
            stream_id,
            inserted,
            errors.len()
        );
        errors.into_result().map(|_| inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::ActionKind;
    use crate::services::fake::{article, FakeReader};
    use crate::services::reader_api::{Category, Subscription, Tag};

    const CHECKPOINT: i64 = 1_750_000_000;

    fn fixed_clock() -> i64 {
        CHECKPOINT
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn subscription(id: &str, labels: &[&str]) -> Subscription {
        Subscription {
            id: id.to_string(),
            title: format!("Feed {}", id),
            url: format!("https://example.com/{}.xml", id),
            html_url: "https://example.com".to_string(),
            categories: labels
                .iter()
                .map(|label| Category {
                    id: format!("user/-/label/{}", label),
                    label: label.to_string(),
                })
                .collect(),
        }
    }

    async fn setup() -> (Arc<FakeReader>, Arc<Repository>, Syncer) {
        let api = Arc::new(FakeReader::new());
        let repository = Arc::new(Repository::open_in_memory().await.unwrap());
        let syncer = Syncer::new(api.clone(), repository.clone(), 1000).with_clock(fixed_clock);
        (api, repository, syncer)
    }

    #[tokio::test]
    async fn first_sync_stores_articles_and_advances_checkpoint() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(
            &api.unread_items,
            vec![article("A", "feed/1"), article("B", "feed/1")],
        );
        FakeReader::set(&api.unread_ids, ids(&["A"]));

        let summary = syncer.sync().await.unwrap();

        assert_eq!(summary.new_articles, 2);
        assert!(!repository.get_article("A").await.unwrap().unwrap().is_read);
        assert!(repository.get_article("B").await.unwrap().unwrap().is_read);
        assert_eq!(repository.get_last_sync_time().await.unwrap(), Some(CHECKPOINT));

        let queries = api.contents_queries.lock().unwrap().clone();
        assert!(queries.iter().all(|q| q.since == 0 && q.limit == 1000));
    }

    #[tokio::test]
    async fn later_sync_uses_stored_checkpoint() {
        let (api, repository, syncer) = setup().await;
        repository.set_last_sync_time(1_600_000_000).await.unwrap();

        syncer.sync().await.unwrap();

        let queries = api.contents_queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].stream_id, STATE_READING_LIST);
        assert_eq!(queries[0].exclude.as_deref(), Some(STATE_READ));
        assert_eq!(queries[1].stream_id, STATE_STARRED);
        assert!(queries.iter().all(|q| q.since == 1_600_000_000));
    }

    #[tokio::test]
    async fn failed_content_pull_keeps_checkpoint() {
        let (api, repository, syncer) = setup().await;
        repository.set_last_sync_time(1_600_000_000).await.unwrap();
        FakeReader::set(&api.fail_stream_contents, true);

        let err = syncer.sync().await.unwrap_err();

        assert!(matches!(err, AppError::Api { status: 503, .. }));
        assert_eq!(
            repository.get_last_sync_time().await.unwrap(),
            Some(1_600_000_000)
        );
    }

    #[tokio::test]
    async fn unauthorized_aborts_without_checkpoint() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(&api.unauthorized, true);

        let err = syncer.sync().await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(repository.get_last_sync_time().await.unwrap(), None);
    }

    #[tokio::test]
    async fn system_tags_other_than_starred_are_skipped() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(
            &api.tags,
            vec![
                Tag {
                    id: STATE_STARRED.to_string(),
                    kind: None,
                },
                Tag {
                    id: STATE_READING_LIST.to_string(),
                    kind: None,
                },
                Tag {
                    id: "user/-/label/Tech".to_string(),
                    kind: Some("folder".to_string()),
                },
            ],
        );

        let summary = syncer.sync().await.unwrap();

        assert_eq!(summary.folders, 2);
        assert_eq!(
            repository.get_all_folders().await.unwrap(),
            ids(&["user/-/label/Tech", STATE_STARRED])
        );
    }

    #[tokio::test]
    async fn subscriptions_are_linked_and_stale_feeds_removed() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(
            &api.subscriptions,
            vec![subscription("feed/1", &["Tech"]), subscription("feed/2", &[])],
        );
        syncer.sync().await.unwrap();
        assert_eq!(repository.get_all_feeds().await.unwrap().len(), 2);
        assert_eq!(
            repository.get_feed_folders("feed/1").await.unwrap(),
            ids(&["user/-/label/Tech"])
        );

        FakeReader::set(&api.subscriptions, vec![subscription("feed/2", &[])]);
        let summary = syncer.sync().await.unwrap();

        assert_eq!(summary.removed_feeds, 1);
        let feeds = repository.get_all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, "feed/2");
    }

    #[tokio::test]
    async fn empty_subscription_list_keeps_local_feeds() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(&api.subscriptions, vec![subscription("feed/1", &[])]);
        syncer.sync().await.unwrap();

        FakeReader::set(&api.subscriptions, vec![]);
        syncer.sync().await.unwrap();

        assert_eq!(repository.get_all_feeds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn starred_state_is_reconciled() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(&api.unread_items, vec![article("A", "feed/1")]);
        FakeReader::set(&api.unread_ids, ids(&["A"]));
        FakeReader::set(&api.starred_items, vec![article("S", "feed/9")]);
        FakeReader::set(&api.starred_ids, ids(&["S"]));

        let summary = syncer.sync().await.unwrap();

        assert_eq!(summary.starred, 1);
        let starred = repository.get_article("S").await.unwrap().unwrap();
        assert!(starred.is_starred);
        assert!(starred.is_read);
        assert!(!repository.get_article("A").await.unwrap().unwrap().is_starred);
    }

    #[tokio::test]
    async fn repeated_pass_is_idempotent() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(&api.unread_items, vec![article("A", "feed/1")]);
        FakeReader::set(&api.unread_ids, ids(&["A"]));

        assert_eq!(syncer.sync().await.unwrap().new_articles, 1);
        assert_eq!(syncer.sync().await.unwrap().new_articles, 0);
        assert!(!repository.get_article("A").await.unwrap().unwrap().is_read);
    }

    #[tokio::test]
    async fn remote_snapshot_overrides_local_change() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(&api.unread_items, vec![article("A", "feed/1")]);
        FakeReader::set(&api.unread_ids, ids(&["A"]));
        syncer.sync().await.unwrap();

        repository
            .change_article_status("A", ActionKind::Read)
            .await
            .unwrap();
        syncer.sync().await.unwrap();

        assert!(!repository.get_article("A").await.unwrap().unwrap().is_read);
        assert_eq!(
            repository.count_pending_actions(ActionKind::Read).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn failing_article_does_not_stop_the_rest_of_the_page() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(
            &api.unread_items,
            vec![article("A", "feed/1"), article("", "feed/1"), article("B", "feed/1")],
        );
        FakeReader::set(&api.unread_ids, ids(&["A", "B"]));

        let err = syncer.sync().await.unwrap_err();

        assert!(matches!(err, AppError::Batch(_)));
        assert!(repository.get_article("A").await.unwrap().is_some());
        assert!(repository.get_article("B").await.unwrap().is_some());
        assert_eq!(repository.get_last_sync_time().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failing_feed_does_not_stop_the_rest_of_the_listing() {
        let (api, repository, syncer) = setup().await;
        FakeReader::set(
            &api.subscriptions,
            vec![subscription("", &[]), subscription("feed/1", &["Tech"])],
        );
        FakeReader::set(&api.unread_items, vec![article("A", "feed/1")]);

        let err = syncer.sync().await.unwrap_err();

        assert!(matches!(err, AppError::Batch(_)));
        let feeds = repository.get_all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, "feed/1");
        assert_eq!(
            repository.get_feed_folders("feed/1").await.unwrap(),
            ids(&["user/-/label/Tech"])
        );

        // The pass stops at the failed step.
        assert!(api.contents_queries.lock().unwrap().is_empty());
        assert_eq!(repository.get_last_sync_time().await.unwrap(), None);

        FakeReader::set(&api.subscriptions, vec![subscription("feed/1", &["Tech"])]);
        syncer.sync().await.unwrap();
        assert_eq!(repository.get_last_sync_time().await.unwrap(), Some(CHECKPOINT));
        assert!(repository.get_article("A").await.unwrap().is_some());
    }
}
