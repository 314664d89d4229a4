//! In-memory `ReaderApi` used by tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::NewArticle;

use super::reader_api::{
    ReaderApi, StreamContentsQuery, StreamIdsQuery, StreamItem, Subscription, Tag, STATE_STARRED,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCall {
    pub write_token: String,
    pub item_ids: Vec<String>,
    pub add: Option<String>,
    pub remove: Option<String>,
}

#[derive(Default)]
pub struct FakeReader {
    pub tags: Mutex<Vec<Tag>>,
    pub subscriptions: Mutex<Vec<Subscription>>,
    pub unread_items: Mutex<Vec<NewArticle>>,
    pub unread_ids: Mutex<Vec<String>>,
    pub starred_items: Mutex<Vec<NewArticle>>,
    pub starred_ids: Mutex<Vec<String>>,
    pub fail_stream_contents: Mutex<bool>,
    pub unauthorized: Mutex<bool>,
    /// Labels whose edit-tag requests fail.
    pub failing_labels: Mutex<Vec<String>>,
    pub contents_queries: Mutex<Vec<StreamContentsQuery>>,
    pub edit_calls: Mutex<Vec<EditCall>>,
    pub logins: Mutex<usize>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T>(field: &Mutex<T>, value: T) {
        *field.lock().unwrap() = value;
    }

    pub fn edit_calls(&self) -> Vec<EditCall> {
        self.edit_calls.lock().unwrap().clone()
    }

    fn check_auth(&self) -> Result<()> {
        if *self.unauthorized.lock().unwrap() {
            return Err(AppError::Unauthorized);
        }
        Ok(())
    }
}

pub fn article(id: &str, feed_id: &str) -> NewArticle {
    NewArticle {
        id: id.to_string(),
        feed_id: feed_id.to_string(),
        title: format!("Article {}", id),
        content: format!("<p>{}</p>", id),
        author: "author".to_string(),
        href: format!("https://example.com/{}", id),
        published_at: 1_700_000_000,
    }
}

#[async_trait]
impl ReaderApi for FakeReader {
    async fn login(&self, _username: &str, password: &str) -> Result<String> {
        *self.logins.lock().unwrap() += 1;
        if password == "wrong" {
            return Err(AppError::Unauthorized);
        }
        Self::set(&self.unauthorized, false);
        Ok(format!("auth-{}", self.logins.lock().unwrap()))
    }

    async fn write_token(&self) -> Result<String> {
        self.check_auth()?;
        Ok("write-token".to_string())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        self.check_auth()?;
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        self.check_auth()?;
        Ok(self.tags.lock().unwrap().clone())
    }

    async fn stream_contents(&self, query: StreamContentsQuery) -> Result<Vec<StreamItem>> {
        self.check_auth()?;
        if *self.fail_stream_contents.lock().unwrap() {
            return Err(AppError::Api {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        let source = if query.stream_id == STATE_STARRED {
            &self.starred_items
        } else {
            &self.unread_items
        };
        let items = source
            .lock()
            .unwrap()
            .iter()
            .take(query.limit)
            .cloned()
            .map(|article| StreamItem {
                article,
                categories: vec![query.stream_id.clone()],
            })
            .collect();
        self.contents_queries.lock().unwrap().push(query);
        Ok(items)
    }

    async fn stream_item_ids(&self, query: StreamIdsQuery) -> Result<Vec<String>> {
        self.check_auth()?;
        let source = if query.include == STATE_STARRED {
            &self.starred_ids
        } else {
            &self.unread_ids
        };
        Ok(source.lock().unwrap().iter().take(query.limit).cloned().collect())
    }

    async fn edit_tag(
        &self,
        write_token: &str,
        item_ids: &[String],
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Result<()> {
        self.check_auth()?;
        let failing = self.failing_labels.lock().unwrap();
        if [add, remove]
            .into_iter()
            .flatten()
            .any(|label| failing.iter().any(|f| f == label))
        {
            return Err(AppError::Api {
                status: 500,
                body: "edit-tag failed".to_string(),
            });
        }
        drop(failing);

        self.edit_calls.lock().unwrap().push(EditCall {
            write_token: write_token.to_string(),
            item_ids: item_ids.to_vec(),
            add: add.map(str::to_string),
            remove: remove.map(str::to_string),
        });
        Ok(())
    }
}
