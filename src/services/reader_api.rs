use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ActionKind, NewArticle};

pub const STATE_PREFIX: &str = "user/-/state/com.google/";
pub const STATE_READ: &str = "user/-/state/com.google/read";
pub const STATE_READING_LIST: &str = "user/-/state/com.google/reading-list";
pub const STATE_KEPT_UNREAD: &str = "user/-/state/com.google/kept-unread";
pub const STATE_STARRED: &str = "user/-/state/com.google/starred";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub title: String,
    pub url: String,
    pub html_url: String,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub label: String,
}

impl Category {
    pub fn is_label(&self) -> bool {
        is_label(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub kind: Option<String>,
}

/// One item of a content stream, already mapped to local article fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamItem {
    pub article: NewArticle,
    pub categories: Vec<String>,
}

/// Parameters of a `stream/contents` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContentsQuery {
    pub stream_id: String,
    pub exclude: Option<String>,
    /// Only items newer than this epoch second; 0 means no lower bound.
    pub since: i64,
    pub limit: usize,
}

/// Parameters of a `stream/items/ids` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdsQuery {
    pub include: String,
    pub exclude: Option<String>,
    pub limit: usize,
}

/// Google Reader style API of the remote content service.
///
/// Any call rejected with 401 fails with `AppError::Unauthorized`.
#[async_trait]
pub trait ReaderApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<String>;

    async fn write_token(&self) -> Result<String>;

    async fn subscriptions(&self) -> Result<Vec<Subscription>>;

    async fn tags(&self) -> Result<Vec<Tag>>;

    async fn stream_contents(&self, query: StreamContentsQuery) -> Result<Vec<StreamItem>>;

    async fn stream_item_ids(&self, query: StreamIdsQuery) -> Result<Vec<String>>;

    async fn edit_tag(
        &self,
        write_token: &str,
        item_ids: &[String],
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Result<()>;
}

/// The (add, remove) state labels that push `kind` to the server.
pub fn edit_labels(kind: ActionKind) -> (Option<&'static str>, Option<&'static str>) {
    match kind {
        ActionKind::Read => (Some(STATE_READ), None),
        ActionKind::Unread => (Some(STATE_KEPT_UNREAD), Some(STATE_READ)),
        ActionKind::Star => (Some(STATE_STARRED), None),
        ActionKind::Unstar => (None, Some(STATE_STARRED)),
    }
}

/// System state tags are not folders, except for "starred".
pub fn is_folder_tag(id: &str) -> bool {
    !is_state(id) || id.ends_with("/com.google/starred")
}

fn is_state(id: &str) -> bool {
    id.starts_with(STATE_PREFIX)
        || (id.starts_with("user/") && id.contains("/state/com.google/"))
}

fn is_label(id: &str) -> bool {
    id.starts_with("user/") && id.contains("/label/")
}
