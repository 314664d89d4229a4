use serde::{Deserialize, Serialize};

/// An article as cached locally, joined with its read/starred status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub href: String,
    pub published_at: i64,
    pub is_read: bool,
    pub is_starred: bool,
}

/// Article fields as delivered by the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub id: String,
    pub feed_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub href: String,
    pub published_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ArticleFilter {
    All,
    #[default]
    Unread,
    Starred,
}
