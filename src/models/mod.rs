mod action;
mod article;
mod feed;

pub use action::{ActionKind, PendingAction};
pub use article::{Article, ArticleFilter, NewArticle};
pub use feed::{Feed, NewFeed};
