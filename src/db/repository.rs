use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{ActionKind, Article, ArticleFilter, Feed, NewArticle, NewFeed, PendingAction};

use super::schema::{PRAGMAS, SCHEMA};

/// Local cache of feeds, articles, statuses and the outbox of pending actions.
///
/// All access goes through a single `tokio_rusqlite` connection, so writes are
/// serialized on its worker thread. Multi-statement mutations run inside one
/// transaction and either fully commit or leave the store untouched.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    pub async fn upsert_feed(&self, feed: NewFeed) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO feeds (id, title, url, html_url)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(id) DO UPDATE SET
                           title = excluded.title,
                           url = excluded.url,
                           html_url = excluded.html_url"#,
                    params![feed.id, feed.title, feed.url, feed.html_url],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn upsert_folder(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO folders (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn link_feed_folder(&self, feed_id: &str, folder_id: &str) -> Result<()> {
        let feed_id = feed_id.to_string();
        let folder_id = folder_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO feed_folders (feed_id, folder_id) VALUES (?1, ?2)",
                    params![feed_id, folder_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete every feed whose id is not in `current_ids`.
    ///
    /// An empty `current_ids` deletes all feeds. Returns the number of feeds removed.
    pub async fn remove_feeds_not_in(&self, current_ids: Vec<String>) -> Result<usize> {
        let removed = self
            .conn
            .call(move |conn| {
                if current_ids.is_empty() {
                    return Ok(conn.execute("DELETE FROM feeds", [])?);
                }
                let sql = format!(
                    "DELETE FROM feeds WHERE id NOT IN ({})",
                    placeholders(current_ids.len())
                );
                Ok(conn.execute(&sql, params_from_iter(current_ids.iter()))?)
            })
            .await?;
        Ok(removed)
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, title, url, html_url FROM feeds ORDER BY title")?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn get_all_folders(&self) -> Result<Vec<String>> {
        let folders = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM folders ORDER BY id")?;
                let folders = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(folders)
            })
            .await?;
        Ok(folders)
    }

    pub async fn get_feed_folders(&self, feed_id: &str) -> Result<Vec<String>> {
        let feed_id = feed_id.to_string();
        let folders = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT folder_id FROM feed_folders WHERE feed_id = ?1 ORDER BY folder_id",
                )?;
                let folders = stmt
                    .query_map(params![feed_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(folders)
            })
            .await?;
        Ok(folders)
    }

    // Article operations

    /// Insert the article and its status row together.
    ///
    /// Article ids are immutable once minted by the server: if the id is already
    /// stored nothing is written and `false` is returned.
    pub async fn upsert_article(&self, article: NewArticle) -> Result<bool> {
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let inserted = tx.execute(
                    r#"INSERT OR IGNORE INTO articles (id, feed_id, title, content, author, href, published_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        article.id,
                        article.feed_id,
                        article.title,
                        article.content,
                        article.author,
                        article.href,
                        article.published_at,
                    ],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO article_statuses (article_id) VALUES (?1)",
                    params![article.id],
                )?;
                tx.commit()?;
                Ok(inserted > 0)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let id = id.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE a.id = ?1", ARTICLE_SELECT))?;
                let article = stmt.query_row(params![id], article_from_row).optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn get_articles(&self, filter: ArticleFilter) -> Result<Vec<Article>> {
        let condition = match filter {
            ArticleFilter::All => "",
            ArticleFilter::Unread => "WHERE s.is_read = 0",
            ArticleFilter::Starred => "WHERE s.is_starred = 1",
        };
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} {} ORDER BY a.published_at DESC, a.id DESC",
                    ARTICLE_SELECT, condition
                ))?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Make `unread_ids` exactly the set of unread articles.
    ///
    /// Every other status row is marked read, in one statement.
    pub async fn reconcile_read_status(&self, unread_ids: Vec<String>) -> Result<usize> {
        self.reconcile_flag("is_read", unread_ids, false).await
    }

    /// Make `starred_ids` exactly the set of starred articles.
    ///
    /// Every other status row is marked unstarred, in one statement.
    pub async fn reconcile_starred_status(&self, starred_ids: Vec<String>) -> Result<usize> {
        self.reconcile_flag("is_starred", starred_ids, true).await
    }

    async fn reconcile_flag(
        &self,
        column: &'static str,
        ids: Vec<String>,
        value_for_listed: bool,
    ) -> Result<usize> {
        let updated = self
            .conn
            .call(move |conn| {
                if ids.is_empty() {
                    let sql = format!("UPDATE article_statuses SET {} = ?1", column);
                    return Ok(conn.execute(&sql, params![!value_for_listed])?);
                }
                let sql = format!(
                    "UPDATE article_statuses SET {column} = CASE WHEN article_id IN ({ids}) THEN {listed} ELSE {rest} END",
                    column = column,
                    ids = placeholders(ids.len()),
                    listed = value_for_listed as i32,
                    rest = !value_for_listed as i32,
                );
                Ok(conn.execute(&sql, params_from_iter(ids.iter()))?)
            })
            .await?;
        Ok(updated)
    }

    /// Apply a local status change and queue it for delivery to the server.
    ///
    /// Both writes commit together. Fails with `NotFound` when the article has
    /// no status row, in which case nothing is written.
    pub async fn change_article_status(&self, article_id: &str, kind: ActionKind) -> Result<()> {
        let sql = match kind {
            ActionKind::Read => "UPDATE article_statuses SET is_read = 1 WHERE article_id = ?1",
            ActionKind::Unread => "UPDATE article_statuses SET is_read = 0 WHERE article_id = ?1",
            ActionKind::Star => "UPDATE article_statuses SET is_starred = 1 WHERE article_id = ?1",
            ActionKind::Unstar => {
                "UPDATE article_statuses SET is_starred = 0 WHERE article_id = ?1"
            }
        };

        let id = article_id.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if tx.execute(sql, params![id])? == 0 {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO pending_actions (article_id, action) VALUES (?1, ?2)",
                    params![id, kind.as_str()],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !found {
            return Err(AppError::NotFound(format!("article {}", article_id)));
        }
        Ok(())
    }

    // Outbox operations

    /// Up to `limit` distinct articles queued for `kind`, oldest first.
    pub async fn list_pending_actions(
        &self,
        kind: ActionKind,
        limit: usize,
    ) -> Result<Vec<PendingAction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let pending = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT article_id, MAX(id) FROM pending_actions
                       WHERE action = ?1
                       GROUP BY article_id
                       ORDER BY MIN(id)
                       LIMIT ?2"#,
                )?;
                let pending = stmt
                    .query_map(params![kind.as_str(), limit], |row| {
                        Ok(PendingAction {
                            article_id: row.get(0)?,
                            last_id: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(pending)
            })
            .await?;
        Ok(pending)
    }

    /// Remove a delivered batch from the outbox.
    ///
    /// Only rows up to each entry's `last_id` are deleted, so anything queued
    /// for the same article after the batch was listed stays pending.
    pub async fn delete_pending_actions(
        &self,
        kind: ActionKind,
        batch: Vec<PendingAction>,
    ) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                {
                    let mut stmt = tx.prepare(
                        "DELETE FROM pending_actions WHERE action = ?1 AND article_id = ?2 AND id <= ?3",
                    )?;
                    for entry in &batch {
                        deleted +=
                            stmt.execute(params![kind.as_str(), entry.article_id, entry.last_id])?;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn count_pending_actions(&self, kind: ActionKind) -> Result<usize> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pending_actions WHERE action = ?1",
                    params![kind.as_str()],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    // Reader state

    pub async fn get_last_sync_time(&self) -> Result<Option<i64>> {
        let last_sync = self
            .conn
            .call(|conn| {
                let last_sync: Option<Option<i64>> = conn
                    .query_row("SELECT last_sync FROM reader WHERE id = 1", [], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(last_sync.flatten())
            })
            .await?;
        Ok(last_sync)
    }

    pub async fn set_last_sync_time(&self, last_sync: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO reader (id, last_sync) VALUES (1, ?1)
                       ON CONFLICT(id) DO UPDATE SET last_sync = excluded.last_sync"#,
                    params![last_sync],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_token(&self) -> Result<Option<String>> {
        self.get_reader_text("token").await
    }

    pub async fn set_token(&self, token: &str) -> Result<()> {
        self.set_reader_text("token", token).await
    }

    pub async fn get_write_token(&self) -> Result<Option<String>> {
        self.get_reader_text("write_token").await
    }

    pub async fn set_write_token(&self, token: &str) -> Result<()> {
        self.set_reader_text("write_token", token).await
    }

    /// Forget both session tokens, forcing a fresh login next time.
    pub async fn clear_tokens(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "UPDATE reader SET token = NULL, write_token = NULL WHERE id = 1",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_reader_text(&self, column: &'static str) -> Result<Option<String>> {
        let value = self
            .conn
            .call(move |conn| {
                let value: Option<Option<String>> = conn
                    .query_row(
                        &format!("SELECT {} FROM reader WHERE id = 1", column),
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value.flatten())
            })
            .await?;
        Ok(value)
    }

    async fn set_reader_text(&self, column: &'static str, value: &str) -> Result<()> {
        let value = value.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO reader (id, {column}) VALUES (1, ?1)
                         ON CONFLICT(id) DO UPDATE SET {column} = excluded.{column}",
                        column = column
                    ),
                    params![value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

const ARTICLE_SELECT: &str = r#"SELECT a.id, a.feed_id, a.title, a.content, a.author, a.href,
                                       a.published_at, s.is_read, s.is_starred
                                FROM articles a
                                JOIN article_statuses s ON s.article_id = a.id"#;

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        html_url: row.get(3)?,
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        author: row.get(4)?,
        href: row.get(5)?,
        published_at: row.get(6)?,
        is_read: row.get::<_, i64>(7)? != 0,
        is_starred: row.get::<_, i64>(8)? != 0,
    })
}
