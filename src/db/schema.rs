pub const PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
"#;

pub const SCHEMA: &str = r#"
-- feeds table (subscriptions, ids assigned by the server)
CREATE TABLE IF NOT EXISTS feeds (
    id TEXT PRIMARY KEY NOT NULL CHECK (id <> ''),
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    html_url TEXT NOT NULL DEFAULT ''
);

-- folders table (labels / tags)
CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY NOT NULL
);

-- feed_folders table
CREATE TABLE IF NOT EXISTS feed_folders (
    feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    folder_id TEXT NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    PRIMARY KEY (feed_id, folder_id)
);

CREATE INDEX IF NOT EXISTS idx_feed_folders_folder_id ON feed_folders(folder_id);

-- articles table (never updated once stored)
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY NOT NULL CHECK (id <> ''),
    feed_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    author TEXT NOT NULL,
    href TEXT NOT NULL,
    published_at INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_articles_feed_id ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at DESC);

-- article_statuses table (exactly one row per article)
CREATE TABLE IF NOT EXISTS article_statuses (
    article_id TEXT PRIMARY KEY NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    is_read INTEGER NOT NULL DEFAULT 0,
    is_starred INTEGER NOT NULL DEFAULT 0
);

-- pending_actions table (outbox of local status changes)
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id TEXT NOT NULL REFERENCES article_statuses(article_id) ON DELETE CASCADE,
    action TEXT NOT NULL CHECK (action IN ('read', 'unread', 'star', 'unstar')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_action ON pending_actions(action, id);

-- reader table (single row: session tokens and sync checkpoint)
CREATE TABLE IF NOT EXISTS reader (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    token TEXT,
    write_token TEXT,
    last_sync INTEGER
);
"#;
