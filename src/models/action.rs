use std::fmt;

/// A locally made status change waiting to be pushed to the server.
///
/// Each kind has its own outbox lane, drained independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ActionKind {
    Read,
    Unread,
    Star,
    Unstar,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Read,
        ActionKind::Unread,
        ActionKind::Star,
        ActionKind::Unstar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Read => "read",
            ActionKind::Unread => "unread",
            ActionKind::Star => "star",
            ActionKind::Unstar => "unstar",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An article queued in one outbox lane.
///
/// `last_id` is the newest outbox row seen for the article when the batch was
/// listed. Rows queued after that are not part of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub article_id: String,
    pub last_id: i64,
}
