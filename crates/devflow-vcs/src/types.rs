use serde::{Deserialize, Serialize};

/// Marker prefixed to every bot-authored comment.
///
/// Webhook consumers check for this marker to avoid reacting to the
/// workflow's own output.
pub const BOT_MARKER: &str = "<!-- devflow-bot -->";

/// A created commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    /// Full commit hash as reported by the repository.
    pub hash: String,
}

/// An open change request (pull/merge request).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestRef {
    pub number: u64,
    pub url: String,
}

/// A fetched issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub title: String,
    pub body: String,
}
