//! Key-value collaborator interface

use std::time::Duration;

use async_trait::async_trait;

/// Minimal key-value contract used to mirror live state for crash recovery
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value`, expiring after `ttl` when given
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns true if a key was removed
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys matching a glob pattern where `*` matches any run of characters
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Command rejected: {0}")]
    Command(String),

    #[error("Failed to encode or decode value: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Store unreachable: {0}")]
    Unavailable(String),
}

/// Glob match supporting `*` only
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // No wildcard at all
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.len() >= last.len() && rest.ends_with(last)
}
