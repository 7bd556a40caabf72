use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache command failed: {0}")]
    Command(String),
    #[error("wrong value type at key {0}")]
    WrongType(String),
}

/// A single mutating or counting step inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    ListAppend {
        key: String,
        value: String,
    },
    ListTrim {
        key: String,
        start: isize,
        stop: isize,
    },
    SortedSetAdd {
        key: String,
        member: String,
        score: f64,
    },
    SortedSetRemove {
        key: String,
        member: String,
    },
    /// Remove members whose score is `<= max_score`.
    SortedSetTrimByScore {
        key: String,
        max_score: f64,
    },
    SortedSetCount {
        key: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Reply to one [`CacheOp`], positionally matched to the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheReply {
    Ok,
    Int(i64),
}

impl CacheReply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CacheReply::Int(n) => Some(*n),
            CacheReply::Ok => None,
        }
    }
}

/// Shared key/value capability used by admission control.
///
/// Two implementations exist: a process-local map and a Redis pool. Only
/// the latter is shared between service instances.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn list_append(&self, key: &str, value: &str) -> Result<usize, CacheError>;
    async fn list_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, CacheError>;
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError>;

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError>;
    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError>;
    async fn sorted_set_trim_by_score(&self, key: &str, max_score: f64)
        -> Result<usize, CacheError>;
    async fn sorted_set_count(&self, key: &str) -> Result<usize, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Apply `ops` as one indivisible unit and return one reply per op.
    async fn atomic(&self, ops: Vec<CacheOp>) -> Result<Vec<CacheReply>, CacheError>;

    async fn health_check(&self) -> bool;

    /// Backend name reported by the health endpoint.
    fn kind(&self) -> &'static str;
}
