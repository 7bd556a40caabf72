//! Process-local `CacheBackend`.

use crate::ports::cache::{CacheBackend, CacheError, CacheOp, CacheReply};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Mutating operations between full sweeps of expired keys.
const SWEEP_EVERY: usize = 64;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    ops_since_sweep: usize,
}

impl State {
    /// Keys that are never read again would otherwise only expire lazily and
    /// stay resident forever.
    fn sweep_expired(&mut self, now: Instant) {
        self.ops_since_sweep += 1;
        if self.ops_since_sweep < SWEEP_EVERY {
            return;
        }
        self.ops_since_sweep = 0;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "swept expired cache keys");
        }
    }

    /// Drops `key` if it has expired, then hands back whatever is left.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry { expires_at: Some(at), .. }) if *at <= now
        );
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn list_mut(&mut self, key: &str, now: Instant) -> Result<&mut Vec<String>, CacheError> {
        if self.live(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::List(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::List(items)) => Ok(items),
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn zset_mut(&mut self, key: &str, now: Instant) -> Result<&mut HashMap<String, f64>, CacheError> {
        if self.live(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::SortedSet(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::SortedSet(members)) => Ok(members),
            _ => Err(CacheError::WrongType(key.to_string())),
        }
    }

    fn zset_len(&mut self, key: &str, now: Instant) -> Result<usize, CacheError> {
        match self.live(key, now).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::SortedSet(members)) => Ok(members.len()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    /// Removes empty collections, mirroring Redis which never keeps them.
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key).map(|e| &e.value) {
            Some(Value::List(items)) => items.is_empty(),
            Some(Value::SortedSet(members)) => members.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn apply(&mut self, op: CacheOp, now: Instant) -> Result<CacheReply, CacheError> {
        self.sweep_expired(now);
        match op {
            CacheOp::Set { key, value, ttl } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Value::Str(value),
                        expires_at: ttl.map(|t| now + t),
                    },
                );
                Ok(CacheReply::Ok)
            }
            CacheOp::Delete { key } => {
                let existed = self.live(&key, now).is_some();
                self.entries.remove(&key);
                Ok(CacheReply::Int(existed as i64))
            }
            CacheOp::ListAppend { key, value } => {
                let items = self.list_mut(&key, now)?;
                items.push(value);
                Ok(CacheReply::Int(items.len() as i64))
            }
            CacheOp::ListTrim { key, start, stop } => {
                if self.live(&key, now).is_some() {
                    let items = self.list_mut(&key, now)?;
                    *items = match normalize_range(items.len(), start, stop) {
                        Some((from, to)) => items[from..=to].to_vec(),
                        None => Vec::new(),
                    };
                    self.drop_if_empty(&key);
                }
                Ok(CacheReply::Ok)
            }
            CacheOp::SortedSetAdd { key, member, score } => {
                let members = self.zset_mut(&key, now)?;
                let added = members.insert(member, score).is_none();
                Ok(CacheReply::Int(added as i64))
            }
            CacheOp::SortedSetRemove { key, member } => {
                if self.live(&key, now).is_none() {
                    return Ok(CacheReply::Int(0));
                }
                let removed = self.zset_mut(&key, now)?.remove(&member).is_some();
                self.drop_if_empty(&key);
                Ok(CacheReply::Int(removed as i64))
            }
            CacheOp::SortedSetTrimByScore { key, max_score } => {
                if self.live(&key, now).is_none() {
                    return Ok(CacheReply::Int(0));
                }
                let members = self.zset_mut(&key, now)?;
                let before = members.len();
                members.retain(|_, score| *score > max_score);
                let removed = before - members.len();
                self.drop_if_empty(&key);
                Ok(CacheReply::Int(removed as i64))
            }
            CacheOp::SortedSetCount { key } => Ok(CacheReply::Int(self.zset_len(&key, now)? as i64)),
            CacheOp::Expire { key, ttl } => match self.live(&key, now) {
                Some(entry) => {
                    entry.expires_at = Some(now + ttl);
                    Ok(CacheReply::Int(1))
                }
                None => Ok(CacheReply::Int(0)),
            },
        }
    }
}

/// Redis-style inclusive range with negative indices counted from the end.
fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn reply_int(reply: CacheReply) -> i64 {
    reply.as_int().unwrap_or(0)
}

/// Map-backed cache guarded by a single mutex. Atomic batches run entirely
/// under that guard, so they are atomic within this process only.
#[derive(Default)]
pub struct MemoryCache {
    state: Mutex<State>,
}

impl MemoryCache {
    pub fn new() -> Self {
        warn!("using in-memory cache; rate limits are not shared across instances");
        Self::default()
    }

    fn run(&self, op: CacheOp) -> Result<CacheReply, CacheError> {
        self.state.lock().apply(op, Instant::now())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.state.lock();
        match state.live(key, Instant::now()).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.run(CacheOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        })
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let reply = self.run(CacheOp::Delete { key: key.to_string() })?;
        Ok(reply_int(reply) > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.state.lock().live(key, Instant::now()).is_some())
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        let reply = self.run(CacheOp::ListAppend {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        Ok(reply_int(reply) as usize)
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let mut state = self.state.lock();
        match state.live(key, Instant::now()).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(match normalize_range(items.len(), start, stop) {
                Some((from, to)) => items[from..=to].to_vec(),
                None => Vec::new(),
            }),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.run(CacheOp::ListTrim {
            key: key.to_string(),
            start,
            stop,
        })
        .map(|_| ())
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        self.run(CacheOp::SortedSetAdd {
            key: key.to_string(),
            member: member.to_string(),
            score,
        })
        .map(|_| ())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let reply = self.run(CacheOp::SortedSetRemove {
            key: key.to_string(),
            member: member.to_string(),
        })?;
        Ok(reply_int(reply) > 0)
    }

    async fn sorted_set_trim_by_score(
        &self,
        key: &str,
        max_score: f64,
    ) -> Result<usize, CacheError> {
        let reply = self.run(CacheOp::SortedSetTrimByScore {
            key: key.to_string(),
            max_score,
        })?;
        Ok(reply_int(reply) as usize)
    }

    async fn sorted_set_count(&self, key: &str) -> Result<usize, CacheError> {
        let reply = self.run(CacheOp::SortedSetCount { key: key.to_string() })?;
        Ok(reply_int(reply) as usize)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let reply = self.run(CacheOp::Expire {
            key: key.to_string(),
            ttl,
        })?;
        Ok(reply_int(reply) > 0)
    }

    async fn atomic(&self, ops: Vec<CacheOp>) -> Result<Vec<CacheReply>, CacheError> {
        let mut state = self.state.lock();
        let now = Instant::now();
        ops.into_iter().map(|op| state.apply(op, now)).collect()
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strings_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Some(Duration::from_millis(30))).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn list_append_range_and_trim() {
        let cache = MemoryCache::new();
        for v in ["a", "b", "c", "d"] {
            cache.list_append("l", v).await.unwrap();
        }
        assert_eq!(cache.list_range("l", 0, -1).await.unwrap(), vec!["a", "b", "c", "d"]);
        cache.list_trim("l", -2, -1).await.unwrap();
        assert_eq!(cache.list_range("l", 0, -1).await.unwrap(), vec!["c", "d"]);
        cache.list_trim("l", 5, 10).await.unwrap();
        assert!(!cache.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_trim_is_inclusive() {
        let cache = MemoryCache::new();
        cache.sorted_set_add("z", "a", 10.0).await.unwrap();
        cache.sorted_set_add("z", "b", 20.0).await.unwrap();
        cache.sorted_set_add("z", "c", 30.0).await.unwrap();
        assert_eq!(cache.sorted_set_trim_by_score("z", 20.0).await.unwrap(), 2);
        assert_eq!(cache.sorted_set_count("z").await.unwrap(), 1);
        assert!(cache.sorted_set_remove("z", "c").await.unwrap());
        assert_eq!(cache.sorted_set_count("z").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn atomic_returns_positional_replies() {
        let cache = MemoryCache::new();
        let replies = cache
            .atomic(vec![
                CacheOp::SortedSetTrimByScore {
                    key: "w".into(),
                    max_score: 0.0,
                },
                CacheOp::SortedSetAdd {
                    key: "w".into(),
                    member: "m1".into(),
                    score: 5.0,
                },
                CacheOp::SortedSetCount { key: "w".into() },
                CacheOp::Expire {
                    key: "w".into(),
                    ttl: Duration::from_secs(60),
                },
            ])
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![
                CacheReply::Int(0),
                CacheReply::Int(1),
                CacheReply::Int(1),
                CacheReply::Int(1)
            ]
        );
    }

    #[tokio::test]
    async fn untouched_expired_keys_are_swept() {
        let cache = MemoryCache::new();
        for i in 0..100 {
            cache
                .set(&format!("k{}", i), "v", Some(Duration::from_millis(20)))
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..SWEEP_EVERY {
            cache.set("other", "v", None).await.unwrap();
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        assert!(matches!(
            cache.sorted_set_add("k", "m", 1.0).await,
            Err(CacheError::WrongType(_))
        ));
    }
}
