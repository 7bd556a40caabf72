//! Redis CacheBackend implementation.

use super::pool::RedisPool;
use crate::ports::cache::{CacheBackend, CacheError, CacheOp, CacheReply};
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, Cmd, Value};
use std::time::Duration;
use tracing::warn;

fn to_cmd(op: &CacheOp) -> Cmd {
    match op {
        CacheOp::Set { key, value, ttl } => {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
            cmd
        }
        CacheOp::Delete { key } => {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(key);
            cmd
        }
        CacheOp::ListAppend { key, value } => {
            let mut cmd = redis::cmd("RPUSH");
            cmd.arg(key).arg(value);
            cmd
        }
        CacheOp::ListTrim { key, start, stop } => {
            let mut cmd = redis::cmd("LTRIM");
            cmd.arg(key).arg(*start).arg(*stop);
            cmd
        }
        CacheOp::SortedSetAdd { key, member, score } => {
            let mut cmd = redis::cmd("ZADD");
            cmd.arg(key).arg(*score).arg(member);
            cmd
        }
        CacheOp::SortedSetRemove { key, member } => {
            let mut cmd = redis::cmd("ZREM");
            cmd.arg(key).arg(member);
            cmd
        }
        CacheOp::SortedSetTrimByScore { key, max_score } => {
            let mut cmd = redis::cmd("ZREMRANGEBYSCORE");
            cmd.arg(key).arg("-inf").arg(*max_score);
            cmd
        }
        CacheOp::SortedSetCount { key } => {
            let mut cmd = redis::cmd("ZCARD");
            cmd.arg(key);
            cmd
        }
        CacheOp::Expire { key, ttl } => {
            let mut cmd = redis::cmd("PEXPIRE");
            cmd.arg(key).arg(ttl.as_millis() as u64);
            cmd
        }
    }
}

fn to_reply(value: Value) -> Result<CacheReply, CacheError> {
    match value {
        Value::Int(n) => Ok(CacheReply::Int(n)),
        Value::Okay | Value::Status(_) | Value::Nil => Ok(CacheReply::Ok),
        other => Err(CacheError::Command(format!(
            "unexpected reply: {:?}",
            other
        ))),
    }
}

impl RedisPool {
    async fn run(&self, op: CacheOp) -> Result<CacheReply, CacheError> {
        let mut conn = self.pool.get().await?;
        let value: Value = to_cmd(&op).query_async(&mut conn).await?;
        to_reply(value)
    }
}

#[async_trait]
impl CacheBackend for RedisPool {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.run(CacheOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let reply = self.run(CacheOp::Delete { key: key.to_string() }).await?;
        Ok(reply.as_int().unwrap_or(0) > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<usize, CacheError> {
        let reply = self
            .run(CacheOp::ListAppend {
                key: key.to_string(),
                value: value.to_string(),
            })
            .await?;
        Ok(reply.as_int().unwrap_or(0) as usize)
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let items: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(items)
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.run(CacheOp::ListTrim {
            key: key.to_string(),
            start,
            stop,
        })
        .await
        .map(|_| ())
    }

    async fn sorted_set_add(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        self.run(CacheOp::SortedSetAdd {
            key: key.to_string(),
            member: member.to_string(),
            score,
        })
        .await
        .map(|_| ())
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let reply = self
            .run(CacheOp::SortedSetRemove {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?;
        Ok(reply.as_int().unwrap_or(0) > 0)
    }

    async fn sorted_set_trim_by_score(
        &self,
        key: &str,
        max_score: f64,
    ) -> Result<usize, CacheError> {
        let reply = self
            .run(CacheOp::SortedSetTrimByScore {
                key: key.to_string(),
                max_score,
            })
            .await?;
        Ok(reply.as_int().unwrap_or(0) as usize)
    }

    async fn sorted_set_count(&self, key: &str) -> Result<usize, CacheError> {
        let mut conn = self.pool.get().await?;
        let count: usize = conn.zcard(key).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let reply = self
            .run(CacheOp::Expire {
                key: key.to_string(),
                ttl,
            })
            .await?;
        Ok(reply.as_int().unwrap_or(0) > 0)
    }

    async fn atomic(&self, ops: Vec<CacheOp>) -> Result<Vec<CacheReply>, CacheError> {
        let mut conn = self.pool.get().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            pipe.add_command(to_cmd(op));
        }
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;
        if values.len() != ops.len() {
            return Err(CacheError::Command(format!(
                "expected {} replies, got {}",
                ops.len(),
                values.len()
            )));
        }
        values.into_iter().map(to_reply).collect()
    }

    async fn health_check(&self) -> bool {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "redis health check could not get a connection");
                return false;
            }
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "redis health check failed");
                false
            }
        }
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
