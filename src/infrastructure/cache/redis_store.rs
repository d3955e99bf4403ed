use super::scripts;
use crate::application::ports::kv_store::{DecayOutcome, KeyValueStore, ListRemoval, TailAppend};
use crate::shared::config::StoreConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncConnectionConfig, Script};
use std::collections::HashMap;
use std::time::Duration;

struct Scripts {
    hash_get_and_clear: Script,
    zset_decay: Script,
    release_lock: Script,
    check_mark_increment: Script,
    list_replace: Script,
    list_push_front_bounded: Script,
    list_push_back_if_tail: Script,
    list_range: Script,
    list_remove_entry: Script,
    list_compare_and_set: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            hash_get_and_clear: Script::new(scripts::HASH_GET_AND_CLEAR),
            zset_decay: Script::new(scripts::ZSET_DECAY),
            release_lock: Script::new(scripts::RELEASE_LOCK),
            check_mark_increment: Script::new(scripts::CHECK_MARK_INCREMENT),
            list_replace: Script::new(scripts::LIST_REPLACE),
            list_push_front_bounded: Script::new(scripts::LIST_PUSH_FRONT_BOUNDED),
            list_push_back_if_tail: Script::new(scripts::LIST_PUSH_BACK_IF_TAIL),
            list_range: Script::new(scripts::LIST_RANGE),
            list_remove_entry: Script::new(scripts::LIST_REMOVE_ENTRY),
            list_compare_and_set: Script::new(scripts::LIST_COMPARE_AND_SET),
        }
    }
}

/// Redis を使ったキーバリューストア
///
/// 多重化コネクションを共有し、各呼び出しは応答タイムアウトで打ち切られる。
pub struct RedisStore {
    conn: MultiplexedConnection,
    scripts: Scripts,
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis().min(u128::from(u64::MAX)) as u64).max(1)
}

fn parse_id(raw: &str, id_field: &str) -> Option<i64> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get(id_field).and_then(|id| id.as_i64()))
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let async_config =
            AsyncConnectionConfig::new().set_response_timeout(Some(config.response_timeout()));
        let conn = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_async_connection_with_config(&async_config),
        )
        .await??;

        tracing::info!(
            target: "popularity::store",
            response_timeout_ms = config.response_timeout_ms,
            "connected to redis"
        );

        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            scripts: Scripts::load(),
        }
    }

    fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.connection();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.connection();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, AppError> {
        let mut conn = self.connection();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn hash_get_and_clear(&self, key: &str) -> Result<HashMap<String, i64>, AppError> {
        let mut conn = self.connection();
        let flat: Vec<String> = self
            .scripts
            .hash_get_and_clear
            .key(key)
            .invoke_async(&mut conn)
            .await?;

        let mut drained = HashMap::with_capacity(flat.len() / 2);
        for pair in flat.chunks(2) {
            let [field, value] = pair else {
                continue;
            };
            match value.parse::<i64>() {
                Ok(delta) => {
                    drained.insert(field.clone(), delta);
                }
                Err(err) => {
                    tracing::warn!(key, field = %field, error = %err, "skipping non-integer counter");
                }
            }
        }
        Ok(drained)
    }

    async fn zset_increment(&self, key: &str, member: &str, delta: f64) -> Result<f64, AppError> {
        let mut conn = self.connection();
        let score: f64 = redis::cmd("ZINCRBY")
            .arg(key)
            .arg(delta)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(score)
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<(), AppError> {
        let mut conn = self.connection();
        let _: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn zset_top(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>, AppError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let members: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(n as i64 - 1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>, AppError> {
        let mut conn = self.connection();
        let score: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(score)
    }

    async fn zset_decay(
        &self,
        key: &str,
        factor: f64,
        floor: f64,
    ) -> Result<DecayOutcome, AppError> {
        let mut conn = self.connection();
        let (decayed, removed): (u64, u64) = self
            .scripts
            .zset_decay
            .key(key)
            .arg(factor)
            .arg(floor)
            .invoke_async(&mut conn)
            .await?;
        Ok(DecayOutcome { decayed, removed })
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, AppError> {
        let mut conn = self.connection();
        let deleted: i64 = self
            .scripts
            .release_lock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn check_mark_increment(
        &self,
        marker_key: &str,
        counter_key: &str,
        field: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection();
        let first: i64 = self
            .scripts
            .check_mark_increment
            .key(marker_key)
            .key(counter_key)
            .arg(ttl_millis(ttl))
            .arg(field)
            .invoke_async(&mut conn)
            .await?;
        Ok(first == 1)
    }

    async fn list_replace(
        &self,
        key: &str,
        items: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), AppError> {
        let mut conn = self.connection();
        let ttl_ms = ttl.map(ttl_millis).unwrap_or(0);
        let mut invocation = self.scripts.list_replace.key(key);
        invocation.arg(ttl_ms);
        for item in items {
            invocation.arg(item);
        }
        let _: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(())
    }

    async fn list_push_front_bounded(
        &self,
        key: &str,
        item: &str,
        max_len: usize,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection();
        let applied: i64 = self
            .scripts
            .list_push_front_bounded
            .key(key)
            .arg(item)
            .arg(max_len)
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn list_push_back_if_tail(
        &self,
        key: &str,
        id_field: &str,
        expected_tail: i64,
        item_id: i64,
        item: &str,
        max_len: usize,
    ) -> Result<TailAppend, AppError> {
        let mut conn = self.connection();
        let (status, remaining, last): (i64, usize, Option<String>) = self
            .scripts
            .list_push_back_if_tail
            .key(key)
            .arg(id_field)
            .arg(expected_tail)
            .arg(item_id)
            .arg(item)
            .arg(max_len)
            .invoke_async(&mut conn)
            .await?;
        Ok(match status {
            1 => TailAppend::Appended,
            0 => TailAppend::TailMoved {
                remaining,
                boundary_id: last.as_deref().and_then(|raw| parse_id(raw, id_field)),
            },
            _ => TailAppend::Skipped,
        })
    }

    async fn list_range(&self, key: &str) -> Result<Option<Vec<String>>, AppError> {
        let mut conn = self.connection();
        let items: Option<Vec<String>> = self
            .scripts
            .list_range
            .key(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn list_remove_entry(
        &self,
        key: &str,
        id_field: &str,
        id: i64,
    ) -> Result<ListRemoval, AppError> {
        let mut conn = self.connection();
        let (removed, remaining, last): (i64, usize, Option<String>) = self
            .scripts
            .list_remove_entry
            .key(key)
            .arg(id_field)
            .arg(id)
            .invoke_async(&mut conn)
            .await?;
        Ok(ListRemoval {
            removed: removed == 1,
            remaining,
            boundary_id: last.as_deref().and_then(|raw| parse_id(raw, id_field)),
        })
    }

    async fn list_compare_and_set(
        &self,
        key: &str,
        index: usize,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection();
        let swapped: i64 = self
            .scripts
            .list_compare_and_set
            .key(key)
            .arg(index)
            .arg(expected)
            .arg(replacement)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}
