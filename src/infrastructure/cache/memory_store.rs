use crate::application::ports::kv_store::{DecayOutcome, KeyValueStore, ListRemoval, TailAppend};
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, i64>),
    ZSet(HashMap<String, f64>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// プロセス内で完結するキーバリューストア
///
/// 1 つのミューテックスで全操作を直列化するので、各操作は Redis のスクリプトと同じく
/// 原子的に振る舞う。単一ノード構成とテストで使う。
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    unavailable: Arc<AtomicBool>,
}

type Entries = HashMap<String, CacheEntry>;

fn wrong_type(key: &str) -> AppError {
    AppError::Store(format!("WRONGTYPE operation against key {key}"))
}

fn live<'a>(entries: &'a mut Entries, key: &str) -> Option<&'a mut CacheEntry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn hash_mut<'a>(entries: &'a mut Entries, key: &str) -> Result<&'a mut HashMap<String, i64>, AppError> {
    if live(entries, key).is_none() {
        entries.insert(key.to_string(), CacheEntry::new(Value::Hash(HashMap::new()), None));
    }
    match entries.get_mut(key).map(|entry| &mut entry.value) {
        Some(Value::Hash(hash)) => Ok(hash),
        _ => Err(wrong_type(key)),
    }
}

fn zset_mut<'a>(entries: &'a mut Entries, key: &str) -> Result<&'a mut HashMap<String, f64>, AppError> {
    if live(entries, key).is_none() {
        entries.insert(key.to_string(), CacheEntry::new(Value::ZSet(HashMap::new()), None));
    }
    match entries.get_mut(key).map(|entry| &mut entry.value) {
        Some(Value::ZSet(zset)) => Ok(zset),
        _ => Err(wrong_type(key)),
    }
}

fn existing_list<'a>(
    entries: &'a mut Entries,
    key: &str,
) -> Result<Option<&'a mut VecDeque<String>>, AppError> {
    match live(entries, key).map(|entry| &mut entry.value) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn entry_id(raw: &str, id_field: &str) -> Option<i64> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get(id_field).and_then(|id| id.as_i64()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 障害を模擬する。true の間は全操作が Store エラーを返す
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn size(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Store("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry::new(Value::Str(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.check_available()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).is_some())
    }

    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let hash = hash_mut(&mut entries, key)?;
        let value = hash.entry(field.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn hash_get_and_clear(&self, key: &str) -> Result<HashMap<String, i64>, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_none() {
            return Ok(HashMap::new());
        }
        match entries.remove(key).map(|entry| entry.value) {
            Some(Value::Hash(hash)) => Ok(hash),
            Some(other) => {
                entries.insert(key.to_string(), CacheEntry::new(other, None));
                Err(wrong_type(key))
            }
            None => Ok(HashMap::new()),
        }
    }

    async fn zset_increment(&self, key: &str, member: &str, delta: f64) -> Result<f64, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let zset = zset_mut(&mut entries, key)?;
        let score = zset.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zset_remove(&self, key: &str, member: &str) -> Result<(), AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        zset_mut(&mut entries, key)?.remove(member);
        Ok(())
    }

    async fn zset_top(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let zset = zset_mut(&mut entries, key)?;
        let mut members: Vec<(String, f64)> =
            zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        // Redis と同じく同点はメンバー名の降順
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        members.truncate(n);
        Ok(members)
    }

    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(zset_mut(&mut entries, key)?.get(member).copied())
    }

    async fn zset_decay(
        &self,
        key: &str,
        factor: f64,
        floor: f64,
    ) -> Result<DecayOutcome, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let zset = zset_mut(&mut entries, key)?;
        let mut outcome = DecayOutcome::default();
        zset.retain(|_, score| {
            *score *= factor;
            if *score < floor {
                outcome.removed += 1;
                false
            } else {
                outcome.decayed += 1;
                true
            }
        });
        Ok(outcome)
    }

    async fn try_acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            CacheEntry::new(Value::Str(token.to_string()), Some(ttl)),
        );
        Ok(true)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let held_by_token = matches!(
            live(&mut entries, key).map(|entry| &entry.value),
            Some(Value::Str(current)) if current == token
        );
        if held_by_token {
            entries.remove(key);
        }
        Ok(held_by_token)
    }

    async fn check_mark_increment(
        &self,
        marker_key: &str,
        counter_key: &str,
        field: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if live(&mut entries, marker_key).is_some() {
            return Ok(false);
        }
        entries.insert(
            marker_key.to_string(),
            CacheEntry::new(Value::Str("1".to_string()), Some(ttl)),
        );
        let hash = hash_mut(&mut entries, counter_key)?;
        *hash.entry(field.to_string()).or_insert(0) += 1;
        Ok(true)
    }

    async fn list_replace(
        &self,
        key: &str,
        items: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        if items.is_empty() {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            CacheEntry::new(Value::List(items.iter().cloned().collect()), ttl),
        );
        Ok(())
    }

    async fn list_push_front_bounded(
        &self,
        key: &str,
        item: &str,
        max_len: usize,
    ) -> Result<bool, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let Some(list) = existing_list(&mut entries, key)? else {
            return Ok(false);
        };
        list.push_front(item.to_string());
        list.truncate(max_len);
        Ok(true)
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
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let Some(list) = existing_list(&mut entries, key)? else {
            return Ok(TailAppend::Skipped);
        };
        let boundary_id = list.back().and_then(|raw| entry_id(raw, id_field));
        if boundary_id != Some(expected_tail) {
            return Ok(TailAppend::TailMoved {
                remaining: list.len(),
                boundary_id,
            });
        }
        if list.len() >= max_len
            || list
                .iter()
                .any(|raw| entry_id(raw, id_field) == Some(item_id))
        {
            return Ok(TailAppend::Skipped);
        }
        list.push_back(item.to_string());
        Ok(TailAppend::Appended)
    }

    async fn list_range(&self, key: &str) -> Result<Option<Vec<String>>, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(existing_list(&mut entries, key)?.map(|list| list.iter().cloned().collect()))
    }

    async fn list_remove_entry(
        &self,
        key: &str,
        id_field: &str,
        id: i64,
    ) -> Result<ListRemoval, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let Some(list) = existing_list(&mut entries, key)? else {
            return Ok(ListRemoval::default());
        };
        let position = list
            .iter()
            .position(|raw| entry_id(raw, id_field) == Some(id));
        let removed = match position {
            Some(index) => list.remove(index).is_some(),
            None => false,
        };
        let removal = ListRemoval {
            removed,
            remaining: list.len(),
            boundary_id: list.back().and_then(|raw| entry_id(raw, id_field)),
        };
        // Redis と同じく空になった一覧はキーごと消える
        if removal.remaining == 0 {
            entries.remove(key);
        }
        Ok(removal)
    }

    async fn list_compare_and_set(
        &self,
        key: &str,
        index: usize,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, AppError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let Some(list) = existing_list(&mut entries, key)? else {
            return Ok(false);
        };
        match list.get_mut(index) {
            Some(current) if current == expected => {
                *current = replacement.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_get_and_clear_drains_exactly_once() {
        let store = MemoryStore::new();
        store.hash_increment("h", "1", 2).await.unwrap();
        store.hash_increment("h", "1", 3).await.unwrap();
        store.hash_increment("h", "2", -1).await.unwrap();

        let drained = store.hash_get_and_clear("h").await.unwrap();
        assert_eq!(drained.get("1"), Some(&5));
        assert_eq!(drained.get("2"), Some(&-1));
        assert!(store.hash_get_and_clear("h").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_release_requires_matching_token() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.try_acquire_lock("lock:a", "t1", ttl).await.unwrap());
        assert!(!store.try_acquire_lock("lock:a", "t2", ttl).await.unwrap());
        assert!(!store.release_lock("lock:a", "t2").await.unwrap());
        assert!(store.release_lock("lock:a", "t1").await.unwrap());
        assert!(store.try_acquire_lock("lock:a", "t2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn push_front_bounded_requires_existing_list() {
        let store = MemoryStore::new();
        assert!(!store.list_push_front_bounded("l", "x", 3).await.unwrap());
        assert!(store.list_range("l").await.unwrap().is_none());

        let items: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        store.list_replace("l", &items, None).await.unwrap();
        assert!(store.list_push_front_bounded("l", "z", 3).await.unwrap());
        assert_eq!(
            store.list_range("l").await.unwrap().unwrap(),
            vec!["z", "a", "b"]
        );
    }

    #[tokio::test]
    async fn list_remove_entry_reports_boundary() {
        let store = MemoryStore::new();
        let items: Vec<String> = (1..=3)
            .rev()
            .map(|id| format!(r#"{{"postId":{id}}}"#))
            .collect();
        store.list_replace("l", &items, None).await.unwrap();

        let removal = store.list_remove_entry("l", "postId", 2).await.unwrap();
        assert!(removal.removed);
        assert_eq!(removal.remaining, 2);
        assert_eq!(removal.boundary_id, Some(1));

        let missing = store.list_remove_entry("l", "postId", 42).await.unwrap();
        assert!(!missing.removed);
        assert_eq!(missing.remaining, 2);
    }

    #[tokio::test]
    async fn push_back_if_tail_checks_tail_bound_and_duplicates() {
        let store = MemoryStore::new();
        let entry = |id: i64| format!(r#"{{"postId":{id}}}"#);
        assert_eq!(
            store
                .list_push_back_if_tail("l", "postId", 3, 2, &entry(2), 5)
                .await
                .unwrap(),
            TailAppend::Skipped
        );

        let items: Vec<String> = [5, 4, 3].into_iter().map(entry).collect();
        store.list_replace("l", &items, None).await.unwrap();

        assert_eq!(
            store
                .list_push_back_if_tail("l", "postId", 4, 2, &entry(2), 5)
                .await
                .unwrap(),
            TailAppend::TailMoved {
                remaining: 3,
                boundary_id: Some(3)
            }
        );
        assert_eq!(
            store
                .list_push_back_if_tail("l", "postId", 3, 5, &entry(5), 5)
                .await
                .unwrap(),
            TailAppend::Skipped
        );
        assert_eq!(
            store
                .list_push_back_if_tail("l", "postId", 3, 2, &entry(2), 5)
                .await
                .unwrap(),
            TailAppend::Appended
        );
        assert_eq!(
            store
                .list_push_back_if_tail("l", "postId", 2, 1, &entry(1), 4)
                .await
                .unwrap(),
            TailAppend::Skipped
        );
        assert_eq!(store.list_range("l").await.unwrap().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.zset_increment("z", "1", 1.0).await.unwrap_err();
        assert!(err.is_store_failure());
        store.set_unavailable(false);
        assert_eq!(store.zset_increment("z", "1", 1.0).await.unwrap(), 1.0);
    }
}
