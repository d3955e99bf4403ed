use crate::application::ports::kv_store::KeyValueStore;
use crate::domain::constants::lock_key;
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 共有ストア上の排他ロック
///
/// 値には取得者ごとのトークンを書き、解放はトークンが一致するときだけ行う。
/// TTL が切れた後に他のインスタンスが取り直したロックを消さないため。
pub struct DistributedLock {
    store: Arc<dyn KeyValueStore>,
    name: &'static str,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KeyValueStore>, name: &'static str, ttl: Duration) -> Self {
        Self { store, name, ttl }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// ロックを取れたらガードを返す。他が保持中なら None
    pub async fn try_acquire(&self) -> Result<Option<LockGuard>, AppError> {
        let key = lock_key(self.name);
        let token = Uuid::new_v4().to_string();
        if !self.store.try_acquire_lock(&key, &token, self.ttl).await? {
            return Ok(None);
        }
        tracing::debug!(target: "popularity::lock", lock = self.name, "lock acquired");
        Ok(Some(LockGuard {
            store: Arc::clone(&self.store),
            name: self.name,
            key,
            token,
            released: false,
        }))
    }
}

/// 保持中のロック
///
/// `release` を呼ばずに破棄された場合（キャンセルやパニック）は、
/// バックグラウンドで解放を試みる。
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    name: &'static str,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn release(mut self) {
        self.released = true;
        match self.store.release_lock(&self.key, &self.token).await {
            Ok(true) => {
                tracing::debug!(target: "popularity::lock", lock = self.name, "lock released");
            }
            Ok(false) => {
                tracing::warn!(
                    target: "popularity::lock",
                    lock = self.name,
                    "lock expired before release"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "popularity::lock",
                    lock = self.name,
                    error = %err,
                    "failed to release lock"
                );
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(target: "popularity::lock", lock = self.name, "no runtime to release lock, waiting for ttl");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        let name = self.name;
        handle.spawn(async move {
            if let Err(err) = store.release_lock(&key, &token).await {
                tracing::warn!(target: "popularity::lock", lock = name, error = %err, "failed to release abandoned lock");
            }
        });
    }
}
