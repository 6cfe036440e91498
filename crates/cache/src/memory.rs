//! # メモリ内キャッシュ
//!
//! プロセス内で完結する `CacheStore` 実装。
//! 同じ `MemoryStore` を再度開くと前回の内容が見えるため、
//! 「2回目のページ読み込み」をテストで再現できる。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::{open_action, AssetCache, CacheError, CacheStore, OpenAction};

/// メモリ内の名前付きストア。
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    /// 保存できる合計バイト数の上限（ブラウザの容量制限の再現用）
    quota: Option<usize>,
}

impl MemoryCache {
    /// 容量無制限のストアを作成する。
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: None,
        }
    }

    /// 合計 `quota` バイトを超える書き込みを拒否するストアを作成する。
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// 保存済みのキー数。
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AssetCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if let Some(quota) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if used + bytes.len() > quota {
                return Err(CacheError::Write(format!(
                    "容量超過 (使用中 {used}B + 要求 {}B > 上限 {quota}B)",
                    bytes.len()
                )));
            }
        }
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// メモリ内データベースの状態。
struct MemoryDatabase {
    version: Option<u32>,
    stores: HashMap<String, Arc<MemoryCache>>,
}

/// メモリ内のバージョン付きデータベース。
pub struct MemoryStore {
    db: Mutex<MemoryDatabase>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            db: Mutex::new(MemoryDatabase {
                version: None,
                stores: HashMap::new(),
            }),
            quota: None,
        }
    }

    /// 新しく作るストアに容量上限を設定する。
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new()
        }
    }

    /// 現在のスキーマバージョン（未作成なら `None`）。
    pub async fn version(&self) -> Option<u32> {
        self.db.lock().await.version
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn open(
        &self,
        store_name: &str,
        version: u32,
    ) -> Result<Arc<dyn AssetCache>, CacheError> {
        let mut db = self.db.lock().await;

        if open_action(db.version, version)? == OpenAction::Upgrade {
            tracing::info!(
                from = ?db.version,
                to = version,
                "メモリキャッシュを作り直します"
            );
            db.stores.clear();
            db.version = Some(version);
        }

        let quota = self.quota;
        let cache = db
            .stores
            .entry(store_name.to_string())
            .or_insert_with(|| {
                Arc::new(match quota {
                    Some(q) => MemoryCache::with_quota(q),
                    None => MemoryCache::new(),
                })
            })
            .clone();
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let cache = MemoryCache::new();
        let bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        cache.put("wasm-app-abc", &bytes).await.unwrap();
        assert_eq!(cache.get("wasm-app-abc").await.unwrap(), Some(bytes));
    }

    #[tokio::test]
    async fn test_miss_is_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("wasm-app-missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quota_rejects_write() {
        let cache = MemoryCache::with_quota(8);
        cache.put("a", &[1, 2, 3, 4]).await.unwrap();
        let err = cache.put("b", &[0; 5]).await.unwrap_err();
        assert!(matches!(err, CacheError::Write(_)));
        // 同じキーの置き換えは旧値の分を差し引いて判定する
        cache.put("a", &[0; 8]).await.unwrap();
        assert_eq!(cache.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reopen_same_version_keeps_data() {
        let store = MemoryStore::new();
        let first = store.open("wasm_cache", 1).await.unwrap();
        first.put("k", b"v").await.unwrap();

        let second = store.open("wasm_cache", 1).await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_version_bump_discards_data() {
        let store = MemoryStore::new();
        let v1 = store.open("wasm_cache", 1).await.unwrap();
        v1.put("k", b"v").await.unwrap();

        let v2 = store.open("wasm_cache", 2).await.unwrap();
        assert_eq!(v2.get("k").await.unwrap(), None);
        assert_eq!(store.version().await, Some(2));
    }

    #[tokio::test]
    async fn test_version_downgrade_fails() {
        let store = MemoryStore::new();
        store.open("wasm_cache", 2).await.unwrap();
        let err = store.open("wasm_cache", 1).await.err().unwrap();
        assert!(matches!(err, CacheError::VersionDowngrade { .. }));
    }

    proptest::proptest! {
        #[test]
        fn prop_any_key_roundtrips(
            key in ".*",
            value in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let got = rt.block_on(async {
                let cache = MemoryCache::new();
                cache.put(&key, &value).await.unwrap();
                cache.get(&key).await.unwrap()
            });
            proptest::prop_assert_eq!(got, Some(value));
        }
    }
}
