//! # ファイルシステムキャッシュ
//!
//! ローカルディレクトリを永続ストアとして使う `CacheStore` 実装。
//!
//! ディレクトリ構成:
//! ```text
//! {root}/{db_name}/database.json      バージョンとストア一覧
//! {root}/{db_name}/{store_name}/{sha256(key)}
//! ```
//!
//! 値は一時ファイルに書いてから rename するため、途中で止まっても
//! 壊れたエントリが読まれることはない。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{open_action, AssetCache, CacheError, CacheStore, OpenAction};

/// データベースのメタデータファイル名
const META_FILE: &str = "database.json";

/// `database.json` の内容。
#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseMeta {
    version: u32,
    stores: Vec<String>,
}

/// ディレクトリ上のバージョン付きデータベース。
pub struct FileStore {
    db_dir: PathBuf,
    /// `open` の直列化用
    open_lock: Mutex<()>,
}

impl FileStore {
    /// 新しいFileStoreを作成する。ディレクトリは `open` 時に作られる。
    ///
    /// # 引数
    /// - `root`: キャッシュのルートディレクトリ
    /// - `db_name`: データベース名（例: "HtmlPackerCache"）
    pub fn new(root: impl Into<PathBuf>, db_name: &str) -> Self {
        Self {
            db_dir: root.into().join(db_name),
            open_lock: Mutex::new(()),
        }
    }

    /// データベースディレクトリのパス。
    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    async fn read_meta(&self) -> Result<Option<DatabaseMeta>, CacheError> {
        let path = self.db_dir.join(META_FILE);
        match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(meta) => Ok(Some(meta)),
                Err(e) => {
                    // 読めないメタデータは未作成扱いにして作り直す
                    tracing::warn!(path = %path.display(), "メタデータが壊れています: {e}");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Open(format!("{}: {e}", path.display()))),
        }
    }

    async fn write_meta(&self, meta: &DatabaseMeta) -> Result<(), CacheError> {
        let raw = serde_json::to_vec_pretty(meta)
            .map_err(|e| CacheError::Open(format!("メタデータのシリアライズ失敗: {e}")))?;
        write_atomic(&self.db_dir.join(META_FILE), &raw)
            .await
            .map_err(|e| CacheError::Open(format!("メタデータの書き込み失敗: {e}")))
    }

    /// アップグレードフック。旧データは移行せず破棄する。
    async fn recreate(&self, version: u32) -> Result<DatabaseMeta, CacheError> {
        match tokio::fs::remove_dir_all(&self.db_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::Open(format!(
                    "旧データベースの削除に失敗 ({}): {e}",
                    self.db_dir.display()
                )))
            }
        }
        tokio::fs::create_dir_all(&self.db_dir)
            .await
            .map_err(|e| CacheError::Open(format!("{}: {e}", self.db_dir.display())))?;
        Ok(DatabaseMeta {
            version,
            stores: Vec::new(),
        })
    }
}

#[async_trait::async_trait]
impl CacheStore for FileStore {
    async fn open(
        &self,
        store_name: &str,
        version: u32,
    ) -> Result<Arc<dyn AssetCache>, CacheError> {
        let _guard = self.open_lock.lock().await;

        let existing = self.read_meta().await?;
        let existing_version = existing.as_ref().map(|m| m.version);
        let mut meta = match (open_action(existing_version, version)?, existing) {
            (OpenAction::Reuse, Some(meta)) => meta,
            _ => {
                tracing::info!(
                    db = %self.db_dir.display(),
                    from = ?existing_version,
                    to = version,
                    "キャッシュデータベースを作成します"
                );
                self.recreate(version).await?
            }
        };

        let store_dir = self.db_dir.join(store_name);
        tokio::fs::create_dir_all(&store_dir)
            .await
            .map_err(|e| CacheError::Open(format!("{}: {e}", store_dir.display())))?;

        if !meta.stores.iter().any(|s| s == store_name) {
            meta.stores.push(store_name.to_string());
            self.write_meta(&meta).await?;
        }

        Ok(Arc::new(FileCache { dir: store_dir }))
    }
}

/// ディレクトリ上の名前付きストア。
/// ファイル名はキーのSHA-256（64文字の16進）なので、キーの長さや文字種に依存しない。
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(hex::encode(Sha256::digest(key.as_bytes())))
    }
}

#[async_trait::async_trait]
impl AssetCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Read(format!("{key}: {e}"))),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        write_atomic(&self.entry_path(key), bytes)
            .await
            .map_err(|e| CacheError::Write(format!("{key}: {e}")))?;
        tracing::debug!(key, size = bytes.len(), "キャッシュに保存しました");
        Ok(())
    }
}

/// 一時ファイルに書き込んでから置き換える。
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
