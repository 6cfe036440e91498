//! # アセットキャッシュ
//!
//! デコード済みWASMバイナリを保持するローカルKVストアの抽象インターフェース。
//!
//! バージョン付きデータベースの中に名前付きストアを1つ開き、
//! `コンテンツハッシュ付きキー → 生バイト列` を保存する。
//! キャッシュは次回以降の読み込みを速くするための最適化であり、
//! 書き込み失敗でブートストラップを止めてはならない（呼び出し側の責務）。
//!
//! ## バックエンド
//! - `MemoryStore`: プロセス内メモリ（テスト・キャッシュ無効時の代替）
//! - `FileStore`: ローカルディレクトリ（ネイティブホスト用の永続ストア）

pub mod file;
pub mod memory;

pub use file::{FileCache, FileStore};
pub use memory::{MemoryCache, MemoryStore};

use std::sync::Arc;

/// キャッシュのエラー型
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// データベースを開けない（ストア利用不可）
    #[error("キャッシュデータベースを開けません: {0}")]
    Open(String),
    /// 既存データベースより古いスキーマバージョンでの要求
    #[error("要求バージョン {requested} は既存バージョン {existing} より古いため開けません")]
    VersionDowngrade {
        /// 要求されたバージョン
        requested: u32,
        /// 既存のバージョン
        existing: u32,
    },
    /// 読み込み失敗
    #[error("キャッシュの読み込みに失敗: {0}")]
    Read(String),
    /// 書き込み失敗（容量超過等）
    #[error("キャッシュへの書き込みに失敗: {0}")]
    Write(String),
}

/// 開いたストアへのハンドル。
///
/// 1回のブートストラップ中に両フェーズで共有される。明示的なクローズはなく、
/// ハンドルのドロップで解放される。
#[async_trait::async_trait]
pub trait AssetCache: Send + Sync {
    /// キーに対応するバイト列を取得する。未登録は `Ok(None)`（エラーではない）。
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// キーにバイト列を保存する。既存の値は置き換える。
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;
}

/// バージョン付きデータベースの抽象インターフェース。
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// 名前付きストアを開く（初回は作成する）。
    ///
    /// - 要求バージョンが既存より新しい: データベースを作り直す（旧データは破棄、移行なし）
    /// - 同じ: そのまま開く
    /// - 古い: `CacheError::VersionDowngrade`
    ///
    /// 同一ストアへの並行呼び出しは内部で直列化される。
    async fn open(&self, store_name: &str, version: u32)
        -> Result<Arc<dyn AssetCache>, CacheError>;
}

/// バージョン比較の結果。両バックエンドで共通の判定に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenAction {
    /// 既存をそのまま使う
    Reuse,
    /// 作成または作り直し（アップグレードフック）
    Upgrade,
}

fn open_action(existing: Option<u32>, requested: u32) -> Result<OpenAction, CacheError> {
    if requested == 0 {
        return Err(CacheError::Open(
            "スキーマバージョンは1以上である必要があります".to_string(),
        ));
    }
    match existing {
        Some(existing) if existing > requested => {
            Err(CacheError::VersionDowngrade { requested, existing })
        }
        Some(existing) if existing == requested => Ok(OpenAction::Reuse),
        _ => Ok(OpenAction::Upgrade),
    }
}
