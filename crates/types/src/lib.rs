//! # htmlpacker 共有型定義
//!
//! ブートストラップローダー・キャッシュ・CLIで共有するデータ構造。
//!
//! ## 埋め込み規則
//! - パック済みHTMLは `<pre id=… hash=…>` 要素にBase64テキストを保持する
//! - `hash` 属性はパッカーが付与するコンテンツ指紋で、キャッシュキーの接尾辞にのみ使う

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// 埋め込み要素の既定値
// ---------------------------------------------------------------------------

/// デコーダーモジュールを保持する要素のID
pub const DECODER_ELEMENT_ID: &str = "bin-wasm-decoder";

/// アプリケーションモジュールを保持する要素のID
pub const APP_ELEMENT_ID: &str = "bin-wasm-app";

/// コンテンツハッシュを保持する属性名
pub const HASH_ATTRIBUTE: &str = "hash";

// ---------------------------------------------------------------------------
// モジュール種別
// ---------------------------------------------------------------------------

/// ブートストラップで読み込む2種類のモジュール。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// アプリケーション本体のペイロードを展開する補助モジュール
    Decoder,
    /// アプリケーション本体
    App,
}

impl ModuleKind {
    /// キャッシュキーの接頭辞。
    pub fn cache_prefix(self) -> &'static str {
        match self {
            ModuleKind::Decoder => "wasm-decoder-",
            ModuleKind::App => "wasm-app-",
        }
    }

    /// 既定の埋め込み要素ID。
    pub fn default_element_id(self) -> &'static str {
        match self {
            ModuleKind::Decoder => DECODER_ELEMENT_ID,
            ModuleKind::App => APP_ELEMENT_ID,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Decoder => f.write_str("decoder"),
            ModuleKind::App => f.write_str("app"),
        }
    }
}

/// キャッシュキー（`接頭辞 + コンテンツハッシュ`）。
///
/// ハッシュは実行時に計算・検証しない。同じキーは常に同一内容を指すという前提は
/// パッカー側の指紋付与によって成り立つ。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// モジュール種別とハッシュからキーを組み立てる。
    pub fn new(kind: ModuleKind, hash: &str) -> Self {
        Self(format!("{}{hash}", kind.cache_prefix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// 埋め込みモジュール記述子
// ---------------------------------------------------------------------------

/// HTML文書に埋め込まれたモジュール1件分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedModule {
    /// 要素ID（例: "bin-wasm-app"）
    pub id: String,
    /// `hash` 属性。空文字列は未指定と同じ扱いにする。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Base64テキスト（前後の空白は除去済み）
    pub text: String,
}

impl EmbeddedModule {
    pub fn new(id: impl Into<String>, hash: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hash: hash.filter(|h| !h.is_empty()),
            text: text.into(),
        }
    }

    /// キャッシュに使えるハッシュ。未指定・空文字列の場合は `None`。
    pub fn cache_hash(&self) -> Option<&str> {
        self.hash.as_deref().filter(|h| !h.is_empty())
    }
}

// ---------------------------------------------------------------------------
// 進捗表示
// ---------------------------------------------------------------------------

/// ステータスメッセージの重要度。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Normal,
    Error,
    Success,
}

/// 読み込み段階。進捗表示専用で、制御フローには使わない。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum LoadingStage {
    #[default]
    OpenCache,
    CheckCache,
    Decode,
    CacheWrite,
    Initialize,
    Ready,
}
