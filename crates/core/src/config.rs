//! # ブートストラップ設定
//!
//! 既定値はパック済みページのランタイムと同じ値にしてある。
//! 環境変数で上書きでき、CLIの引数はさらにその上から上書きする。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use htmlpacker_types::{APP_ELEMENT_ID, DECODER_ELEMENT_ID};

/// 既定のデータベース名
pub const DEFAULT_DB_NAME: &str = "HtmlPackerCache";
/// 既定のスキーマバージョン
pub const DEFAULT_DB_VERSION: u32 = 1;
/// 既定のストア名
pub const DEFAULT_STORE_NAME: &str = "wasm_cache";
/// 準備完了表示から読み込み画面を隠すまでの既定の待ち時間（ミリ秒）
pub const DEFAULT_HIDE_DELAY_MS: u64 = 500;

/// ブートストラップ設定。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// 永続キャッシュのルートディレクトリ
    pub cache_dir: PathBuf,
    /// `false` の場合はキャッシュを開かず、毎回埋め込みテキストからデコードする
    pub cache_enabled: bool,
    /// データベース名
    pub db_name: String,
    /// スキーマバージョン。上げると既存のキャッシュは破棄される。
    pub db_version: u32,
    /// ストア名
    pub store_name: String,
    /// デコーダーモジュールの要素ID
    pub decoder_element_id: String,
    /// アプリケーションモジュールの要素ID
    pub app_element_id: String,
    /// 成功表示から読み込み画面を隠すまでの待ち時間（ミリ秒）
    pub hide_delay_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".htmlpacker-cache"),
            cache_enabled: true,
            db_name: DEFAULT_DB_NAME.to_string(),
            db_version: DEFAULT_DB_VERSION,
            store_name: DEFAULT_STORE_NAME.to_string(),
            decoder_element_id: DECODER_ELEMENT_ID.to_string(),
            app_element_id: APP_ELEMENT_ID.to_string(),
            hide_delay_ms: DEFAULT_HIDE_DELAY_MS,
        }
    }
}

impl BootstrapConfig {
    /// 環境変数から構築する。未設定・解釈できない値は既定値のまま。
    ///
    /// - `HTMLPACKER_CACHE_DIR`
    /// - `HTMLPACKER_CACHE` (`false` / `0` で無効化)
    /// - `HTMLPACKER_DB_NAME`
    /// - `HTMLPACKER_DB_VERSION`
    /// - `HTMLPACKER_STORE_NAME`
    /// - `HTMLPACKER_HIDE_DELAY_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("HTMLPACKER_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("HTMLPACKER_CACHE") {
            config.cache_enabled = !matches!(flag.trim(), "false" | "0" | "off");
        }
        if let Some(name) = lookup("HTMLPACKER_DB_NAME") {
            config.db_name = name;
        }
        if let Some(version) = lookup("HTMLPACKER_DB_VERSION") {
            match version.trim().parse() {
                Ok(v) => config.db_version = v,
                Err(_) => tracing::warn!(
                    value = %version,
                    "HTMLPACKER_DB_VERSIONが不正です。既定値 {} を使用します",
                    DEFAULT_DB_VERSION
                ),
            }
        }
        if let Some(name) = lookup("HTMLPACKER_STORE_NAME") {
            config.store_name = name;
        }
        if let Some(delay) = lookup("HTMLPACKER_HIDE_DELAY_MS") {
            if let Ok(ms) = delay.trim().parse() {
                config.hide_delay_ms = ms;
            }
        }
        config
    }

    pub fn hide_delay(&self) -> Duration {
        Duration::from_millis(self.hide_delay_ms)
    }
}
