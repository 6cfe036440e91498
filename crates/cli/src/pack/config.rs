//! # パック設定
//!
//! ```yaml
//! pack:
//!   runtime:
//!     enabled: true
//!     decoder: decoder.wasm
//!   meta:
//!     title: demo
//!   css:
//!     local: [style.css]
//!   wasm:
//!     - id: bin-wasm-app
//!       path: app.wasm
//!       compression: brotli
//! ```
//!
//! 相対パスは設定ファイルのあるディレクトリを基準に解決する。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use htmlpacker_core::PageMeta;
use htmlpacker_types::{APP_ELEMENT_ID, DECODER_ELEMENT_ID};

/// 既定のデコーダーモジュール（`wasm/decoder` のリリースビルド）
pub const DEFAULT_DECODER_PATH: &str =
    "wasm/decoder/target/wasm32-unknown-unknown/release/htmlpacker_decoder.wasm";

/// YAMLのルート。設定は `pack:` の下に置く。
#[derive(Debug, Deserialize)]
struct ConfigRoot {
    pack: PackConfig,
}

/// パック設定。
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    pub runtime: RuntimeConfig,
    pub meta: PageMeta,
    /// 先頭の1件だけを使う
    pub favicon: AssetList,
    pub css: AssetList,
    pub scripts: AssetList,
    /// 本文末尾に置くHTML断片
    pub html: AssetList,
    pub wasm: Vec<WasmModuleConfig>,
    /// `false` の場合は `hash` 属性を付けない（読み込み側はキャッシュを使わなくなる）
    pub hash: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            meta: PageMeta::default(),
            favicon: AssetList::default(),
            css: AssetList::default(),
            scripts: AssetList::default(),
            html: AssetList::default(),
            wasm: Vec::new(),
            hash: true,
        }
    }
}

/// 既定ランタイム。有効な場合はデコーダーモジュール、ランタイムスクリプト、アイコンを同梱する。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub decoder: PathBuf,
    /// 利用者のスクリプトの後ろに置く
    pub scripts: Vec<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decoder: PathBuf::from(DEFAULT_DECODER_PATH),
            scripts: Vec::new(),
        }
    }
}

/// ローカルファイルとリモートURLの一覧。リモート取得は未対応。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssetList {
    pub local: Vec<PathBuf>,
    pub remote: Vec<String>,
}

/// 埋め込み時の圧縮方式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    Brotli,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WasmModuleConfig {
    /// `<pre>` 要素のID
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub compression: CompressionType,
}

impl PackConfig {
    /// YAMLファイルを読み込み、検査する。
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("{} を読み込めません", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("{} の形式が不正です", path.display()))?;
        tracing::debug!(
            config = %path.display(),
            modules = config.wasm.len(),
            runtime = config.runtime.enabled,
            "パック設定を読み込みました"
        );
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let root: ConfigRoot = serde_yaml::from_str(text)?;
        root.pack.validate()?;
        Ok(root.pack)
    }

    /// 組み立て前の整合性検査。
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, list) in [
            ("favicon", &self.favicon),
            ("css", &self.css),
            ("scripts", &self.scripts),
            ("html", &self.html),
        ] {
            if let Some(url) = list.remote.first() {
                bail!("{name}: リモート取得は未対応です ({url})");
            }
        }

        let mut ids = HashSet::new();
        for module in &self.wasm {
            if !ids.insert(module.id.as_str()) {
                bail!("wasm: ID {} が重複しています", module.id);
            }
            if module.id == APP_ELEMENT_ID && module.compression == CompressionType::None {
                bail!("wasm: {APP_ELEMENT_ID} はデコーダーが展開するためbrotli圧縮が必要です");
            }
            if module.id == DECODER_ELEMENT_ID {
                if self.runtime.enabled {
                    bail!("wasm: {DECODER_ELEMENT_ID} は既定ランタイムが同梱します（runtime.enabled: false で差し替え）");
                }
                if module.compression != CompressionType::None {
                    bail!("wasm: {DECODER_ELEMENT_ID} は圧縮できません");
                }
            }
        }
        Ok(())
    }
}
