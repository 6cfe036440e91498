//! # htmlpacker Core
//!
//! 単一HTMLに埋め込まれた2つのWASMモジュールを起動するブートストラップ。
//!
//! ## 処理フロー
//! 1. 文書から `<pre id="bin-wasm-decoder">` と `<pre id="bin-wasm-app">` を取り出す
//! 2. バージョン付きのローカルキャッシュを開く
//! 3. デコーダーモジュールをキャッシュまたはBase64テキストから読み込み、初期化する
//! 4. デコーダーの展開関数でアプリケーションのペイロードを戻し、初期化する
//! 5. 読み込み画面に進捗と結果を通知する
//!
//! WASMの実行そのものは `DecoderBindings` / `AppBindings` の実装側が担う。

pub mod bootstrap;
pub mod config;
pub mod document;
pub mod error;
pub mod loader;
pub mod status;

#[cfg(test)]
mod test_helpers;

pub use bootstrap::Bootstrap;
pub use config::BootstrapConfig;
pub use document::{render_page, EmbeddedDocument, Favicon, PageContent, PageMeta};
pub use error::{BootstrapError, ModuleError};
pub use loader::{AppBindings, DecoderBindings, ModuleDescriptors, ModuleLoader};
pub use status::{LoadingIndicator, LoadingScreen, LogReporter, StatusReporter};
