//! `boot` サブコマンド
//!
//! パック済みHTMLをブラウザの代わりにwasmtime上で起動する。
//! キャッシュはローカルディレクトリに保存されるので、2回目以降はデコードを省略できる。

use std::path::PathBuf;

use anyhow::Context;

use htmlpacker_cache::FileStore;
use htmlpacker_core::{Bootstrap, BootstrapConfig, EmbeddedDocument, LoadingScreen};
use htmlpacker_wasm_host::{WasmLimits, WasmRuntime, WasmtimeApp, WasmtimeDecoder};

#[derive(clap::Args, Debug, Default)]
pub struct BootArgs {
    /// パック済みHTML
    pub html: PathBuf,
    /// 設定ファイル（JSON）。指定時は環境変数より優先する
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// キャッシュディレクトリ
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
    /// キャッシュを使わない
    #[arg(long)]
    pub no_cache: bool,
    /// キャッシュのスキーマバージョン
    #[arg(long)]
    pub db_version: Option<u32>,
    /// アプリケーションの開始関数名
    #[arg(long)]
    pub start_export: Option<String>,
    /// 成功表示から終了までの待ち時間（ミリ秒）
    #[arg(long)]
    pub hide_delay_ms: Option<u64>,
}

/// 設定ファイル（なければ環境変数）を読み、引数で上書きする。
pub fn resolve_config(args: &BootArgs) -> anyhow::Result<BootstrapConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("{} を読み込めません", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("{} の形式が不正です", path.display()))?
        }
        None => BootstrapConfig::from_env(),
    };

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if args.no_cache {
        config.cache_enabled = false;
    }
    if let Some(version) = args.db_version {
        config.db_version = version;
    }
    if let Some(ms) = args.hide_delay_ms {
        config.hide_delay_ms = ms;
    }
    Ok(config)
}

pub async fn run(args: BootArgs) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    let html = std::fs::read_to_string(&args.html)
        .with_context(|| format!("{} を読み込めません", args.html.display()))?;
    let document = EmbeddedDocument::parse(&html);
    tracing::info!(
        html = %args.html.display(),
        modules = document.modules().len(),
        cache_dir = %config.cache_dir.display(),
        "ブートストラップを開始します"
    );

    let runtime = WasmRuntime::new(WasmLimits::default())?;
    let decoder = WasmtimeDecoder::new(runtime.clone());
    let app = match &args.start_export {
        Some(name) => WasmtimeApp::new(runtime).with_start_export(name.as_str()),
        None => WasmtimeApp::new(runtime),
    };
    let store = FileStore::new(&config.cache_dir, &config.db_name);
    let screen = LoadingScreen::new();

    Bootstrap::new(&config, Some(&store), &decoder, &app)
        .run_app(&document, &screen)
        .await?;
    Ok(())
}
