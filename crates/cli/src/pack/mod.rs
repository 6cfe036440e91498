//! `pack` サブコマンド
//!
//! YAML設定（または引数）からページの素材を集め、1枚のHTMLに書き出す。

pub mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use htmlpacker_codec::{compress_payload, content_hash, encode_base64, validate_wasm_header};
use htmlpacker_core::{render_page, Favicon, PageContent};
use htmlpacker_types::{EmbeddedModule, APP_ELEMENT_ID, DECODER_ELEMENT_ID};

use self::config::{AssetList, CompressionType, PackConfig, WasmModuleConfig};

/// 既定ランタイムのアイコン
const RUNTIME_ICON: &str = include_str!("icon.svg");

#[derive(clap::Args, Debug, Default)]
pub struct PackArgs {
    /// パック設定（YAML）
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// デコーダーモジュール（.wasm）。`runtime.decoder` を上書きする
    #[arg(long)]
    pub decoder: Option<PathBuf>,
    /// アプリケーションモジュール（.wasm、圧縮前）
    #[arg(long, required_unless_present = "config")]
    pub app: Option<PathBuf>,
    /// 出力先HTML
    #[arg(short, long)]
    pub output: PathBuf,
    /// ページタイトル
    #[arg(long)]
    pub title: Option<String>,
    /// 本文に追加するスクリプト（複数指定可）
    #[arg(long = "script")]
    pub scripts: Vec<PathBuf>,
    /// hash属性を付けない（読み込み側はキャッシュを使わなくなる）
    #[arg(long)]
    pub no_hash: bool,
}

/// 設定ファイルと引数から最終的な設定と基準ディレクトリを決める。
///
/// 引数で指定したパスはカレントディレクトリ基準なので、絶対パスにしてから設定へ入れる。
pub fn resolve_config(args: &PackArgs) -> anyhow::Result<(PackConfig, PathBuf)> {
    let cwd = std::env::current_dir()?;
    let (mut config, base) = match &args.config {
        Some(path) => {
            let base = path
                .parent()
                .map_or_else(|| cwd.clone(), |p| cwd.join(p));
            (PackConfig::load(path)?, base)
        }
        None => (PackConfig::default(), cwd.clone()),
    };

    if let Some(decoder) = &args.decoder {
        config.runtime.decoder = cwd.join(decoder);
    }
    if let Some(app) = &args.app {
        config.wasm.retain(|m| m.id != APP_ELEMENT_ID);
        config.wasm.push(WasmModuleConfig {
            id: APP_ELEMENT_ID.to_string(),
            path: cwd.join(app),
            compression: CompressionType::Brotli,
        });
    }
    if let Some(title) = &args.title {
        config.meta.title = title.clone();
    }
    config
        .scripts
        .local
        .extend(args.scripts.iter().map(|p| cwd.join(p)));
    if args.no_hash {
        config.hash = false;
    }
    config.validate()?;
    Ok((config, base))
}

pub fn run(args: PackArgs) -> anyhow::Result<()> {
    let (config, base) = resolve_config(&args)?;
    let content = assemble(&config, &base)?;
    let page = render_page(&content);

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&args.output, &page)
        .with_context(|| format!("{} に書き込めません", args.output.display()))?;

    tracing::info!(
        output = %args.output.display(),
        modules = content.modules.len(),
        scripts = content.scripts.len(),
        page = page.len(),
        "パック済みHTMLを書き出しました"
    );
    Ok(())
}

/// 設定に従って素材を読み込み、ページの内容を組み立てる。
///
/// 既定ランタイムが有効な場合、デコーダーモジュールを先頭に置き、ランタイムスクリプトを
/// 利用者のスクリプトの後ろに足す。ファビコン未指定ならランタイムのアイコンを使う。
pub fn assemble(config: &PackConfig, base: &Path) -> anyhow::Result<PageContent> {
    let mut content = PageContent {
        meta: config.meta.clone(),
        css: read_texts(&config.css, base)?.join("\n"),
        favicon: read_favicon(&config.favicon, base)?,
        scripts: read_texts(&config.scripts, base)?,
        html_texts: read_texts(&config.html, base)?,
        modules: Vec::new(),
    };

    if config.runtime.enabled {
        let decoder = read_file(&base.join(&config.runtime.decoder))?;
        content.modules.push(
            embed_module(DECODER_ELEMENT_ID, &decoder, CompressionType::None, config.hash)
                .context("デコーダーモジュールがWASMではありません")?,
        );
        for path in &config.runtime.scripts {
            content.scripts.push(read_text(&base.join(path))?);
        }
        if content.favicon.is_none() {
            content.favicon = Some(Favicon::new("image/svg+xml", RUNTIME_ICON.as_bytes()));
        }
    }

    for module in &config.wasm {
        let bytes = read_file(&base.join(&module.path))?;
        content.modules.push(
            embed_module(&module.id, &bytes, module.compression, config.hash)
                .with_context(|| format!("{} がWASMではありません", module.path.display()))?,
        );
    }

    if content.modules.iter().all(|m| m.id != DECODER_ELEMENT_ID)
        || content.modules.iter().all(|m| m.id != APP_ELEMENT_ID)
    {
        tracing::warn!("デコーダーまたはアプリケーションのモジュールがありません。ページは起動できません");
    }
    Ok(content)
}

/// ヘッダを検査し、指定の方式で圧縮してから埋め込み要素にする。
///
/// hashは圧縮前のWASMバイト列のSHA-256。
pub fn embed_module(
    id: &str,
    bytes: &[u8],
    compression: CompressionType,
    with_hash: bool,
) -> anyhow::Result<EmbeddedModule> {
    validate_wasm_header(bytes)?;
    let payload = match compression {
        CompressionType::Brotli => compress_payload(bytes)?,
        CompressionType::None => bytes.to_vec(),
    };
    tracing::debug!(
        id,
        raw = bytes.len(),
        embedded = payload.len(),
        ?compression,
        "モジュールを埋め込みます"
    );
    let hash = with_hash.then(|| content_hash(bytes));
    Ok(EmbeddedModule::new(id, hash, encode_base64(&payload)))
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("{} を読み込めません", path.display()))
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("{} を読み込めません", path.display()))
}

fn read_texts(list: &AssetList, base: &Path) -> anyhow::Result<Vec<String>> {
    list.local.iter().map(|p| read_text(&base.join(p))).collect()
}

fn read_favicon(list: &AssetList, base: &Path) -> anyhow::Result<Option<Favicon>> {
    let Some(path) = list.local.first() else {
        return Ok(None);
    };
    if list.local.len() > 1 {
        tracing::warn!(count = list.local.len(), "ファビコンは先頭の1件だけを使います");
    }
    let mime = favicon_mime(path)?;
    Ok(Some(Favicon::new(mime, &read_file(&base.join(path))?)))
}

fn favicon_mime(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("svg") => Ok("image/svg+xml"),
        Some("png") => Ok("image/png"),
        Some("ico") => Ok("image/x-icon"),
        Some("gif") => Ok("image/gif"),
        Some("jpg" | "jpeg") => Ok("image/jpeg"),
        Some("webp") => Ok("image/webp"),
        _ => bail!("{}: ファビコンの形式を判別できません", path.display()),
    }
}
