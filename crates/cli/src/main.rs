//! # htmlpacker CLI
//!
//! ## サブコマンド
//! - `pack`: YAML設定（または引数）に従い、WASMモジュールとページ素材を1枚のHTMLに埋め込む
//! - `inspect`: パック済みHTMLの埋め込みモジュールを一覧する
//! - `boot`: パック済みHTMLをwasmtime上でブートストラップする

mod boot;
mod inspect;
mod pack;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "htmlpacker", version, about = "Single-file WASM application packer")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// HTMLを生成する
    Pack(pack::PackArgs),
    /// 埋め込みモジュールを一覧する
    Inspect {
        /// パック済みHTML
        html: PathBuf,
        /// JSONで出力する
        #[arg(long)]
        json: bool,
    },
    /// ネイティブでブートストラップを実行する
    Boot(boot::BootArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Pack(args) => pack::run(args),
        Command::Inspect { html, json } => inspect::run(&html, json),
        Command::Boot(args) => boot::run(args).await,
    }
}
