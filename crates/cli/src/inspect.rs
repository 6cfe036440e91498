//! `inspect` サブコマンド

use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use htmlpacker_codec::{decode_base64, decompress_payload, magic_prefix, validate_wasm_header};
use htmlpacker_core::EmbeddedDocument;

/// 埋め込みモジュール1件分の情報。
#[derive(Debug, Serialize)]
pub struct ModuleReport {
    pub id: String,
    pub hash: Option<String>,
    /// Base64テキストの長さ
    pub text_len: usize,
    /// デコード後のバイト数（デコードできない場合は `None`）
    pub decoded_len: Option<usize>,
    /// デコード後の先頭4バイト
    pub magic: Option<String>,
    /// Brotli圧縮されたペイロードの場合、展開後のバイト数
    pub inflated_len: Option<usize>,
    /// 展開後の先頭4バイト
    pub inflated_magic: Option<String>,
}

pub fn report(document: &EmbeddedDocument) -> Vec<ModuleReport> {
    document
        .modules()
        .iter()
        .map(|module| {
            let decoded = decode_base64(&module.text).ok();
            let inflated = decoded
                .as_deref()
                .filter(|bytes| validate_wasm_header(bytes).is_err())
                .and_then(|bytes| decompress_payload(bytes).ok());
            ModuleReport {
                id: module.id.clone(),
                hash: module.hash.clone(),
                text_len: module.text.len(),
                decoded_len: decoded.as_ref().map(Vec::len),
                magic: decoded.as_deref().map(magic_prefix),
                inflated_len: inflated.as_ref().map(Vec::len),
                inflated_magic: inflated.as_deref().map(magic_prefix),
            }
        })
        .collect()
}

pub fn run(html: &Path, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(html)
        .with_context(|| format!("{} を読み込めません", html.display()))?;
    let reports = report(&EmbeddedDocument::parse(&text));

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for r in &reports {
        println!(
            "#{}\thash={}\ttext={}B\tdecoded={}\tmagic={}\tinflated={}",
            r.id,
            r.hash.as_deref().unwrap_or("-"),
            r.text_len,
            r.decoded_len.map_or("invalid".to_string(), |n| format!("{n}B")),
            r.magic.as_deref().unwrap_or("-"),
            match (r.inflated_len, r.inflated_magic.as_deref()) {
                (Some(n), Some(magic)) => format!("{n}B ({magic})"),
                _ => "-".to_string(),
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_flags_undecodable_text() {
        let doc = EmbeddedDocument::parse(
            r#"<pre id="bin-wasm-decoder" hash="abc">AGFzbQEAAAA=</pre>
               <pre id="bin-wasm-app">@@@</pre>"#,
        );
        let reports = report(&doc);
        assert_eq!(reports.len(), 2);

        assert_eq!(reports[0].hash.as_deref(), Some("abc"));
        assert_eq!(reports[0].decoded_len, Some(8));
        assert_eq!(reports[0].magic.as_deref(), Some("0x00 0x61 0x73 0x6d"));

        assert_eq!(reports[1].decoded_len, None);
        assert_eq!(reports[1].magic, None);
    }

    #[test]
    fn test_report_inflates_compressed_payload() {
        let module = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        let compressed = htmlpacker_codec::compress_payload(&module).unwrap();
        let html = format!(
            r#"<pre id="bin-wasm-app">{}</pre><pre id="bin-wasm-decoder">AGFzbQEAAAA=</pre>"#,
            htmlpacker_codec::encode_base64(&compressed)
        );
        let reports = report(&EmbeddedDocument::parse(&html));

        assert_eq!(reports[0].inflated_len, Some(8));
        assert_eq!(reports[0].inflated_magic.as_deref(), Some("0x00 0x61 0x73 0x6d"));
        // 生のWASMは展開を試みない
        assert_eq!(reports[1].inflated_len, None);
    }
}
