//! # 埋め込み文書
//!
//! パック済みHTMLに含まれる `<pre id=… hash=…>` 要素の読み取りと、
//! パッカー側でのページ生成（maudテンプレート）を扱う。
//!
//! ```html
//! <pre id="bin-wasm-decoder" hash="…" style="display: none;">
//! AGFzbQEAAAA…
//! </pre>
//! ```

use std::sync::OnceLock;

use maud::{html, Markup, PreEscaped, DOCTYPE};
use regex::Regex;
use serde::Deserialize;

use htmlpacker_codec::encode_base64;
use htmlpacker_types::{EmbeddedModule, HASH_ATTRIBUTE};

use crate::error::BootstrapError;

fn pre_element() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<pre\b([^>]*)>(.*?)</pre\s*>").expect("pre要素の正規表現")
    })
}

fn attribute() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#,
        )
        .expect("属性の正規表現")
    })
}

/// HTML文書から取り出した埋め込みモジュールの集合。
#[derive(Debug, Clone, Default)]
pub struct EmbeddedDocument {
    modules: Vec<EmbeddedModule>,
}

impl EmbeddedDocument {
    /// HTMLテキストから `id` 属性を持つ `<pre>` 要素を全て取り出す。
    /// 同じIDが複数ある場合は先頭の要素だけが `get` で見える。
    pub fn parse(html: &str) -> Self {
        let modules = pre_element()
            .captures_iter(html)
            .filter_map(|caps| {
                let attrs = caps.get(1).map_or("", |m| m.as_str());
                let body = caps.get(2).map_or("", |m| m.as_str());
                let id = find_attribute(attrs, "id")?;
                let hash = find_attribute(attrs, HASH_ATTRIBUTE);
                Some(EmbeddedModule::new(id, hash, body.trim()))
            })
            .collect();
        Self { modules }
    }

    pub fn from_modules(modules: Vec<EmbeddedModule>) -> Self {
        Self { modules }
    }

    pub fn get(&self, id: &str) -> Option<&EmbeddedModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// 要素を取得する。存在しなければ `MissingDescriptor`。
    pub fn require(&self, id: &str) -> Result<&EmbeddedModule, BootstrapError> {
        self.get(id)
            .ok_or_else(|| BootstrapError::MissingDescriptor(id.to_string()))
    }

    pub fn modules(&self) -> &[EmbeddedModule] {
        &self.modules
    }
}

fn find_attribute(attrs: &str, name: &str) -> Option<String> {
    attribute().captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?.as_str();
        if !key.eq_ignore_ascii_case(name) {
            return None;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map_or("", |m| m.as_str());
        Some(unescape(value))
    })
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// `<meta name="viewport">` の内容
const VIEWPORT: &str = "width=device-width, initial-scale=1.0, maximum-scale=1.0, user-scalable=1";

/// `<head>` に書き出すメタ情報。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PageMeta {
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
}

impl Default for PageMeta {
    fn default() -> Self {
        Self {
            title: "htmlpacker".to_string(),
            author: None,
            description: None,
            keywords: None,
        }
    }
}

/// data URIとして埋め込むファビコン。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favicon {
    /// MIMEタイプ（`image/svg+xml` など）
    pub mime: String,
    /// Base64テキスト
    pub data: String,
}

impl Favicon {
    pub fn new(mime: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime: mime.into(),
            data: encode_base64(bytes),
        }
    }

    pub fn href(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// 1枚のページを構成する素材。
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub meta: PageMeta,
    /// `<style>` にまとめて入れるCSS
    pub css: String,
    pub favicon: Option<Favicon>,
    /// `<pre>` として埋め込むモジュール（記載順）
    pub modules: Vec<EmbeddedModule>,
    /// `<script>` として本文に置くスクリプト（記載順）
    pub scripts: Vec<String>,
    /// 本文末尾にそのまま置くHTML断片
    pub html_texts: Vec<String>,
}

fn head(content: &PageContent) -> Markup {
    let meta = &content.meta;
    html! {
        head {
            meta charset="utf-8";
            meta name="viewport" content=(VIEWPORT);
            @if let Some(author) = &meta.author {
                meta name="author" content=(author);
            }
            @if let Some(description) = &meta.description {
                meta name="description" content=(description);
            }
            @if let Some(keywords) = &meta.keywords {
                meta name="keywords" content=(keywords);
            }
            title { (meta.title) }
            @if let Some(icon) = &content.favicon {
                link rel="icon" type=(icon.mime) href=(icon.href());
            }
            @if !content.css.is_empty() {
                style { "\n" (PreEscaped(&content.css)) "\n" }
            }
        }
    }
}

fn binary(modules: &[EmbeddedModule]) -> Markup {
    html! {
        @for module in modules {
            "\n"
            pre id=(module.id) hash=[module.cache_hash()] style="display: none;" {
                "\n" (module.text) "\n"
            }
        }
    }
}

fn scripts(scripts: &[String]) -> Markup {
    html! {
        @for script in scripts {
            "\n"
            script { "\n" (PreEscaped(script)) "\n" }
        }
    }
}

fn place_html_texts(texts: &[String]) -> Markup {
    html! {
        @for text in texts {
            "\n" (PreEscaped(text))
        }
    }
}

/// 埋め込みモジュールを含むページを生成する。
///
/// 本文はモジュール、スクリプト、HTML断片の順。スクリプトとHTML断片はエスケープしない。
pub fn render_page(content: &PageContent) -> String {
    html! {
        (DOCTYPE)
        html {
            (head(content))
            body {
                (binary(&content.modules))
                (scripts(&content.scripts))
                (place_html_texts(&content.html_texts))
                "\n"
            }
        }
    }
    .into_string()
}
