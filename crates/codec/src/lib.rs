//! # htmlpacker バイナリコーデック
//!
//! 埋め込みペイロードの変換と検査を担う。
//!
//! | 用途 | 方式 |
//! |------|------|
//! | 埋め込みテキスト | Base64（標準アルファベット、パディング任意） |
//! | ヘッダ検査 | WASMマジックナンバー `00 61 73 6D` |
//! | コンテンツ指紋 | SHA-256（小文字16進） |
//! | ペイロード圧縮 | Brotli（品質11、ウィンドウ22） |

use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};
use brotli::enc::BrotliEncoderParams;
use sha2::{Digest, Sha256};

/// WASMバイナリのマジックナンバー（`\0asm`）
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Brotli圧縮品質（0-11）
pub const BROTLI_QUALITY: i32 = 11;

/// Brotliスライディングウィンドウ（log2）
pub const BROTLI_LGWIN: i32 = 22;

/// デコード用エンジン。ブラウザの forgiving-base64 と同様に、
/// パディングの有無も末尾の余りビットも問わない。
const FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// コーデックのエラー型
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Base64として解釈できない入力
    #[error("Base64デコードに失敗しました: {0}")]
    Decode(#[from] base64::DecodeError),
    /// 先頭4バイトがWASMマジックナンバーと一致しない
    #[error("不正なWASMバイナリです（ヘッダ不一致: {found}）")]
    InvalidHeader {
        /// 観測した先頭バイト列（ログ表記）
        found: String,
    },
    /// 圧縮ストリームへの書き込み失敗
    #[error("ペイロード圧縮に失敗しました: {0}")]
    Compress(#[source] std::io::Error),
    /// Brotliストリームとして展開できない
    #[error("ペイロード展開に失敗しました: {0}")]
    Decompress(#[source] std::io::Error),
}

/// 埋め込みテキストをバイト列に戻す。
///
/// 改行やインデントを含む `<pre>` 要素の中身をそのまま渡せるよう、
/// ASCII空白（スペース、タブ、改行、復帰、改ページ）を除去してからデコードする。
/// それ以外の文字（U+00A0 など）は不正な入力として扱う。
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    let compact: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    Ok(FORGIVING.decode(&compact)?)
}

/// バイト列を埋め込み用のBase64テキストにする（パディング付き）。
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// 先頭4バイトがWASMマジックナンバーであることを確認する。
///
/// 形式全体の検証ではない。インスタンス化時の不透明なエラーより先に、
/// 明確なメッセージで失敗させるための簡易検査。
pub fn validate_wasm_header(bytes: &[u8]) -> Result<(), CodecError> {
    if bytes.len() >= WASM_MAGIC.len() && bytes[..WASM_MAGIC.len()] == WASM_MAGIC {
        Ok(())
    } else {
        Err(CodecError::InvalidHeader {
            found: magic_prefix(bytes),
        })
    }
}

/// 先頭最大4バイトを `0x00 0x61 0x73 0x6d` 形式で表記する。
pub fn magic_prefix(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "(empty)".to_string();
    }
    bytes
        .iter()
        .take(WASM_MAGIC.len())
        .map(|b| format!("0x{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// パッカーが `hash` 属性に書き込むコンテンツ指紋（SHA-256の小文字16進）。
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// モジュールをBrotliで圧縮する。
/// アプリケーションモジュールの展開はデコーダーモジュールの `decompress` が行う。
pub fn compress_payload(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let params = BrotliEncoderParams {
        quality: BROTLI_QUALITY,
        lgwin: BROTLI_LGWIN,
        ..Default::default()
    };
    let mut out = Vec::new();
    brotli::BrotliCompress(&mut &bytes[..], &mut out, &params).map_err(CodecError::Compress)?;
    Ok(out)
}

/// Brotliストリームを展開する。`inspect` がアプリケーション本体の先頭を確認するのに使う。
pub fn decompress_payload(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut &bytes[..], &mut out).map_err(CodecError::Decompress)?;
    Ok(out)
}
