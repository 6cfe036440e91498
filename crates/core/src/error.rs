//! # ブートストラップのエラー型
//!
//! 各フェーズは型付きの `Result` を返し、エントリポイントはエラー種別で分岐する。
//! キャッシュの読み書き失敗だけはローダー内で警告に格下げされ、ここには現れない。

use htmlpacker_cache::CacheError;
use htmlpacker_codec::CodecError;
use htmlpacker_types::ModuleKind;

/// バインディング初期化・展開関数が返す不透明なエラー。
/// メッセージは加工せずにそのまま伝播する。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ModuleError(pub String);

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// ブートストラップのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// 埋め込み要素が文書内に存在しない
    #[error("埋め込みモジュールが見つかりません: #{0}")]
    MissingDescriptor(String),
    /// 埋め込みテキストがBase64として不正
    #[error("{module}モジュールのデコードに失敗: {source}")]
    Decode {
        module: ModuleKind,
        #[source]
        source: CodecError,
    },
    /// WASMマジックナンバー不一致（代替の取得元はないため致命的）
    #[error("{module}モジュールのヘッダが不正: {source}")]
    InvalidHeader {
        module: ModuleKind,
        #[source]
        source: CodecError,
    },
    /// キャッシュストアを開けない
    #[error(transparent)]
    CacheOpen(CacheError),
    /// バインディング初期化の失敗
    #[error("{module}モジュールの初期化に失敗: {source}")]
    ModuleInit {
        module: ModuleKind,
        #[source]
        source: ModuleError,
    },
    /// デコーダーモジュールによる展開の失敗
    #[error("アプリケーションの展開に失敗: {0}")]
    Decompress(#[source] ModuleError),
}

impl BootstrapError {
    /// コーデックエラーを種別ごとのバリアントに振り分ける。
    pub(crate) fn from_codec(module: ModuleKind, source: CodecError) -> Self {
        match source {
            CodecError::InvalidHeader { .. } => BootstrapError::InvalidHeader { module, source },
            _ => BootstrapError::Decode { module, source },
        }
    }

    /// 失敗したフェーズ（特定できる場合）。
    pub fn module(&self) -> Option<ModuleKind> {
        match self {
            BootstrapError::Decode { module, .. }
            | BootstrapError::InvalidHeader { module, .. }
            | BootstrapError::ModuleInit { module, .. } => Some(*module),
            BootstrapError::Decompress(_) => Some(ModuleKind::App),
            BootstrapError::MissingDescriptor(_) | BootstrapError::CacheOpen(_) => None,
        }
    }
}
