//! # 2段階モジュールローダー
//!
//! デコーダーモジュールを先に初期化し、その展開関数でアプリケーションの
//! ペイロードを戻してからアプリケーションを初期化する。
//!
//! ## 各フェーズの流れ
//! 1. 記述子の `hash` 属性を読む。なければキャッシュを一切使わずデコードする
//! 2. `接頭辞 + hash` でキャッシュを引く
//!    - ヒット: そのまま使う（保存前に検査済みなのでデコード・ヘッダ検査は省略）
//!    - ミス: Base64デコード →（アプリのみ）展開 → ヘッダ検査 → ベストエフォートで保存
//! 3. バイト列をバインディング初期化関数に渡す
//!
//! アプリケーションの展開はデコーダーの初期化完了後にしか呼べないため、
//! フェーズ2はフェーズ1の初期化が成功するまで始まらない。
//! どちらかのフェーズが失敗した時点で打ち切り、再試行はしない。

#[cfg(test)]
mod tests;

use htmlpacker_cache::AssetCache;
use htmlpacker_codec::{decode_base64, magic_prefix, validate_wasm_header};
use htmlpacker_types::{CacheKey, EmbeddedModule, ModuleKind, Severity};

use crate::error::{BootstrapError, ModuleError};
use crate::status::{phase_messages, StatusReporter};

/// デコーダーモジュールのバインディング。
#[async_trait::async_trait]
pub trait DecoderBindings: Send + Sync {
    /// デコーダーモジュールのバイト列を受け取り、呼び出し可能な状態にする。
    async fn init(&self, module_bytes: &[u8]) -> Result<(), ModuleError>;

    /// 圧縮されたペイロードを展開する。`init` 完了後にのみ呼ばれる。
    async fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>, ModuleError>;
}

/// アプリケーションモジュールのバインディング。
#[async_trait::async_trait]
pub trait AppBindings: Send + Sync {
    /// アプリケーションモジュールのバイト列を受け取り、起動する。
    async fn init(&self, module_bytes: &[u8]) -> Result<(), ModuleError>;
}

/// 2つのフェーズで読み込む記述子の組。
#[derive(Debug, Clone, Copy)]
pub struct ModuleDescriptors<'a> {
    pub decoder: &'a EmbeddedModule,
    pub app: &'a EmbeddedModule,
}

/// 2段階モジュールローダー。
///
/// 依存先は全て注入する。`cache` が `None` の場合はキャッシュを使わない。
pub struct ModuleLoader<'a> {
    cache: Option<&'a dyn AssetCache>,
    decoder: &'a dyn DecoderBindings,
    app: &'a dyn AppBindings,
    status: &'a dyn StatusReporter,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(
        cache: Option<&'a dyn AssetCache>,
        decoder: &'a dyn DecoderBindings,
        app: &'a dyn AppBindings,
        status: &'a dyn StatusReporter,
    ) -> Self {
        Self {
            cache,
            decoder,
            app,
            status,
        }
    }

    /// デコーダー → アプリケーションの順に読み込む。
    pub async fn load(&self, modules: ModuleDescriptors<'_>) -> Result<(), BootstrapError> {
        self.load_decoder(modules.decoder).await?;
        self.load_app(modules.app).await
    }

    /// フェーズ1: デコーダーモジュール。
    pub async fn load_decoder(&self, descriptor: &EmbeddedModule) -> Result<(), BootstrapError> {
        let kind = ModuleKind::Decoder;
        let messages = phase_messages(kind);
        tracing::info!("デコーダーモジュールを読み込みます");
        self.status.report(messages.loading, Severity::Normal);

        let bytes = self.resolve(kind, descriptor).await?;

        self.status.report(messages.initializing, Severity::Normal);
        self.decoder
            .init(&bytes)
            .await
            .map_err(|source| BootstrapError::ModuleInit { module: kind, source })?;
        self.status.report(messages.ready, Severity::Normal);
        Ok(())
    }

    /// フェーズ2: アプリケーションモジュール。`load_decoder` の成功後に呼ぶ。
    pub async fn load_app(&self, descriptor: &EmbeddedModule) -> Result<(), BootstrapError> {
        let kind = ModuleKind::App;
        let messages = phase_messages(kind);
        tracing::info!("アプリケーションモジュールを読み込みます");
        self.status.report(messages.loading, Severity::Normal);

        let bytes = self.resolve(kind, descriptor).await?;

        self.status.report(messages.initializing, Severity::Normal);
        self.app
            .init(&bytes)
            .await
            .map_err(|source| BootstrapError::ModuleInit { module: kind, source })?;
        self.status.report(messages.ready, Severity::Normal);
        Ok(())
    }

    /// キャッシュのヒット・ミスを判定し、初期化に渡すバイト列を得る。
    async fn resolve(
        &self,
        kind: ModuleKind,
        descriptor: &EmbeddedModule,
    ) -> Result<Vec<u8>, BootstrapError> {
        let messages = phase_messages(kind);

        let Some(hash) = descriptor.cache_hash() else {
            tracing::info!(module = %kind, "hash属性がないためキャッシュを使いません");
            self.status.report(messages.no_cache, Severity::Normal);
            return self.materialize(kind, descriptor).await;
        };
        let Some(cache) = self.cache else {
            self.status.report(messages.no_cache, Severity::Normal);
            return self.materialize(kind, descriptor).await;
        };

        let key = CacheKey::new(kind, hash);
        self.status.report(messages.checking_cache, Severity::Normal);
        if let Some(bytes) = lookup(cache, &key).await {
            tracing::info!(module = %kind, key = %key, "キャッシュから読み込みました");
            self.status.report(messages.cache_hit, Severity::Normal);
            return Ok(bytes);
        }

        tracing::info!(module = %kind, key = %key, "キャッシュにないためデコードします");
        self.status.report(messages.decoding, Severity::Normal);
        let bytes = self.materialize(kind, descriptor).await?;

        self.status.report(messages.caching, Severity::Normal);
        store(cache, &key, &bytes).await;
        Ok(bytes)
    }

    /// 埋め込みテキストから検査済みのWASMバイト列を作る。
    async fn materialize(
        &self,
        kind: ModuleKind,
        descriptor: &EmbeddedModule,
    ) -> Result<Vec<u8>, BootstrapError> {
        let decoded =
            decode_base64(&descriptor.text).map_err(|e| BootstrapError::from_codec(kind, e))?;

        let bytes = match kind {
            ModuleKind::Decoder => decoded,
            ModuleKind::App => {
                if let Some(message) = phase_messages(kind).decompressing {
                    self.status.report(message, Severity::Normal);
                }
                self.decoder
                    .decompress(&decoded)
                    .await
                    .map_err(BootstrapError::Decompress)?
            }
        };

        tracing::debug!(module = %kind, magic = %magic_prefix(&bytes), "WASMヘッダ");
        validate_wasm_header(&bytes).map_err(|e| BootstrapError::from_codec(kind, e))?;
        Ok(bytes)
    }
}

/// キャッシュを引く。読み込み失敗はミスとして扱う。
async fn lookup(cache: &dyn AssetCache, key: &CacheKey) -> Option<Vec<u8>> {
    match cache.get(key.as_str()).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(key = %key, "キャッシュの読み込みに失敗（ミスとして続行）: {e}");
            None
        }
    }
}

/// ベストエフォートで保存する。失敗は警告に留め、読み込みは続行する。
async fn store(cache: &dyn AssetCache, key: &CacheKey, bytes: &[u8]) {
    match cache.put(key.as_str(), bytes).await {
        Ok(()) => tracing::info!(key = %key, size = bytes.len(), "キャッシュに保存しました"),
        Err(e) => tracing::warn!(key = %key, "キャッシュへの保存に失敗: {e}"),
    }
}
