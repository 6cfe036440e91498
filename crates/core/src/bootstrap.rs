//! # ブートストラップのエントリポイント
//!
//! 1. 読み込み画面を表示する
//! 2. キャッシュストアを開く（無効化されていれば開かない）
//! 3. 2段階ローダーでデコーダー → アプリケーションを読み込む
//! 4. 成功なら準備完了を表示して一定時間後に画面を隠す。
//!    失敗なら致命的エラーを表示し、画面は出したままにする。

use std::sync::Arc;

use htmlpacker_cache::{AssetCache, CacheStore};
use htmlpacker_types::Severity;

use crate::config::BootstrapConfig;
use crate::document::EmbeddedDocument;
use crate::error::BootstrapError;
use crate::loader::{AppBindings, DecoderBindings, ModuleDescriptors, ModuleLoader};
use crate::status::{
    LoadingIndicator, StatusReporter, MSG_CACHE_DISABLED, MSG_CACHE_READY, MSG_FATAL,
    MSG_INITIALIZING, MSG_OPENING_CACHE, MSG_READY,
};

/// ブートストラップ処理。
pub struct Bootstrap<'a> {
    config: &'a BootstrapConfig,
    store: Option<&'a dyn CacheStore>,
    decoder: &'a dyn DecoderBindings,
    app: &'a dyn AppBindings,
}

impl<'a> Bootstrap<'a> {
    /// `store` が `None` の場合は設定に関係なくキャッシュなしで読み込む。
    pub fn new(
        config: &'a BootstrapConfig,
        store: Option<&'a dyn CacheStore>,
        decoder: &'a dyn DecoderBindings,
        app: &'a dyn AppBindings,
    ) -> Self {
        Self {
            config,
            store,
            decoder,
            app,
        }
    }

    /// キャッシュを開いて両モジュールを読み込む。
    ///
    /// 記述子は最初に両方とも解決する。どちらかが欠けていれば
    /// キャッシュを開く前に `MissingDescriptor` で失敗する。
    pub async fn setup_wasm(
        &self,
        document: &EmbeddedDocument,
        status: &dyn StatusReporter,
    ) -> Result<(), BootstrapError> {
        status.report(MSG_INITIALIZING, Severity::Normal);

        let modules = ModuleDescriptors {
            decoder: document.require(&self.config.decoder_element_id)?,
            app: document.require(&self.config.app_element_id)?,
        };

        let cache = self.open_cache(status).await?;
        ModuleLoader::new(cache.as_deref(), self.decoder, self.app, status)
            .load(modules)
            .await
    }

    async fn open_cache(
        &self,
        status: &dyn StatusReporter,
    ) -> Result<Option<Arc<dyn AssetCache>>, BootstrapError> {
        let store = match self.store {
            Some(store) if self.config.cache_enabled => store,
            _ => {
                tracing::info!("キャッシュは無効です");
                status.report(MSG_CACHE_DISABLED, Severity::Normal);
                return Ok(None);
            }
        };

        status.report(MSG_OPENING_CACHE, Severity::Normal);
        let cache = store
            .open(&self.config.store_name, self.config.db_version)
            .await
            .map_err(BootstrapError::CacheOpen)?;
        tracing::info!(
            store = %self.config.store_name,
            version = self.config.db_version,
            "キャッシュデータベースを開きました"
        );
        status.report(MSG_CACHE_READY, Severity::Normal);
        Ok(Some(cache))
    }

    /// 読み込み画面を制御しながら `setup_wasm` を実行する。
    ///
    /// エラーは画面に表示した上で呼び出し元にも返す。
    pub async fn run_app<I: LoadingIndicator>(
        &self,
        document: &EmbeddedDocument,
        screen: &I,
    ) -> Result<(), BootstrapError> {
        screen.show();

        if let Err(e) = self.setup_wasm(document, screen).await {
            tracing::error!(module = ?e.module(), "アプリケーションの読み込みに失敗: {e}");
            screen.report(MSG_FATAL, Severity::Error);
            return Err(e);
        }

        screen.report(MSG_READY, Severity::Success);
        tokio::time::sleep(self.config.hide_delay()).await;
        screen.hide();
        Ok(())
    }
}
