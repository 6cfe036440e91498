//! # ローダーテスト用共通ヘルパー
//!
//! loader, bootstrapテストで共有するフェイク群。呼び出し内容と順序を記録する。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use htmlpacker_cache::{AssetCache, CacheError, MemoryCache};
use htmlpacker_codec::encode_base64;
use htmlpacker_types::{EmbeddedModule, Severity, APP_ELEMENT_ID, DECODER_ELEMENT_ID};

use crate::error::ModuleError;
use crate::loader::{AppBindings, DecoderBindings};
use crate::status::StatusReporter;

/// デコーダーモジュールとして渡す最小のWASMバイト列
pub const DECODER_WASM: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
/// フェイクデコーダーが展開結果として返すアプリケーションのWASMバイト列
pub const APP_WASM: [u8; 10] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB];
/// アプリケーションの圧縮済みペイロード（フェイクなので中身は任意）
pub const APP_COMPRESSED: &[u8] = b"compressed-app-payload";

/// 呼び出し順の記録
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

pub fn decoder_descriptor(hash: Option<&str>) -> EmbeddedModule {
    EmbeddedModule::new(
        DECODER_ELEMENT_ID,
        hash.map(str::to_string),
        encode_base64(&DECODER_WASM),
    )
}

pub fn app_descriptor(hash: Option<&str>) -> EmbeddedModule {
    EmbeddedModule::new(
        APP_ELEMENT_ID,
        hash.map(str::to_string),
        encode_base64(APP_COMPRESSED),
    )
}

/// 呼び出しを記録するデコーダー。
pub struct FakeDecoder {
    events: Events,
    initialized: AtomicBool,
    output: Vec<u8>,
    init_error: Option<String>,
    pub init_calls: Mutex<Vec<Vec<u8>>>,
    pub decompress_calls: Mutex<Vec<Vec<u8>>>,
}

impl FakeDecoder {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            initialized: AtomicBool::new(false),
            output: APP_WASM.to_vec(),
            init_error: None,
            init_calls: Mutex::new(Vec::new()),
            decompress_calls: Mutex::new(Vec::new()),
        }
    }

    /// 展開結果を差し替える。
    pub fn with_output(mut self, output: Vec<u8>) -> Self {
        self.output = output;
        self
    }

    /// 初期化を失敗させる。
    pub fn failing_init(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    pub fn decompress_count(&self) -> usize {
        self.decompress_calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl DecoderBindings for FakeDecoder {
    async fn init(&self, module_bytes: &[u8]) -> Result<(), ModuleError> {
        self.init_calls.lock().unwrap().push(module_bytes.to_vec());
        self.events.lock().unwrap().push("decoder.init".to_string());
        if let Some(message) = &self.init_error {
            return Err(ModuleError::new(message.clone()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>, ModuleError> {
        self.decompress_calls.lock().unwrap().push(compressed.to_vec());
        self.events.lock().unwrap().push("decoder.decompress".to_string());
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(ModuleError::new("decoder is not initialized"));
        }
        Ok(self.output.clone())
    }
}

/// 呼び出しを記録するアプリケーション。
pub struct FakeApp {
    events: Events,
    init_error: Option<String>,
    pub init_calls: Mutex<Vec<Vec<u8>>>,
}

impl FakeApp {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            init_error: None,
            init_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_init(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl AppBindings for FakeApp {
    async fn init(&self, module_bytes: &[u8]) -> Result<(), ModuleError> {
        self.init_calls.lock().unwrap().push(module_bytes.to_vec());
        self.events.lock().unwrap().push("app.init".to_string());
        match &self.init_error {
            Some(message) => Err(ModuleError::new(message.clone())),
            None => Ok(()),
        }
    }
}

/// 呼び出し回数とキーを記録するキャッシュ。
#[derive(Default)]
pub struct CountingCache {
    inner: MemoryCache,
    fail_gets: bool,
    fail_puts: bool,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub keys: Mutex<Vec<String>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 書き込みを常に失敗させる（容量超過の再現）。
    pub fn failing_puts() -> Self {
        Self {
            fail_puts: true,
            ..Self::default()
        }
    }

    /// 読み込みを常に失敗させる。
    pub fn failing_gets() -> Self {
        Self {
            fail_gets: true,
            ..Self::default()
        }
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn touched_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AssetCache for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(key.to_string());
        if self.fail_gets {
            return Err(CacheError::Read("read denied".to_string()));
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(key.to_string());
        if self.fail_puts {
            return Err(CacheError::Write("QuotaExceededError".to_string()));
        }
        self.inner.put(key, bytes).await
    }
}

/// 通知されたメッセージを記録する。
#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<(String, Severity)>>,
}

impl RecordingReporter {
    pub fn texts(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, message: &str, severity: Severity) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
    }
}
