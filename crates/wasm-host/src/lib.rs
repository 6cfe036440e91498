//! # htmlpacker WASM実行環境
//!
//! `DecoderBindings` / `AppBindings` をwasmtimeで実装する。
//!
//! ## 安全性確保
//! - Fuel制限: 1回の呼び出しあたりの命令実行数の上限（無限ループ防止）
//! - Memory制限: 線形メモリの上限（OOM防止）
//! - spawn_blocking: WASM実行は専用スレッドで行い、パニックはエラーに変換する
//!
//! ## デコーダーモジュールのABI
//! - `memory`: 線形メモリ
//! - `alloc(size: u32) -> u32`: 入力バッファの確保
//! - `decompress(ptr: u32, len: u32) -> u32`: 展開。戻り値は
//!   `[長さ: u32 LE][展開後バイト列]` の先頭を指す。0は失敗。
//!
//! ## アプリケーションモジュール
//! 未定義のインポートは呼ばれた時点でトラップする関数として解決する。
//! 開始関数（既定は `__wbindgen_start`）がエクスポートされていれば呼ぶ。

use std::sync::{Arc, Mutex, PoisonError};

use wasmtime::{
    Config, Engine, Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder,
    Trap, TypedFunc,
};

use htmlpacker_core::{AppBindings, DecoderBindings, ModuleError};

/// 既定のFuel制限
pub const DEFAULT_FUEL_LIMIT: u64 = 10_000_000_000;
/// 既定のMemory制限（256 MiB）
pub const DEFAULT_MEMORY_LIMIT: usize = 256 * 1024 * 1024;
/// アプリケーションの既定の開始関数
pub const DEFAULT_START_EXPORT: &str = "__wbindgen_start";

/// WASM実行環境のエラー型
#[derive(Debug, thiserror::Error)]
pub enum WasmError {
    /// WASMモジュールのコンパイルエラー
    #[error("WASMコンパイルエラー: {0}")]
    CompileError(String),
    /// インスタンス化エラー
    #[error("WASMインスタンス化エラー: {0}")]
    InstantiateError(String),
    /// 必要なエクスポートがない、またはシグネチャ不一致
    #[error("エクスポート {name} を取得できません: {reason}")]
    MissingExport { name: String, reason: String },
    /// WASMモジュールの実行エラー
    #[error("WASM実行エラー: {0}")]
    ExecutionError(String),
    /// Fuel制限超過
    #[error("Fuel制限を超過しました")]
    FuelExhausted,
    /// 展開関数が失敗を返した
    #[error("デコーダーが展開に失敗しました")]
    DecompressFailed,
    /// `init` 前の呼び出し
    #[error("デコーダーモジュールが初期化されていません")]
    NotInitialized,
    /// WASMパニック
    #[error("WASMモジュールがパニックしました: {0}")]
    Panic(String),
}

impl From<WasmError> for ModuleError {
    fn from(e: WasmError) -> Self {
        ModuleError::new(e.to_string())
    }
}

/// 呼び出し中のトラップを分類する。
fn classify(e: wasmtime::Error) -> WasmError {
    match e.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => WasmError::FuelExhausted,
        _ => WasmError::ExecutionError(format!("{e:#}")),
    }
}

/// 実行制限。
#[derive(Debug, Clone, Copy)]
pub struct WasmLimits {
    /// Fuel制限（命令実行数の上限）
    pub fuel_limit: u64,
    /// Memory制限（バイト）
    pub memory_limit: usize,
}

impl Default for WasmLimits {
    fn default() -> Self {
        Self {
            fuel_limit: DEFAULT_FUEL_LIMIT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// ストアに持たせるホスト側の状態。
pub struct HostState {
    limits: StoreLimits,
}

/// エンジンと実行制限の組。両バインディングで共有できる。
#[derive(Clone)]
pub struct WasmRuntime {
    engine: Engine,
    limits: WasmLimits,
}

impl WasmRuntime {
    pub fn new(limits: WasmLimits) -> Result<Self, WasmError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine =
            Engine::new(&config).map_err(|e| WasmError::CompileError(format!("{e:#}")))?;
        Ok(Self { engine, limits })
    }

    fn compile(&self, bytes: &[u8]) -> Result<Module, WasmError> {
        Module::new(&self.engine, bytes).map_err(|e| WasmError::CompileError(format!("{e:#}")))
    }

    /// 制限付きのストアを作り、未定義インポートをトラップにしてインスタンス化する。
    fn instantiate(&self, module: &Module) -> Result<(Store<HostState>, Instance), WasmError> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.limits.memory_limit)
            .build();
        let mut store = Store::new(&self.engine, HostState { limits });
        store.limiter(|state| &mut state.limits);
        self.refuel(&mut store)?;

        let mut linker = Linker::new(&self.engine);
        linker
            .define_unknown_imports_as_traps(module)
            .map_err(|e| WasmError::InstantiateError(format!("{e:#}")))?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| WasmError::InstantiateError(format!("{e:#}")))?;
        Ok((store, instance))
    }

    fn refuel(&self, store: &mut Store<HostState>) -> Result<(), WasmError> {
        store
            .set_fuel(self.limits.fuel_limit)
            .map_err(|e| WasmError::ExecutionError(format!("{e:#}")))
    }
}

/// WASM実行を専用スレッドで行う。パニックは `WasmError::Panic` になる。
async fn run_blocking<T, F>(f: F) -> Result<T, WasmError>
where
    F: FnOnce() -> Result<T, WasmError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WasmError::Panic(e.to_string()))?
}

// ---------------------------------------------------------------------------
// デコーダー
// ---------------------------------------------------------------------------

struct DecoderInstance {
    runtime: WasmRuntime,
    store: Store<HostState>,
    memory: Memory,
    alloc: TypedFunc<u32, u32>,
    decompress: TypedFunc<(u32, u32), u32>,
}

impl DecoderInstance {
    fn new(runtime: WasmRuntime, bytes: &[u8]) -> Result<Self, WasmError> {
        let module = runtime.compile(bytes)?;
        let (mut store, instance) = runtime.instantiate(&module)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| WasmError::MissingExport {
                name: "memory".to_string(),
                reason: "メモリがエクスポートされていません".to_string(),
            })?;
        let alloc = instance
            .get_typed_func::<u32, u32>(&mut store, "alloc")
            .map_err(|e| WasmError::MissingExport {
                name: "alloc".to_string(),
                reason: format!("{e:#}"),
            })?;
        let decompress = instance
            .get_typed_func::<(u32, u32), u32>(&mut store, "decompress")
            .map_err(|e| WasmError::MissingExport {
                name: "decompress".to_string(),
                reason: format!("{e:#}"),
            })?;

        Ok(Self {
            runtime,
            store,
            memory,
            alloc,
            decompress,
        })
    }

    fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>, WasmError> {
        self.runtime.refuel(&mut self.store)?;

        let len = u32::try_from(input.len())
            .map_err(|_| WasmError::ExecutionError("入力が4GiBを超えています".to_string()))?;
        let ptr = self.alloc.call(&mut self.store, len).map_err(classify)?;
        if ptr == 0 {
            return Err(WasmError::ExecutionError(
                "allocがnullを返しました".to_string(),
            ));
        }
        self.memory
            .write(&mut self.store, ptr as usize, input)
            .map_err(|e| WasmError::ExecutionError(format!("メモリ書き込み: {e}")))?;

        let out = self
            .decompress
            .call(&mut self.store, (ptr, len))
            .map_err(classify)?;
        if out == 0 {
            return Err(WasmError::DecompressFailed);
        }

        // [長さ: u32 LE][データ]
        let mut header = [0u8; 4];
        self.memory
            .read(&self.store, out as usize, &mut header)
            .map_err(|e| WasmError::ExecutionError(format!("メモリ読み込み: {e}")))?;
        let len = u32::from_le_bytes(header) as usize;
        let start = (out as usize)
            .checked_add(4)
            .ok_or_else(|| WasmError::ExecutionError("結果ポインタが範囲外です".to_string()))?;
        let size = self.memory.data_size(&self.store);
        if start.checked_add(len).map_or(true, |end| end > size) {
            return Err(WasmError::ExecutionError(format!(
                "結果の長さがメモリを超えています (ptr={out}, len={len}, memory={size})"
            )));
        }
        let mut bytes = vec![0u8; len];
        self.memory
            .read(&self.store, start, &mut bytes)
            .map_err(|e| WasmError::ExecutionError(format!("メモリ読み込み: {e}")))?;
        Ok(bytes)
    }
}

/// wasmtimeで動くデコーダーモジュール。
pub struct WasmtimeDecoder {
    runtime: WasmRuntime,
    instance: Arc<Mutex<Option<DecoderInstance>>>,
}

impl WasmtimeDecoder {
    pub fn new(runtime: WasmRuntime) -> Self {
        Self {
            runtime,
            instance: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait::async_trait]
impl DecoderBindings for WasmtimeDecoder {
    async fn init(&self, module_bytes: &[u8]) -> Result<(), ModuleError> {
        let runtime = self.runtime.clone();
        let bytes = module_bytes.to_vec();
        let instance = run_blocking(move || DecoderInstance::new(runtime, &bytes)).await?;

        *self.instance.lock().unwrap_or_else(PoisonError::into_inner) = Some(instance);
        tracing::info!(size = module_bytes.len(), "デコーダーモジュールを初期化しました");
        Ok(())
    }

    async fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>, ModuleError> {
        let slot = Arc::clone(&self.instance);
        let input = compressed.to_vec();
        let output = run_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| WasmError::Panic("前回の展開がパニックしました".to_string()))?;
            let instance = guard.as_mut().ok_or(WasmError::NotInitialized)?;
            instance.decompress(&input)
        })
        .await?;

        tracing::debug!(
            input = compressed.len(),
            output = output.len(),
            "ペイロードを展開しました"
        );
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// アプリケーション
// ---------------------------------------------------------------------------

/// 起動済みのアプリケーションインスタンス。ドロップで解放される。
struct AppInstance {
    _store: Store<HostState>,
    _instance: Instance,
}

/// wasmtimeで動くアプリケーションモジュール。
pub struct WasmtimeApp {
    runtime: WasmRuntime,
    start_export: String,
    running: Mutex<Option<AppInstance>>,
}

impl WasmtimeApp {
    pub fn new(runtime: WasmRuntime) -> Self {
        Self {
            runtime,
            start_export: DEFAULT_START_EXPORT.to_string(),
            running: Mutex::new(None),
        }
    }

    /// 開始関数の名前を変える。
    pub fn with_start_export(mut self, name: impl Into<String>) -> Self {
        self.start_export = name.into();
        self
    }

    /// 初期化済みか。
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn start_app(
    runtime: WasmRuntime,
    bytes: &[u8],
    start_export: &str,
) -> Result<AppInstance, WasmError> {
    let module = runtime.compile(bytes)?;
    let (mut store, instance) = runtime.instantiate(&module)?;

    match instance.get_func(&mut store, start_export) {
        Some(func) => {
            let start = func
                .typed::<(), ()>(&store)
                .map_err(|e| WasmError::MissingExport {
                    name: start_export.to_string(),
                    reason: format!("{e:#}"),
                })?;
            start.call(&mut store, ()).map_err(classify)?;
        }
        None => tracing::debug!(export = start_export, "開始関数がないため呼び出しません"),
    }

    Ok(AppInstance {
        _store: store,
        _instance: instance,
    })
}

#[async_trait::async_trait]
impl AppBindings for WasmtimeApp {
    async fn init(&self, module_bytes: &[u8]) -> Result<(), ModuleError> {
        let runtime = self.runtime.clone();
        let bytes = module_bytes.to_vec();
        let start_export = self.start_export.clone();
        let app = run_blocking(move || start_app(runtime, &bytes, &start_export)).await?;

        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(app);
        tracing::info!(size = module_bytes.len(), "アプリケーションを起動しました");
        Ok(())
    }
}
