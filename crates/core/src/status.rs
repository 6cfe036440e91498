//! # ステータス通知
//!
//! ローダーは各段階の遷移で人間向けのメッセージを通知する。
//! 通知は観測専用で戻り値はなく、失敗もしない（ローダーの制御フローに影響しない）。
//!
//! 読み込み画面はメッセージを既知の段階リストと照合し、
//! 見えた段階の最大位置から進捗率を出す。後の段階のメッセージが先に来ても
//! 進捗は巻き戻らない。

use std::sync::{Mutex, MutexGuard, PoisonError};

use htmlpacker_types::{LoadingStage, ModuleKind, Severity};

// ---------------------------------------------------------------------------
// メッセージ
// ---------------------------------------------------------------------------

/// ブートストラップ開始
pub const MSG_INITIALIZING: &str = "Initializing...";
/// キャッシュを開く
pub const MSG_OPENING_CACHE: &str = "Opening cache database...";
/// キャッシュ準備完了
pub const MSG_CACHE_READY: &str = "Cache database ready";
/// キャッシュ無効
pub const MSG_CACHE_DISABLED: &str = "Cache disabled";
/// 全段階完了
pub const MSG_READY: &str = "Application ready!";
/// 致命的エラー時の表示
pub const MSG_FATAL: &str = "Error loading application. Please refresh the page.";

/// 1フェーズ分のメッセージ。
#[derive(Debug)]
pub struct PhaseMessages {
    pub loading: &'static str,
    pub no_cache: &'static str,
    pub checking_cache: &'static str,
    pub cache_hit: &'static str,
    pub decoding: &'static str,
    /// 展開を伴うフェーズのみ
    pub decompressing: Option<&'static str>,
    pub caching: &'static str,
    pub initializing: &'static str,
    pub ready: &'static str,
}

const DECODER_MESSAGES: PhaseMessages = PhaseMessages {
    loading: "Loading decoder module...",
    no_cache: "Decoding decoder module (no cache)...",
    checking_cache: "Checking cache for decoder...",
    cache_hit: "Decoder loaded from cache",
    decoding: "Decoding decoder module...",
    decompressing: None,
    caching: "Caching decoder module...",
    initializing: "Initializing decoder module...",
    ready: "Decoder ready",
};

const APP_MESSAGES: PhaseMessages = PhaseMessages {
    loading: "Loading main application...",
    no_cache: "Decompressing application (no cache)...",
    checking_cache: "Checking cache for application...",
    cache_hit: "Application loaded from cache",
    decoding: "Decoding application data...",
    decompressing: Some("Decompressing application..."),
    caching: "Caching application...",
    initializing: "Initializing application...",
    ready: "Application initialized",
};

/// モジュール種別ごとのメッセージ。
pub fn phase_messages(kind: ModuleKind) -> &'static PhaseMessages {
    match kind {
        ModuleKind::Decoder => &DECODER_MESSAGES,
        ModuleKind::App => &APP_MESSAGES,
    }
}

/// 進捗バーの段階リスト（表示順）と対応する読み込み段階。
pub const PROGRESS_STEPS: [(&str, LoadingStage); 19] = [
    ("Initializing...", LoadingStage::OpenCache),
    ("Opening cache database...", LoadingStage::OpenCache),
    ("Cache database ready", LoadingStage::OpenCache),
    ("Loading decoder module...", LoadingStage::CheckCache),
    ("Checking cache for decoder...", LoadingStage::CheckCache),
    ("Decoder loaded from cache", LoadingStage::CheckCache),
    ("Decoding decoder module...", LoadingStage::Decode),
    ("Caching decoder module...", LoadingStage::CacheWrite),
    ("Initializing decoder module...", LoadingStage::Initialize),
    ("Decoder ready", LoadingStage::Initialize),
    ("Loading main application...", LoadingStage::CheckCache),
    ("Checking cache for application...", LoadingStage::CheckCache),
    ("Application loaded from cache", LoadingStage::CheckCache),
    ("Decoding application data...", LoadingStage::Decode),
    ("Decompressing application...", LoadingStage::Decode),
    ("Caching application...", LoadingStage::CacheWrite),
    ("Initializing application...", LoadingStage::Initialize),
    ("Application initialized", LoadingStage::Initialize),
    ("Application ready!", LoadingStage::Ready),
];

/// メッセージに対応する段階リストの位置。
///
/// 段階テキストの `...` より前の部分を、大文字小文字を無視して部分一致で探す。
/// 複数一致した場合は最も長いもの（"Initializing..." より
/// "Initializing application..."）を採り、同じ長さなら先頭側を採る。
pub fn match_step(text: &str) -> Option<usize> {
    let text = text.to_lowercase();
    PROGRESS_STEPS
        .iter()
        .enumerate()
        .filter_map(|(index, (step, _))| {
            let step = step.to_lowercase();
            let key = step.split("...").next().unwrap_or_default();
            text.contains(key).then_some((index, key.len()))
        })
        .max_by_key(|&(index, len)| (len, std::cmp::Reverse(index)))
        .map(|(index, _)| index)
}

// ---------------------------------------------------------------------------
// 通知先
// ---------------------------------------------------------------------------

/// ステータスメッセージの受け手。
pub trait StatusReporter: Send + Sync {
    /// メッセージを通知する。失敗しない。
    fn report(&self, message: &str, severity: Severity);
}

/// ログにだけ流す通知先（読み込み画面がない場合）。
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StatusReporter for LogReporter {
    fn report(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!("Status: {message}"),
            _ => tracing::info!("Status: {message}"),
        }
    }
}

/// 表示・非表示を切り替えられる読み込み表示。
pub trait LoadingIndicator: StatusReporter {
    fn show(&self);
    fn hide(&self);
}

/// 見えた段階の最大位置を保持する進捗計算。
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    current: Option<usize>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// メッセージを取り込む。一致した段階の位置を返す。
    pub fn observe(&mut self, text: &str) -> Option<usize> {
        let index = match_step(text)?;
        self.current = Some(self.current.map_or(index, |cur| cur.max(index)));
        Some(index)
    }

    /// 進捗率（0〜100）。
    pub fn percent(&self) -> u8 {
        match self.current {
            Some(index) => ((index + 1) * 100 / PROGRESS_STEPS.len()) as u8,
            None => 0,
        }
    }

    /// 現在の読み込み段階。
    pub fn stage(&self) -> Option<LoadingStage> {
        self.current.map(|index| PROGRESS_STEPS[index].1)
    }
}

/// 読み込み画面の表示状態。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSnapshot {
    pub text: String,
    pub severity: Severity,
    pub visible: bool,
    pub percent: u8,
    pub stage: Option<LoadingStage>,
}

#[derive(Debug)]
struct ScreenState {
    text: String,
    severity: Severity,
    visible: bool,
    progress: ProgressTracker,
}

/// 読み込み画面。
///
/// 描画は行わず、表示状態を保持してログに流す。実際の描画はホスト側で
/// `snapshot` を読んで行う。
#[derive(Debug)]
pub struct LoadingScreen {
    state: Mutex<ScreenState>,
}

impl LoadingScreen {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScreenState {
                text: "Loading WASM application...".to_string(),
                severity: Severity::Normal,
                visible: false,
                progress: ProgressTracker::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        let state = self.lock();
        ScreenSnapshot {
            text: state.text.clone(),
            severity: state.severity,
            visible: state.visible,
            percent: state.progress.percent(),
            stage: state.progress.stage(),
        }
    }

    // 通知は失敗してはならないので、ポイズンされていても中身を使う
    fn lock(&self) -> MutexGuard<'_, ScreenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LoadingScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for LoadingScreen {
    fn report(&self, message: &str, severity: Severity) {
        let mut state = self.lock();
        state.text = message.to_string();
        state.severity = severity;
        state.progress.observe(message);
        let percent = state.progress.percent();
        match severity {
            Severity::Error => tracing::error!(percent, "{message}"),
            _ => tracing::info!(percent, "{message}"),
        }
    }
}

impl LoadingIndicator for LoadingScreen {
    fn show(&self) {
        self.lock().visible = true;
    }

    fn hide(&self) {
        self.lock().visible = false;
    }
}
