use htmlpacker_codec::encode_base64;
use htmlpacker_types::{EmbeddedModule, ModuleKind, APP_ELEMENT_ID, DECODER_ELEMENT_ID};

use crate::error::BootstrapError;
use crate::test_helpers::*;

use super::{ModuleDescriptors, ModuleLoader};

const DECODER_HASH: &str = "d3c0de";
const APP_HASH: &str = "a99";

async fn run(
    cache: Option<&CountingCache>,
    decoder: &FakeDecoder,
    app: &FakeApp,
    status: &RecordingReporter,
    decoder_module: &EmbeddedModule,
    app_module: &EmbeddedModule,
) -> Result<(), BootstrapError> {
    let cache = cache.map(|c| c as &dyn htmlpacker_cache::AssetCache);
    ModuleLoader::new(cache, decoder, app, status)
        .load(ModuleDescriptors {
            decoder: decoder_module,
            app: app_module,
        })
        .await
}

#[tokio::test]
async fn test_cold_load_populates_cache() {
    let ev = events();
    let cache = CountingCache::new();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());
    let status = RecordingReporter::default();

    run(
        Some(&cache),
        &decoder,
        &app,
        &status,
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    assert_eq!(cache.put_count(), 2);
    assert_eq!(
        cache.touched_keys(),
        vec![
            "wasm-decoder-d3c0de",
            "wasm-decoder-d3c0de",
            "wasm-app-a99",
            "wasm-app-a99",
        ]
    );
    assert_eq!(decoder.init_calls.lock().unwrap()[0], DECODER_WASM);
    assert_eq!(app.init_calls.lock().unwrap()[0], APP_WASM);
}

#[tokio::test]
async fn test_warm_load_skips_decode_and_decompress() {
    let cache = CountingCache::new();

    // 1回目で両方のキーが埋まる
    let ev = events();
    run(
        Some(&cache),
        &FakeDecoder::new(ev.clone()),
        &FakeApp::new(ev.clone()),
        &RecordingReporter::default(),
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    // 2回目は埋め込みテキストが壊れていてもキャッシュから読める
    let ev = events();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());
    let status = RecordingReporter::default();
    run(
        Some(&cache),
        &decoder,
        &app,
        &status,
        &EmbeddedModule::new(DECODER_ELEMENT_ID, Some(DECODER_HASH.into()), "@@garbage@@"),
        &EmbeddedModule::new(APP_ELEMENT_ID, Some(APP_HASH.into()), "@@garbage@@"),
    )
    .await
    .unwrap();

    assert_eq!(decoder.decompress_count(), 0);
    assert_eq!(cache.put_count(), 2);
    assert_eq!(app.init_calls.lock().unwrap()[0], APP_WASM);
    assert_eq!(recorded(&ev), vec!["decoder.init", "app.init"]);

    let texts = status.texts();
    assert!(texts.contains(&"Decoder loaded from cache".to_string()));
    assert!(texts.contains(&"Application loaded from cache".to_string()));
    assert!(!texts.iter().any(|t| t.starts_with("Decoding")));
}

#[tokio::test]
async fn test_missing_hash_bypasses_cache_for_that_module() {
    let ev = events();
    let cache = CountingCache::new();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());
    let status = RecordingReporter::default();

    run(
        Some(&cache),
        &decoder,
        &app,
        &status,
        &decoder_descriptor(None),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    assert!(cache
        .touched_keys()
        .iter()
        .all(|k| !k.starts_with("wasm-decoder-")));
    assert_eq!(cache.get_count(), 1);
    assert_eq!(cache.put_count(), 1);
    assert_eq!(decoder.init_calls.lock().unwrap()[0], DECODER_WASM);
    assert!(status
        .texts()
        .contains(&"Decoding decoder module (no cache)...".to_string()));
}

#[tokio::test]
async fn test_put_failure_is_not_fatal() {
    let ev = events();
    let cache = CountingCache::failing_puts();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());

    run(
        Some(&cache),
        &decoder,
        &app,
        &RecordingReporter::default(),
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    assert_eq!(cache.put_count(), 2);
    assert_eq!(decoder.init_calls.lock().unwrap()[0], DECODER_WASM);
    assert_eq!(app.init_calls.lock().unwrap()[0], APP_WASM);
}

#[tokio::test]
async fn test_get_failure_is_treated_as_miss() {
    let ev = events();
    let cache = CountingCache::failing_gets();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());

    run(
        Some(&cache),
        &decoder,
        &app,
        &RecordingReporter::default(),
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    assert_eq!(decoder.decompress_count(), 1);
    assert_eq!(cache.put_count(), 2);
    assert_eq!(app.init_count(), 1);
}

#[tokio::test]
async fn test_decompress_runs_after_decoder_init_with_decoded_payload() {
    let ev = events();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());

    run(
        None,
        &decoder,
        &app,
        &RecordingReporter::default(),
        &decoder_descriptor(None),
        &app_descriptor(None),
    )
    .await
    .unwrap();

    assert_eq!(
        recorded(&ev),
        vec!["decoder.init", "decoder.decompress", "app.init"]
    );
    assert_eq!(decoder.decompress_calls.lock().unwrap()[0], APP_COMPRESSED);
}

#[tokio::test]
async fn test_invalid_decoder_header_is_fatal() {
    let ev = events();
    let cache = CountingCache::new();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());
    let bad = EmbeddedModule::new(
        DECODER_ELEMENT_ID,
        Some(DECODER_HASH.into()),
        encode_base64(b"not wasm"),
    );

    let err = run(
        Some(&cache),
        &decoder,
        &app,
        &RecordingReporter::default(),
        &bad,
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::InvalidHeader {
            module: ModuleKind::Decoder,
            ..
        }
    ));
    assert_eq!(cache.put_count(), 0);
    assert!(recorded(&ev).is_empty());
}

#[tokio::test]
async fn test_invalid_decompressed_header_is_fatal() {
    let ev = events();
    let cache = CountingCache::new();
    let decoder = FakeDecoder::new(ev.clone()).with_output(vec![0x00, 0x61, 0x73, 0x00]);
    let app = FakeApp::new(ev.clone());

    let err = run(
        Some(&cache),
        &decoder,
        &app,
        &RecordingReporter::default(),
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::InvalidHeader {
            module: ModuleKind::App,
            ..
        }
    ));
    assert_eq!(err.module(), Some(ModuleKind::App));
    // デコーダー分だけ保存されている
    assert_eq!(cache.put_count(), 1);
    assert_eq!(app.init_count(), 0);
}

#[tokio::test]
async fn test_decoder_init_failure_propagates_verbatim() {
    let ev = events();
    let decoder = FakeDecoder::new(ev.clone()).failing_init("boom");
    let app = FakeApp::new(ev.clone());

    let err = run(
        None,
        &decoder,
        &app,
        &RecordingReporter::default(),
        &decoder_descriptor(None),
        &app_descriptor(None),
    )
    .await
    .unwrap_err();

    match err {
        BootstrapError::ModuleInit { module, source } => {
            assert_eq!(module, ModuleKind::Decoder);
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("予期しないエラー: {other:?}"),
    }
    assert_eq!(decoder.decompress_count(), 0);
    assert_eq!(app.init_count(), 0);
}

#[tokio::test]
async fn test_app_init_failure_after_decoder_ready() {
    let ev = events();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone()).failing_init("panic in start");
    let status = RecordingReporter::default();

    let err = run(
        None,
        &decoder,
        &app,
        &status,
        &decoder_descriptor(None),
        &app_descriptor(None),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::ModuleInit {
            module: ModuleKind::App,
            ..
        }
    ));
    let texts = status.texts();
    assert!(texts.contains(&"Decoder ready".to_string()));
    assert!(!texts.contains(&"Application initialized".to_string()));
}

#[tokio::test]
async fn test_malformed_base64_is_decode_error() {
    let ev = events();
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());
    let bad = EmbeddedModule::new(DECODER_ELEMENT_ID, None, "@@@");

    let err = run(
        None,
        &decoder,
        &app,
        &RecordingReporter::default(),
        &bad,
        &app_descriptor(None),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        BootstrapError::Decode {
            module: ModuleKind::Decoder,
            ..
        }
    ));
}

#[tokio::test]
async fn test_decompress_failure() {
    let ev = events();
    // 未初期化のデコーダーは展開を拒否する
    let decoder = FakeDecoder::new(ev.clone());
    let app = FakeApp::new(ev.clone());
    let status = RecordingReporter::default();
    let loader = ModuleLoader::new(None, &decoder, &app, &status);

    let err = loader.load_app(&app_descriptor(None)).await.unwrap_err();

    assert!(matches!(err, BootstrapError::Decompress(_)));
    assert_eq!(err.module(), Some(ModuleKind::App));
    assert_eq!(app.init_count(), 0);
}

#[tokio::test]
async fn test_status_message_order_on_cold_load() {
    let ev = events();
    let cache = CountingCache::new();
    let status = RecordingReporter::default();

    run(
        Some(&cache),
        &FakeDecoder::new(ev.clone()),
        &FakeApp::new(ev.clone()),
        &status,
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    assert_eq!(
        status.texts(),
        vec![
            "Loading decoder module...",
            "Checking cache for decoder...",
            "Decoding decoder module...",
            "Caching decoder module...",
            "Initializing decoder module...",
            "Decoder ready",
            "Loading main application...",
            "Checking cache for application...",
            "Decoding application data...",
            "Decompressing application...",
            "Caching application...",
            "Initializing application...",
            "Application initialized",
        ]
    );
}

#[tokio::test]
async fn test_no_cache_path_messages() {
    let ev = events();
    let status = RecordingReporter::default();

    run(
        None,
        &FakeDecoder::new(ev.clone()),
        &FakeApp::new(ev.clone()),
        &status,
        &decoder_descriptor(Some(DECODER_HASH)),
        &app_descriptor(Some(APP_HASH)),
    )
    .await
    .unwrap();

    let texts = status.texts();
    assert!(texts.contains(&"Decoding decoder module (no cache)...".to_string()));
    assert!(texts.contains(&"Decompressing application (no cache)...".to_string()));
    assert!(!texts.iter().any(|t| t.starts_with("Checking cache")));
    assert!(!texts.iter().any(|t| t.starts_with("Caching")));
}
