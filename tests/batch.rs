//! Integration tests for the public batch API.
//!
//! Two kinds of inference doubles are used:
//! * a local axum server speaking the Ollama `/api/generate` and `/api/ps`
//!   protocol on `127.0.0.1:0`, for everything that touches HTTP;
//! * in-process [`VisionBackend`] fakes, for retry, concurrency and
//!   preprocessing assertions.
//!
//! Fixture images are generated into temporary directories; no test needs
//! a model, a GPU or a pdfium library.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_ocr::prompts::{JSON_PROMPT, TEXT_PROMPT};
use edgequake_ocr::{
    check_model, process_batch, process_batch_sync, process_bytes, process_item, process_stream,
    BatchProgressCallback, InferenceError, ItemError, OcrConfig, OutputFormat, VisionBackend,
};
use futures::StreamExt;
use image::{ColorType, DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn sample_image(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        Rgb([(x * 8) as u8, (y * 8) as u8, ((x + y) * 4) as u8])
    }))
}

fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    sample_image(32, 24)
        .save_with_format(&path, ImageFormat::Png)
        .unwrap();
    path
}

fn png_bytes() -> Vec<u8> {
    let mut buf = Vec::new();
    sample_image(16, 16)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

// ── Mock inference server ────────────────────────────────────────────────────

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    reply: String,
    running: Vec<String>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockState {
    fn ok(reply: &str) -> Self {
        Self {
            status: StatusCode::OK,
            reply: reply.to_string(),
            running: vec![],
            requests: Arc::default(),
        }
    }

    fn failing(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::ok("")
        }
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn generate(State(state): State<MockState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let model = body["model"].clone();
    state.requests.lock().unwrap().push(body);
    if state.status.is_success() {
        (
            StatusCode::OK,
            Json(json!({ "model": model, "response": state.reply, "done": true })),
        )
    } else {
        (state.status, Json(json!({ "error": "model runner crashed" })))
    }
}

async fn running_models(State(state): State<MockState>) -> Json<Value> {
    let models: Vec<Value> = state.running.iter().map(|n| json!({ "name": n })).collect();
    Json(json!({ "models": models }))
}

/// Start the mock server and return its base URL.
async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route("/api/generate", post(generate))
        .route("/api/ps", get(running_models))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A loopback URL with nothing listening on it.
async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── In-process backends ──────────────────────────────────────────────────────

/// Records what it was sent and answers with a fixed text.
#[derive(Default)]
struct Recorder {
    prompts: Mutex<Vec<String>>,
    colors: Mutex<Vec<ColorType>>,
}

#[async_trait]
impl VisionBackend for Recorder {
    async fn generate(&self, prompt: &str, image_b64: String) -> Result<String, InferenceError> {
        let bytes = STANDARD
            .decode(image_b64)
            .map_err(|e| InferenceError::status(400, e.to_string()))?;
        let img = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| InferenceError::status(400, e.to_string()))?;
        self.colors.lock().unwrap().push(img.color());
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("recognised".into())
    }
}

/// Fails the first `failures` calls with a 503.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl VisionBackend for Flaky {
    async fn generate(&self, _prompt: &str, _image: String) -> Result<String, InferenceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(InferenceError::status(503, "server busy"))
        } else {
            Ok("finally".into())
        }
    }
}

/// Sleeps per call and tracks the highest number of overlapping calls.
#[derive(Default)]
struct Slow {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl VisionBackend for Slow {
    async fn generate(&self, _prompt: &str, _image: String) -> Result<String, InferenceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("slow".into())
    }
}

/// Notes which `eqocr-` temp files appeared while a request was in flight.
struct TempWatcher {
    before: HashSet<PathBuf>,
    seen: Mutex<Vec<PathBuf>>,
}

fn eqocr_temp_files() -> HashSet<PathBuf> {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with("eqocr-"))
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default()
}

impl TempWatcher {
    fn new() -> Self {
        Self {
            before: eqocr_temp_files(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VisionBackend for TempWatcher {
    async fn generate(&self, _prompt: &str, _image: String) -> Result<String, InferenceError> {
        let fresh = eqocr_temp_files()
            .into_iter()
            .filter(|p| !self.before.contains(p));
        self.seen.lock().unwrap().extend(fresh);
        Ok("watched".into())
    }
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    announced: AtomicUsize,
    successful: AtomicUsize,
}

impl BatchProgressCallback for Counting {
    fn on_batch_start(&self, total: usize) {
        self.announced.store(total, Ordering::SeqCst);
    }
    fn on_item_start(&self, _path: &Path, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_item_complete(&self, _path: &Path, _total: usize, _text_len: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_item_error(&self, _path: &Path, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _total: usize, successful: usize) {
        self.successful.store(successful, Ordering::SeqCst);
    }
}

// ── Scenarios against the HTTP mock ──────────────────────────────────────────

#[tokio::test]
async fn single_png_sends_one_text_request() {
    let state = MockState::ok("Hello, world");
    let endpoint = spawn_mock(state.clone()).await;
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "page.png");

    let config = OcrConfig::builder()
        .endpoint(endpoint)
        .format(OutputFormat::Text)
        .build()
        .unwrap();

    let text = process_item(&png, &config).await.unwrap();
    assert_eq!(text, "Hello, world");

    let requests = state.requests();
    assert_eq!(requests.len(), 1);
    let body = &requests[0];
    assert_eq!(body["model"], "llama3.2-vision:11b");
    assert_eq!(body["prompt"], TEXT_PROMPT);
    assert_eq!(body["stream"], false);
    assert_eq!(body["images"].as_array().map(Vec::len), Some(1));

    let b64 = body["images"][0].as_str().unwrap();
    let sent = image::load_from_memory(&STANDARD.decode(b64).unwrap()).unwrap();
    assert_eq!((sent.width(), sent.height()), (32, 24));
}

#[tokio::test]
async fn corrupt_file_fails_alone() {
    let state = MockState::ok("text");
    let endpoint = spawn_mock(state.clone()).await;
    let dir = TempDir::new().unwrap();
    for name in ["a.png", "b.png", "c.png"] {
        write_png(dir.path(), name);
    }
    let corrupt = dir.path().join("corrupt.png");
    std::fs::write(&corrupt, b"not really a png").unwrap();

    let config = OcrConfig::builder()
        .endpoint(endpoint)
        .concurrency(2)
        .build()
        .unwrap();
    let report = process_batch(dir.path(), &config).await.unwrap();

    assert_eq!(report.statistics.total, 4);
    assert_eq!(report.statistics.successful, 3);
    assert_eq!(report.statistics.failed, 1);
    assert!(report.text_for(&corrupt).is_none());
    assert!(matches!(
        report.error_for(&corrupt),
        Some(ItemError::UnreadableImage { .. })
    ));
    // The corrupt file never reached the endpoint.
    assert_eq!(state.requests().len(), 3);
}

#[tokio::test]
async fn server_errors_become_item_errors() {
    let endpoint = spawn_mock(MockState::failing(StatusCode::INTERNAL_SERVER_ERROR)).await;
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "one.png");
    write_png(dir.path(), "two.jpg.png");

    let config = OcrConfig::builder().endpoint(endpoint).build().unwrap();
    let report = process_batch(dir.path(), &config).await.unwrap();

    assert_eq!(report.statistics.total, 2);
    assert_eq!(report.statistics.failed, 2);
    assert!(report.results.is_empty());
    for err in report.errors.values() {
        assert!(
            matches!(
                err,
                ItemError::InferenceRequestError {
                    status: Some(500),
                    ..
                }
            ),
            "got: {err:?}"
        );
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_an_item_error() {
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "x.png");

    let config = OcrConfig::builder()
        .endpoint(dead_endpoint().await)
        .preprocess(false)
        .build()
        .unwrap();
    let err = process_item(&png, &config).await.unwrap_err();
    assert!(
        matches!(err, ItemError::InferenceRequestError { status: None, .. }),
        "got: {err:?}"
    );
    assert!(err.to_string().contains("x.png"));
}

#[tokio::test]
async fn json_reply_is_reindented() {
    let state = MockState::ok(r#"{"标题": "A"}"#);
    let endpoint = spawn_mock(state.clone()).await;
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "form.png");

    let config = OcrConfig::builder()
        .endpoint(endpoint)
        .format(OutputFormat::Json)
        .build()
        .unwrap();
    let text = process_item(&png, &config).await.unwrap();

    assert_eq!(text, "{\n  \"标题\": \"A\"\n}");
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, json!({"标题": "A"}));
    assert_eq!(state.requests()[0]["prompt"], JSON_PROMPT);
}

#[tokio::test]
async fn non_json_reply_is_kept_verbatim() {
    let endpoint = spawn_mock(MockState::ok("hello")).await;
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "form.png");

    let config = OcrConfig::builder()
        .endpoint(endpoint)
        .format(OutputFormat::Json)
        .build()
        .unwrap();
    assert_eq!(process_item(&png, &config).await.unwrap(), "hello");
}

#[tokio::test]
async fn check_model_reads_running_models() {
    let mut state = MockState::ok("");
    state.running = vec!["llava:7b".into(), "llama3.2-vision:latest".into()];
    let endpoint = spawn_mock(state).await;

    let loaded = OcrConfig::builder()
        .endpoint(endpoint.clone())
        .model("llava:7b")
        .build()
        .unwrap();
    assert!(check_model(&loaded).await.unwrap());

    let untagged = OcrConfig::builder()
        .endpoint(endpoint.clone())
        .model("llama3.2-vision")
        .build()
        .unwrap();
    assert!(check_model(&untagged).await.unwrap());

    let missing = OcrConfig::builder()
        .endpoint(endpoint)
        .model("llama3.2-vision:11b")
        .build()
        .unwrap();
    assert!(!check_model(&missing).await.unwrap());
}

#[tokio::test]
async fn check_model_fails_when_server_is_down() {
    let config = OcrConfig::builder()
        .endpoint(dead_endpoint().await)
        .build()
        .unwrap();
    assert!(check_model(&config).await.is_err());
}

// ── Discovery and accounting ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_directory_gives_empty_report() {
    let dir = TempDir::new().unwrap();
    let config = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .build()
        .unwrap();

    let report = process_batch(dir.path(), &config).await.unwrap();
    assert_eq!(report.statistics.total, 0);
    assert_eq!(report.statistics.successful, 0);
    assert_eq!(report.statistics.failed, 0);
    assert!(report.results.is_empty() && report.errors.is_empty());
}

#[tokio::test]
async fn recursion_is_opt_in() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "top.png");
    write_png(dir.path(), "sub/nested.png");
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let flat = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .build()
        .unwrap();
    assert_eq!(process_batch(dir.path(), &flat).await.unwrap().statistics.total, 1);

    let deep = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .recursive(true)
        .build()
        .unwrap();
    let report = process_batch(dir.path(), &deep).await.unwrap();
    assert_eq!(report.statistics.total, 2);
    assert_eq!(report.statistics.successful, 2);
}

#[tokio::test]
async fn explicit_list_reports_every_path_once() {
    let dir = TempDir::new().unwrap();
    let good = write_png(dir.path(), "good.png");
    let missing = dir.path().join("missing.png");
    let odd = dir.path().join("odd.txt");
    std::fs::write(&odd, b"plain text").unwrap();

    let config = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .concurrency(3)
        .build()
        .unwrap();
    let report = process_batch(vec![good.clone(), missing.clone(), odd.clone(), good.clone()], &config)
        .await
        .unwrap();

    assert_eq!(report.statistics.total, 3);
    assert_eq!(
        report.statistics.successful + report.statistics.failed,
        report.statistics.total
    );
    assert_eq!(report.text_for(&good), Some("recognised"));
    assert!(matches!(
        report.error_for(&missing),
        Some(ItemError::FileNotFound { .. })
    ));
    assert!(matches!(
        report.error_for(&odd),
        Some(ItemError::UnreadableImage { .. })
    ));

    let keys: HashSet<&String> = report.results.keys().chain(report.errors.keys()).collect();
    assert_eq!(keys.len(), 3);
}

// ── Pipeline behaviour with in-process backends ─────────────────────────────

#[tokio::test]
async fn preprocessing_sends_grayscale() {
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "color.png");

    let recorder = Arc::new(Recorder::default());
    let config = OcrConfig::builder()
        .backend(recorder.clone())
        .build()
        .unwrap();
    process_item(&png, &config).await.unwrap();

    let raw = OcrConfig::builder()
        .backend(recorder.clone())
        .preprocess(false)
        .build()
        .unwrap();
    process_item(&png, &raw).await.unwrap();

    let colors = recorder.colors.lock().unwrap().clone();
    assert_eq!(colors, vec![ColorType::L8, ColorType::Rgb8]);
}

#[tokio::test]
async fn unknown_format_name_uses_text_prompt() {
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "p.png");
    let recorder = Arc::new(Recorder::default());

    let config = OcrConfig::builder()
        .backend(recorder.clone())
        .format(OutputFormat::from_name("yaml"))
        .build()
        .unwrap();
    process_item(&png, &config).await.unwrap();

    assert_eq!(recorder.prompts.lock().unwrap()[0], TEXT_PROMPT);
}

#[tokio::test]
async fn retries_only_the_inference_call() {
    let dir = TempDir::new().unwrap();
    let png = write_png(dir.path(), "retry.png");
    let flaky = Arc::new(Flaky {
        failures: 2,
        calls: AtomicUsize::new(0),
    });

    let config = OcrConfig::builder()
        .backend(flaky.clone())
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    assert_eq!(process_item(&png, &config).await.unwrap(), "finally");
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn decode_failures_are_not_retried() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.jpg");
    std::fs::write(&bad, b"garbage").unwrap();
    let flaky = Arc::new(Flaky {
        failures: 0,
        calls: AtomicUsize::new(0),
    });

    let config = OcrConfig::builder()
        .backend(flaky.clone())
        .max_retries(5)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    assert!(process_item(&bad, &config).await.is_err());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrency_limit_is_respected() {
    let dir = TempDir::new().unwrap();
    for i in 0..6 {
        write_png(dir.path(), &format!("{i}.png"));
    }
    let slow = Arc::new(Slow::default());

    let config = OcrConfig::builder()
        .backend(slow.clone())
        .concurrency(2)
        .preprocess(false)
        .build()
        .unwrap();
    let report = process_batch(dir.path(), &config).await.unwrap();

    assert_eq!(report.statistics.successful, 6);
    assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn progress_events_fire_once_per_item() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "a.png");
    write_png(dir.path(), "b.png");
    std::fs::write(dir.path().join("c.tiff"), b"truncated").unwrap();

    let counting = Arc::new(Counting::default());
    let config = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .progress_callback(counting.clone())
        .concurrency(2)
        .build()
        .unwrap();
    let report = process_batch(dir.path(), &config).await.unwrap();

    assert_eq!(report.statistics.total, 3);
    assert_eq!(counting.announced.load(Ordering::SeqCst), 3);
    assert_eq!(counting.started.load(Ordering::SeqCst), 3);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 2);
    assert_eq!(counting.failed.load(Ordering::SeqCst), 1);
    assert_eq!(counting.successful.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stream_yields_each_path_once() {
    let dir = TempDir::new().unwrap();
    let expected: HashSet<PathBuf> = (0..4)
        .map(|i| write_png(dir.path(), &format!("s{i}.png")))
        .collect();

    let config = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .concurrency(3)
        .build()
        .unwrap();
    let mut stream = process_stream(dir.path(), &config).unwrap();

    let mut seen = HashSet::new();
    while let Some((path, outcome)) = stream.next().await {
        assert_eq!(outcome.unwrap(), "recognised");
        assert!(seen.insert(path));
    }
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn bytes_input_uses_a_temporary_file() {
    let watcher = Arc::new(TempWatcher::new());
    let config = OcrConfig::builder()
        .backend(watcher.clone())
        .build()
        .unwrap();

    assert_eq!(process_bytes(&png_bytes(), &config).await.unwrap(), "watched");
    let during = watcher.seen.lock().unwrap().clone();
    assert_eq!(during.len(), 1, "expected one temp file while inferring: {during:?}");
    assert!(!during[0].exists(), "temp file left behind: {}", during[0].display());

    let err = process_bytes(b"", &config).await.unwrap_err();
    assert!(matches!(err, ItemError::UnreadableImage { .. }), "got: {err:?}");
    assert!(err.path().file_name().is_some());
    assert!(!err.path().exists(), "temp file left behind: {}", err.path().display());
}

#[cfg(unix)]
#[tokio::test]
async fn non_utf8_names_get_distinct_report_entries() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = TempDir::new().unwrap();
    for raw in [&b"a\xff.png"[..], &b"a\xfe.png"[..]] {
        let path = dir.path().join(OsStr::from_bytes(raw));
        if sample_image(8, 8).save_with_format(&path, ImageFormat::Png).is_err() {
            // Filesystem refuses non-UTF-8 names.
            return;
        }
    }

    let config = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .preprocess(false)
        .build()
        .unwrap();
    let report = process_batch(dir.path(), &config).await.unwrap();

    assert_eq!(report.statistics.total, 2);
    assert_eq!(report.statistics.successful, 2);
    assert_eq!(report.results.len(), 2);
    assert!(report.is_complete());
}

#[test]
fn sync_batch_wrapper_runs_its_own_runtime() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path(), "sync.png");

    let config = OcrConfig::builder()
        .backend(Arc::new(Recorder::default()))
        .build()
        .unwrap();
    let report = process_batch_sync(dir.path(), &config).unwrap();
    assert_eq!(report.statistics.successful, 1);
    assert!(report.into_result().is_ok());
}
