// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end tests against a live gateway on an ephemeral port.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use fetchgate_fetcher::{FetchError, FetchRequest, Fetcher, ProgressSink, Severity};
use fetchgate_server::{
    GatewayConfig, GatewayState, HttpServerConfig, ServiceHandler, start_gateway_server,
};
use futures::{SinkExt, StreamExt};
use reqwest::{StatusCode, header};
use tokio::{net::TcpStream, sync::mpsc::UnboundedReceiver, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Behaves like a real fetcher: chatter on the sink, a file on disk, then the
/// artifact announcement.
#[derive(Default)]
struct ScriptedFetcher {
    calls: AtomicUsize,
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: &FetchRequest, sink: &dyn ProgressSink) -> fetchgate_fetcher::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.emit(Severity::Debug, "[debug] Invoking downloader");
        sink.emit(Severity::Info, &format!("[generic] {}: Downloading webpage", request.source));
        sink.emit(Severity::Info, "[download]  50.0% of 4.00KiB");
        sink.emit(Severity::Info, "[download] 100.0% of 4.00KiB");

        let artifact = request.output_dir.join("expected-name.ext");
        std::fs::write(&artifact, vec![7_u8; 4096]).map_err(|e| FetchError::Engine {
            message: e.to_string(),
        })?;
        sink.finished(&artifact);
        Ok(())
    }
}

struct FailingFetcher;

impl Fetcher for FailingFetcher {
    fn fetch(&self, _: &FetchRequest, sink: &dyn ProgressSink) -> fetchgate_fetcher::Result<()> {
        sink.emit(Severity::Error, "ERROR: Unsupported URL: nope");
        Err(FetchError::Engine {
            message: "Unsupported URL: nope".to_string(),
        })
    }
}

struct SilentFetcher;

impl Fetcher for SilentFetcher {
    fn fetch(&self, _: &FetchRequest, _: &dyn ProgressSink) -> fetchgate_fetcher::Result<()> { Ok(()) }
}

/// Reports one line, then blocks until the test opens the gate. Signals on
/// `done` once the artifact is on disk.
struct GatedFetcher {
    calls: AtomicUsize,
    gate:  Mutex<mpsc::Receiver<()>>,
    done:  tokio::sync::mpsc::UnboundedSender<PathBuf>,
}

impl GatedFetcher {
    fn new() -> (Arc<Self>, mpsc::Sender<()>, UnboundedReceiver<PathBuf>) {
        let (gate_tx, gate_rx) = mpsc::channel();
        let (done_tx, done_rx) = tokio::sync::mpsc::unbounded_channel();
        let fetcher = Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate:  Mutex::new(gate_rx),
            done:  done_tx,
        });
        (fetcher, gate_tx, done_rx)
    }
}

impl Fetcher for GatedFetcher {
    fn fetch(&self, request: &FetchRequest, sink: &dyn ProgressSink) -> fetchgate_fetcher::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.emit(Severity::Info, "[download] Destination: gated.ext");
        if let Ok(gate) = self.gate.lock() {
            let _ = gate.recv_timeout(FRAME_TIMEOUT);
        }

        let artifact = request.output_dir.join("gated.ext");
        std::fs::write(&artifact, b"gated").map_err(|e| FetchError::Engine {
            message: e.to_string(),
        })?;
        sink.emit(Severity::Info, "[download] 100% of 5.00B");
        sink.finished(&artifact);
        let _ = self.done.send(artifact);
        Ok(())
    }
}

/// Next text frame, skipping control frames. Panics if the server closes
/// first or nothing arrives in time.
async fn next_text(socket: &mut ClientSocket) -> String {
    loop {
        let message = timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("no frame in time")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return text.as_str().to_owned();
        }
    }
}

/// Text frames until the server closes the connection.
async fn remaining_frames(socket: &mut ClientSocket) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(message) = socket.next().await {
        match message {
            Ok(Message::Text(text)) => frames.push(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    frames
}

struct TestGateway {
    handler: ServiceHandler,
    root:    tempfile::TempDir,
}

impl TestGateway {
    async fn start(fetcher: Arc<dyn Fetcher>) -> Self { Self::start_with(fetcher, true).await }

    async fn start_with(fetcher: Arc<dyn Fetcher>, surface_failures: bool) -> Self {
        fetchgate_common_telemetry::init_default_ut_logging();
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("downloads")).unwrap();
        std::fs::write(root.path().join("secret.txt"), b"top secret").unwrap();

        let gateway = GatewayConfig::builder()
            .downloads_dir(root.path().join("downloads"))
            .index_file(root.path().join("index.html"))
            .surface_failures(surface_failures)
            .build();
        let http = HttpServerConfig::builder()
            .bind_address("127.0.0.1:0")
            .build();
        let state = GatewayState::new(&gateway, fetcher, "best");

        let mut handler = start_gateway_server(&http, state).await.unwrap();
        handler.wait_for_start().await.unwrap();
        Self { handler, root }
    }

    fn http_url(&self, path: &str) -> String { format!("http://{}{path}", self.handler.local_addr()) }

    fn ws_url(&self) -> String { format!("ws://{}/", self.handler.local_addr()) }

    fn downloads(&self) -> PathBuf { self.root.path().join("downloads") }

    /// Opens a control connection and sends `triggers` on it.
    async fn trigger(&self, triggers: &[&str]) -> ClientSocket {
        let (mut socket, _) = connect_async(self.ws_url()).await.unwrap();
        for trigger in triggers {
            socket.send(Message::text(*trigger)).await.unwrap();
        }
        socket
    }

    /// Sends `triggers` on a fresh control connection and collects every text
    /// frame until the server closes it.
    async fn run_job(&self, triggers: &[&str]) -> Vec<String> {
        let mut socket = self.trigger(triggers).await;
        remaining_frames(&mut socket).await
    }

    async fn stop(self) {
        self.handler.shutdown();
        self.handler.wait_for_stop().await.unwrap();
    }
}

fn write_fixture(gateway: &TestGateway) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    let bytes: Vec<u8> = (0..1000_u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(gateway.downloads().join("a.bin"), &bytes).unwrap();
    bytes
}

#[tokio::test]
async fn health_check_answers_ok() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;

    let response = reqwest::get(gateway.http_url("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK\n");

    gateway.stop().await;
}

#[tokio::test]
async fn byte_range_returns_exact_window() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;
    let bytes = write_fixture(&gateway);

    let response = reqwest::Client::new()
        .get(gateway.http_url("/downloads/a.bin"))
        .header(header::RANGE, "bytes=100-199")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &bytes[100..200]);

    gateway.stop().await;
}

#[tokio::test]
async fn range_past_the_end_is_not_satisfiable() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;
    write_fixture(&gateway);

    let response = reqwest::Client::new()
        .get(gateway.http_url("/downloads/a.bin"))
        .header(header::RANGE, "bytes=900-1999")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    assert!(response.bytes().await.unwrap().is_empty());

    gateway.stop().await;
}

#[tokio::test]
async fn whole_artifact_without_range() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;
    let bytes = write_fixture(&gateway);

    let response = reqwest::get(gateway.http_url("/downloads/a.bin")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(response.bytes().await.unwrap().as_ref(), bytes.as_slice());

    gateway.stop().await;
}

#[tokio::test]
async fn trigger_streams_progress_then_artifact_path() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let gateway = TestGateway::start(fetcher.clone()).await;

    let frames = gateway.run_job(&["https://example/video"]).await;

    assert_eq!(
        frames,
        [
            "[generic] https://example/video: Downloading webpage",
            "[download]  50.0% of 4.00KiB",
            "[download] 100.0% of 4.00KiB",
            "@@@ /downloads/expected-name.ext",
        ]
    );
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    // The announced path is immediately servable.
    let response = reqwest::get(gateway.http_url("/downloads/expected-name.ext"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().len(), 4096);

    gateway.stop().await;
}

#[tokio::test]
async fn progress_streams_while_the_fetch_is_running() {
    let (fetcher, gate, mut done) = GatedFetcher::new();
    let gateway = TestGateway::start(fetcher.clone()).await;

    let mut socket = gateway.trigger(&["https://example/video"]).await;

    // The fetcher is still parked on the gate when this frame arrives.
    assert_eq!(next_text(&mut socket).await, "[download] Destination: gated.ext");
    assert!(done.try_recv().is_err());

    gate.send(()).unwrap();
    assert_eq!(
        remaining_frames(&mut socket).await,
        ["[download] 100% of 5.00B", "@@@ /downloads/gated.ext"]
    );
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    gateway.stop().await;
}

#[tokio::test]
async fn client_close_mid_job_lets_the_fetch_finish() {
    let (fetcher, gate, mut done) = GatedFetcher::new();
    let gateway = TestGateway::start(fetcher.clone()).await;

    let mut socket = gateway.trigger(&["https://example/video"]).await;
    assert_eq!(next_text(&mut socket).await, "[download] Destination: gated.ext");
    socket.close(None).await.unwrap();
    drop(socket);

    gate.send(()).unwrap();
    let artifact = timeout(FRAME_TIMEOUT, done.recv())
        .await
        .expect("fetch did not finish")
        .unwrap();
    assert_eq!(artifact, gateway.downloads().join("gated.ext"));
    assert_eq!(std::fs::read(&artifact).unwrap(), b"gated");
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    // The gateway keeps serving, including the orphaned artifact.
    let response = reqwest::get(gateway.http_url("/downloads/gated.ext"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    gateway.stop().await;
}

#[tokio::test]
async fn connection_runs_a_single_job() {
    let fetcher = Arc::new(ScriptedFetcher::default());
    let gateway = TestGateway::start(fetcher.clone()).await;

    let frames = gateway
        .run_job(&["", "https://example/video", "https://example/other"])
        .await;

    let terminal: Vec<_> = frames.iter().filter(|f| f.starts_with("@@@ ")).collect();
    assert_eq!(terminal, ["@@@ /downloads/expected-name.ext"]);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    gateway.stop().await;
}

#[tokio::test]
async fn failed_job_sends_failure_frame() {
    let gateway = TestGateway::start(Arc::new(FailingFetcher)).await;

    let frames = gateway.run_job(&["nope"]).await;

    assert_eq!(
        frames,
        [
            "ERROR: Unsupported URL: nope",
            "!!! Fetch failed: Unsupported URL: nope",
        ]
    );

    gateway.stop().await;
}

#[tokio::test]
async fn failed_job_closes_silently_when_failures_are_hidden() {
    let gateway = TestGateway::start_with(Arc::new(FailingFetcher), false).await;

    let frames = gateway.run_job(&["nope"]).await;

    assert_eq!(frames, ["ERROR: Unsupported URL: nope"]);

    gateway.stop().await;
}

#[tokio::test]
async fn job_without_artifact_closes_without_terminal_frame() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;

    let frames = gateway.run_job(&["https://example/video"]).await;

    assert!(frames.is_empty(), "unexpected frames: {frames:?}");

    gateway.stop().await;
}

#[tokio::test]
async fn missing_artifact_is_not_found() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;

    let response = reqwest::get(gateway.http_url("/downloads/missing.bin"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.bytes().await.unwrap().is_empty());

    gateway.stop().await;
}

#[tokio::test]
async fn traversal_out_of_the_downloads_root_is_not_found() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;

    let response = reqwest::get(gateway.http_url("/downloads/..%2Fsecret.txt"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.bytes().await.unwrap().is_empty());

    gateway.stop().await;
}

#[tokio::test]
async fn percent_encoded_names_are_served() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;
    std::fs::write(gateway.downloads().join("My Song.m4a"), b"audio").unwrap();

    let response = reqwest::get(gateway.http_url("/downloads/My%20Song.m4a"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mp4");
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"audio");

    gateway.stop().await;
}

#[tokio::test]
async fn names_with_reserved_url_characters_are_served() {
    let gateway = TestGateway::start(Arc::new(SilentFetcher)).await;
    std::fs::write(gateway.downloads().join("Episode #3 & more.m4a"), b"episode").unwrap();

    let response = reqwest::get(gateway.http_url("/downloads/Episode%20%233%20%26%20more.m4a"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"episode");

    gateway.stop().await;
}
