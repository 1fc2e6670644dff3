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

//! Control-connection job orchestration.
//!
//! One WebSocket carries at most one job. The first non-empty text frame
//! triggers a fetch on the blocking pool; every progress line comes back as a
//! text frame, followed by at most one terminal frame, then the server closes
//! the connection. Text frames that arrive while the job runs are ignored.
//!
//! Only the connection task writes to the socket. The fetch worker talks to it
//! through an unbounded channel (progress lines) and a oneshot (the artifact
//! path), so lines are relayed in the order the fetcher produced them.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use axum::extract::ws::{Message, WebSocket};
use fetchgate_fetcher::{FetchRequest, Fetcher, ProgressSink, Severity};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::downloads::DownloadsRoot;

/// Prefix of the terminal frame announcing a finished artifact.
pub const SUCCESS_SENTINEL: &str = "@@@ ";

/// Prefix of the terminal frame announcing a failed job.
pub const FAILURE_SENTINEL: &str = "!!! ";

/// Debug lines carrying this prefix are internal chatter and never relayed.
pub const SUPPRESSED_DEBUG_PREFIX: &str = "[debug] ";

/// Per-job progress sink handed to the fetcher.
///
/// Forwards relayable lines to the connection task and resolves the result
/// slot on the first [`ProgressSink::finished`] call; later calls are ignored.
#[derive(Debug)]
pub struct JobSink {
    lines:  mpsc::UnboundedSender<String>,
    result: Mutex<Option<oneshot::Sender<PathBuf>>>,
}

impl JobSink {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>, oneshot::Receiver<PathBuf>) {
        let (lines, lines_rx) = mpsc::unbounded_channel();
        let (result, result_rx) = oneshot::channel();
        let sink = Self {
            lines,
            result: Mutex::new(Some(result)),
        };
        (sink, lines_rx, result_rx)
    }
}

impl ProgressSink for JobSink {
    fn emit(&self, severity: Severity, line: &str) {
        if severity == Severity::Debug && line.starts_with(SUPPRESSED_DEBUG_PREFIX) {
            return;
        }
        // The connection may already be gone; the fetch keeps running anyway.
        let _ = self.lines.send(line.to_string());
    }

    fn finished(&self, path: &Path) {
        let Ok(mut slot) = self.result.lock() else {
            return;
        };
        if let Some(result) = slot.take() {
            let _ = result.send(path.to_path_buf());
        }
    }
}

/// How a job ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The fetcher produced an artifact at this path.
    Completed(PathBuf),
    /// The fetcher returned without producing anything.
    NoArtifact,
    /// The fetcher failed (or panicked).
    Failed(String),
}

/// Runs jobs for control connections. Shared by every connection.
pub struct JobOrchestrator {
    fetcher:          Arc<dyn Fetcher>,
    downloads:        DownloadsRoot,
    format:           String,
    surface_failures: bool,
}

impl std::fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("downloads", &self.downloads)
            .field("format", &self.format)
            .field("surface_failures", &self.surface_failures)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl JobOrchestrator {
    #[builder]
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        downloads: DownloadsRoot,
        #[builder(into)] format: String,
        #[builder(default = true)] surface_failures: bool,
    ) -> Self {
        Self {
            fetcher,
            downloads,
            format,
            surface_failures,
        }
    }
}

impl JobOrchestrator {
    /// Drives one control connection until it closes.
    pub async fn handle_connection(&self, mut socket: WebSocket) {
        let Some(source) = next_trigger(&mut socket).await else {
            debug!("control connection closed before a trigger arrived");
            return;
        };

        let job_id = Uuid::new_v4();
        let span = info_span!("job", id = %job_id);
        async {
            info!(source = %source, "job started");
            let (outcome, connected) = self.run_job(&mut socket, source).await;
            match &outcome {
                JobOutcome::Completed(path) => info!(artifact = %path.display(), "job finished"),
                JobOutcome::NoArtifact => info!("job finished without an artifact"),
                JobOutcome::Failed(reason) => warn!(reason = %reason, "job failed"),
            }
            if !connected {
                return;
            }
            if let Some(frame) = self.terminal_frame(&outcome).await
                && let Err(e) = socket.send(Message::Text(frame.into())).await
            {
                debug!(error = %e, "failed to send terminal frame");
                return;
            }
            let _ = socket.send(Message::Close(None)).await;
        }
        .instrument(span)
        .await;
    }

    /// Runs the fetch for `source`, relaying progress onto `socket`.
    ///
    /// Returns the outcome and whether the client is still connected.
    async fn run_job(&self, socket: &mut WebSocket, source: String) -> (JobOutcome, bool) {
        let (sink, mut lines, result) = JobSink::channel();
        let request = FetchRequest {
            source,
            format: self.format.clone(),
            output_dir: self.downloads.dir().to_path_buf(),
        };
        let fetcher = Arc::clone(&self.fetcher);
        // The sink moves into the worker; the line channel closes when it returns.
        let worker = tokio::task::spawn_blocking(move || fetcher.fetch(&request, &sink));

        let mut connected = true;
        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else { break };
                    if connected && socket.send(Message::Text(line.into())).await.is_err() {
                        debug!("client went away, dropping further progress");
                        connected = false;
                    }
                }
                inbound = socket.recv(), if connected => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        debug!(ignored = %text.as_str(), "ignoring trigger while a job is in flight");
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => {
                        debug!("client closed the control connection mid-job");
                        connected = false;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }

        let outcome = match worker.await {
            Ok(Ok(())) => result.await.map_or(JobOutcome::NoArtifact, JobOutcome::Completed),
            Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
            Err(e) => JobOutcome::Failed(format!("fetch worker crashed: {e}")),
        };
        (outcome, connected)
    }

    /// The frame closing out a job, if any.
    pub async fn terminal_frame(&self, outcome: &JobOutcome) -> Option<String> {
        let failure = match outcome {
            JobOutcome::Completed(path) => match self.downloads.url_path(path).await {
                Some(url) => return Some(format!("{SUCCESS_SENTINEL}{url}")),
                None => format!("artifact {} is outside the downloads root", path.display()),
            },
            JobOutcome::NoArtifact => return None,
            JobOutcome::Failed(reason) => reason.clone(),
        };
        self.surface_failures
            .then(|| format!("{FAILURE_SENTINEL}{failure}"))
    }
}

/// Waits for the first non-blank text frame. `None` once the client leaves.
async fn next_trigger(socket: &mut WebSocket) -> Option<String> {
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => {
                let trigger = text.as_str().trim();
                if !trigger.is_empty() {
                    return Some(trigger.to_string());
                }
            }
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "control connection errored");
                return None;
            }
        }
    }
    None
}
