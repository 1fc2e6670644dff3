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

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use fetchgate_fetcher::Fetcher;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::{downloads::DownloadsRoot, job::JobOrchestrator, mime::MimeTable};

/// What the gateway serves and how jobs behave.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct GatewayConfig {
    /// Directory artifacts are fetched into and served from.
    #[default(PathBuf::from("downloads"))]
    #[builder(into, default = PathBuf::from("downloads"))]
    pub downloads_dir:    PathBuf,
    /// URL path segment artifacts are served under.
    #[default = "downloads"]
    #[builder(into, default = "downloads".to_string())]
    pub artifacts_route:  String,
    /// Client UI served at `/`.
    #[default(PathBuf::from("static/index.html"))]
    #[builder(into, default = PathBuf::from("static/index.html"))]
    pub index_file:       PathBuf,
    /// Send a `!!! <reason>` frame when a job fails instead of closing
    /// silently.
    #[default = true]
    #[builder(default = true)]
    pub surface_failures: bool,
    /// Extra extension to `Content-Type` mappings, checked before inference.
    #[builder(default)]
    pub mime_overrides:   HashMap<String, String>,
}

/// Shared state of the HTTP and WebSocket handlers.
#[derive(Clone, Debug)]
pub struct GatewayState {
    pub(crate) downloads:    Arc<DownloadsRoot>,
    pub(crate) index_file:   Arc<PathBuf>,
    pub(crate) mime:         Arc<MimeTable>,
    pub(crate) orchestrator: Arc<JobOrchestrator>,
}

impl GatewayState {
    /// Wires the handlers to `fetcher`; `format` is passed to every fetch.
    #[must_use]
    pub fn new(config: &GatewayConfig, fetcher: Arc<dyn Fetcher>, format: impl Into<String>) -> Self {
        let downloads = DownloadsRoot::new(&config.downloads_dir, &config.artifacts_route);
        let orchestrator = JobOrchestrator::builder()
            .fetcher(fetcher)
            .downloads(downloads.clone())
            .format(format)
            .surface_failures(config.surface_failures)
            .build();
        Self {
            downloads:    Arc::new(downloads),
            index_file:   Arc::new(config.index_file.clone()),
            mime:         Arc::new(MimeTable::with_overrides(&config.mime_overrides)),
            orchestrator: Arc::new(orchestrator),
        }
    }
}
