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

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;

/// The on-disk directory holding artifacts and the URL prefix it is served
/// under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadsRoot {
    dir:   PathBuf,
    route: String,
}

impl DownloadsRoot {
    /// `route` is the first path segment artifacts are served under, e.g.
    /// `"downloads"` for `/downloads/<file>`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, route: impl AsRef<str>) -> Self {
        Self {
            dir:   dir.into(),
            route: route.as_ref().trim_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path { &self.dir }

    #[must_use]
    pub fn route(&self) -> &str { &self.route }

    /// Maps an already percent-decoded relative path onto a file under the
    /// root.
    ///
    /// Returns `None` for anything that could leave the root: `..`, `.`,
    /// empty or absolute segments, backslashes, NUL bytes, or a symlink whose
    /// target lies outside the root. Missing files also yield `None`.
    pub async fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let mut target = self.dir.clone();
        for segment in relative.split('/') {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['\\', '\0'])
            {
                debug!(path = %relative, "rejecting artifact path segment {segment:?}");
                return None;
            }
            target.push(segment);
        }

        let root = fs::canonicalize(&self.dir).await.ok()?;
        let canonical = fs::canonicalize(&target).await.ok()?;
        if canonical.starts_with(&root) {
            Some(canonical)
        } else {
            debug!(path = %relative, "artifact path escapes the downloads root");
            None
        }
    }

    /// URL path under which `artifact` is served, e.g.
    /// `/downloads/sub/name.m4a`.
    ///
    /// Returns `None` when the artifact does not live under the root.
    pub async fn url_path(&self, artifact: &Path) -> Option<String> {
        let relative = match artifact.strip_prefix(&self.dir) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => {
                let root = fs::canonicalize(&self.dir).await.ok()?;
                let canonical = fs::canonicalize(artifact).await.ok()?;
                canonical.strip_prefix(&root).ok()?.to_path_buf()
            }
        };

        let mut url = format!("/{}", self.route);
        let mut segments = 0;
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    url.push('/');
                    url.push_str(&segment.to_string_lossy());
                    segments += 1;
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        (segments > 0).then_some(url)
    }
}
