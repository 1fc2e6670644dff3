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

//! The fetch engine boundary.
//!
//! A [`Fetcher`] performs one blocking download/transcode. It reports
//! human-readable progress through a [`ProgressSink`] and announces the final
//! artifact through [`ProgressSink::finished`]. Callers run it on a blocking
//! thread; nothing here is async.

mod command;
mod error;

use std::path::{Path, PathBuf};

pub use command::{ARTIFACT_MARKER, CommandFetcher, FetcherConfig, classify_line};
pub use error::{FetchError, Result};

/// Severity of a progress line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum Severity {
    #[display("debug")]
    Debug,
    #[display("info")]
    Info,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

/// Receives progress from a running fetch.
///
/// Implementations must tolerate being called from several threads, since a
/// fetcher may read stdout and stderr of a child process concurrently.
pub trait ProgressSink: Send + Sync {
    /// One line of status text.
    fn emit(&self, severity: Severity, line: &str);

    /// The fetch produced its final artifact at `path`.
    fn finished(&self, path: &Path);
}

/// What to fetch and where to put it.
#[derive(Clone, Debug, PartialEq, Eq, bon::Builder)]
pub struct FetchRequest {
    /// Source URL or identifier, as sent by the client.
    #[builder(into)]
    pub source:     String,
    /// Format selector understood by the fetch engine.
    #[builder(into)]
    pub format:     String,
    /// Directory the artifact is written into.
    #[builder(into)]
    pub output_dir: PathBuf,
}

/// A blocking fetch engine.
pub trait Fetcher: Send + Sync + 'static {
    /// Runs one fetch to completion.
    ///
    /// Blocks the calling thread for the whole download. Returning `Ok` without
    /// having called [`ProgressSink::finished`] means nothing was produced.
    fn fetch(&self, request: &FetchRequest, sink: &dyn ProgressSink) -> Result<()>;
}
