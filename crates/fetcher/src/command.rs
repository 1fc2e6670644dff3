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

use std::{
    io::{BufRead, BufReader, Read},
    path::Path,
    process::{Command, Stdio},
};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    FetchRequest, Fetcher, ProgressSink, Severity,
    error::{EmptySourceSnafu, ExitStatusSnafu, Result, SpawnSnafu, WaitSnafu},
};

/// Prefix of the stdout line that carries the final artifact path.
pub const ARTIFACT_MARKER: &str = "fetchgate:artifact ";

/// Settings for [`CommandFetcher`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct FetcherConfig {
    /// Program to execute, looked up on `PATH` when not absolute.
    #[default = "yt-dlp"]
    #[builder(into, default = "yt-dlp".to_string())]
    pub program:         String,
    /// Arguments placed before the generated ones, e.g. `["-m", "yt_dlp"]`
    /// when `program` is a Python interpreter.
    #[builder(default)]
    pub args:            Vec<String>,
    /// Format selector passed with `-f`.
    #[default = "bestaudio[ext=m4a]/bestaudio/best"]
    #[builder(into, default = "bestaudio[ext=m4a]/bestaudio/best".to_string())]
    pub format:          String,
    /// Output file name template, relative to the request's output dir.
    #[default = "%(title)s.%(ext)s"]
    #[builder(into, default = "%(title)s.%(ext)s".to_string())]
    pub output_template: String,
}

/// Runs a yt-dlp compatible program as a child process.
///
/// Every stdout and stderr line becomes a progress line. The final file path
/// is printed by the child itself through `--print after_move:`, tagged with
/// [`ARTIFACT_MARKER`].
#[derive(Clone, Debug)]
pub struct CommandFetcher {
    config: FetcherConfig,
}

impl CommandFetcher {
    #[must_use]
    pub const fn new(config: FetcherConfig) -> Self { Self { config } }

    #[must_use]
    pub const fn config(&self) -> &FetcherConfig { &self.config }

    fn command_args(&self, request: &FetchRequest) -> Vec<String> {
        let output = request.output_dir.join(&self.config.output_template);
        let mut args = self.config.args.clone();
        args.extend([
            "--newline".to_string(),
            "--no-quiet".to_string(),
            "-f".to_string(),
            request.format.clone(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            "--print".to_string(),
            format!("after_move:{ARTIFACT_MARKER}%(filepath)s"),
            "--".to_string(),
            request.source.clone(),
        ]);
        args
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, request: &FetchRequest, sink: &dyn ProgressSink) -> Result<()> {
        ensure!(!request.source.trim().is_empty(), EmptySourceSnafu);

        let program = &self.config.program;
        let args = self.command_args(request);
        debug!(program = %program, ?args, "spawning fetch process");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context(SpawnSnafu {
                program: program.clone(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        std::thread::scope(|scope| {
            if let Some(stderr) = stderr {
                scope.spawn(move || relay_lines(stderr, sink));
            }
            if let Some(stdout) = stdout {
                relay_lines(stdout, sink);
            }
        });

        let status = child.wait().context(WaitSnafu {
            program: program.clone(),
        })?;
        ensure!(
            status.success(),
            ExitStatusSnafu {
                program: program.clone(),
                code:    status.code(),
            }
        );
        Ok(())
    }
}

fn relay_lines(stream: impl Read, sink: &dyn ProgressSink) {
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "stopped reading fetch process output");
                return;
            }
        };
        if let Some(path) = line.strip_prefix(ARTIFACT_MARKER) {
            sink.finished(Path::new(path.trim_end()));
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        sink.emit(classify_line(&line), &line);
    }
}

/// Guesses the severity of a yt-dlp output line from its prefix.
#[must_use]
pub fn classify_line(line: &str) -> Severity {
    if line.starts_with("[debug] ") {
        Severity::Debug
    } else if line.starts_with("WARNING:") {
        Severity::Warning
    } else if line.starts_with("ERROR:") {
        Severity::Error
    } else {
        Severity::Info
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::Mutex,
    };

    use super::*;
    use crate::FetchError;

    #[derive(Default)]
    struct RecordingSink {
        lines:    Mutex<Vec<(Severity, String)>>,
        artifact: Mutex<Option<PathBuf>>,
    }

    impl ProgressSink for RecordingSink {
        fn emit(&self, severity: Severity, line: &str) {
            self.lines.lock().unwrap().push((severity, line.to_string()));
        }

        fn finished(&self, path: &Path) { *self.artifact.lock().unwrap() = Some(path.to_path_buf()); }
    }

    /// Builds a fetcher that runs `script` through `sh`, so the generated
    /// yt-dlp arguments land in `$@`.
    fn shell_fetcher(dir: &Path, script: &str) -> CommandFetcher {
        let path = dir.join("fake-fetch.sh");
        std::fs::write(&path, script).unwrap();
        CommandFetcher::new(
            FetcherConfig::builder()
                .program("sh")
                .args(vec![path.to_string_lossy().into_owned()])
                .build(),
        )
    }

    fn request(dir: &Path) -> FetchRequest {
        FetchRequest::builder()
            .source("https://example/video")
            .format("bestaudio")
            .output_dir(dir)
            .build()
    }

    #[test]
    fn classifies_yt_dlp_prefixes() {
        assert_eq!(classify_line("[debug] Invoking downloader"), Severity::Debug);
        assert_eq!(classify_line("WARNING: unable to extract"), Severity::Warning);
        assert_eq!(classify_line("ERROR: unsupported URL"), Severity::Error);
        assert_eq!(classify_line("[download]  42.0% of 3.00MiB"), Severity::Info);
        assert_eq!(classify_line("[debugger] not a debug line"), Severity::Info);
    }

    #[test]
    fn builds_yt_dlp_arguments() {
        let fetcher = CommandFetcher::new(
            FetcherConfig::builder()
                .program("python3")
                .args(vec!["-m".to_string(), "yt_dlp".to_string()])
                .build(),
        );
        let args = fetcher.command_args(&request(Path::new("downloads")));

        assert_eq!(&args[..2], ["-m", "yt_dlp"]);
        assert!(args.windows(2).any(|w| w == ["-f", "bestaudio"]));
        assert!(
            args.windows(2)
                .any(|w| w[0] == "-o" && w[1].ends_with("%(title)s.%(ext)s"))
        );
        assert_eq!(args.last().map(String::as_str), Some("https://example/video"));
    }

    #[test]
    fn relays_output_and_captures_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "for a; do last=$a; done\n\
             echo \"[generic] $last: Downloading webpage\"\n\
             echo 'WARNING: falling back to generic extractor' >&2\n\
             echo '[debug] hidden detail' >&2\n\
             echo '[download] 100% of 1.00KiB'\n\
             echo '{ARTIFACT_MARKER}{}/expected-name.m4a'\n",
            dir.path().display()
        );
        let fetcher = shell_fetcher(dir.path(), &script);
        let sink = RecordingSink::default();

        fetcher.fetch(&request(dir.path()), &sink).unwrap();

        let lines = sink.lines.lock().unwrap();
        assert!(lines.contains(&(
            Severity::Info,
            "[generic] https://example/video: Downloading webpage".to_string()
        )));
        assert!(lines.contains(&(
            Severity::Warning,
            "WARNING: falling back to generic extractor".to_string()
        )));
        assert!(lines.contains(&(Severity::Debug, "[debug] hidden detail".to_string())));
        assert!(!lines.iter().any(|(_, l)| l.starts_with(ARTIFACT_MARKER)));

        let stdout_lines: Vec<_> = lines
            .iter()
            .filter(|(_, l)| l.starts_with('['))
            .filter(|(s, _)| *s == Severity::Info)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(
            stdout_lines,
            [
                "[generic] https://example/video: Downloading webpage",
                "[download] 100% of 1.00KiB"
            ]
        );

        assert_eq!(
            sink.artifact.lock().unwrap().as_deref(),
            Some(dir.path().join("expected-name.m4a").as_path())
        );
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = shell_fetcher(dir.path(), "echo 'ERROR: Unsupported URL' >&2\nexit 3\n");
        let sink = RecordingSink::default();

        let err = fetcher.fetch(&request(dir.path()), &sink).unwrap_err();

        assert!(matches!(err, FetchError::ExitStatus { code: Some(3), .. }));
        assert!(sink.artifact.lock().unwrap().is_none());
        assert_eq!(
            sink.lines.lock().unwrap().as_slice(),
            [(Severity::Error, "ERROR: Unsupported URL".to_string())]
        );
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let fetcher = CommandFetcher::new(
            FetcherConfig::builder()
                .program("/nonexistent/fetchgate-no-such-fetcher")
                .build(),
        );
        let sink = RecordingSink::default();

        let err = fetcher
            .fetch(&request(Path::new("downloads")), &sink)
            .unwrap_err();

        assert!(matches!(err, FetchError::Spawn { .. }));
    }

    #[test]
    fn blank_source_is_rejected_before_spawning() {
        let fetcher = CommandFetcher::new(FetcherConfig::default());
        let sink = RecordingSink::default();
        let request = FetchRequest::builder()
            .source("   ")
            .format("best")
            .output_dir("downloads")
            .build();

        let err = fetcher.fetch(&request, &sink).unwrap_err();

        assert!(matches!(err, FetchError::EmptySource));
    }
}
