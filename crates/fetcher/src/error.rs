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

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    #[snafu(display("Empty fetch source"))]
    EmptySource,

    #[snafu(display("Failed to start {program}: {source}"))]
    Spawn {
        program: String,
        source:  std::io::Error,
    },

    #[snafu(display("Failed waiting for {program}: {source}"))]
    Wait {
        program: String,
        source:  std::io::Error,
    },

    #[snafu(display("{program} exited with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))))]
    ExitStatus { program: String, code: Option<i32> },

    #[snafu(display("Fetch failed: {message}"))]
    Engine { message: String },
}

pub type Result<T> = std::result::Result<T, FetchError>;
