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

use std::path::Path;

use config::{Config, Environment, File};
use snafu::{ResultExt, Whatever, ensure_whatever};

use crate::AppConfig;

/// Prefix of environment overrides, e.g. `FETCHGATE__HTTP__BIND_ADDRESS`.
pub const ENV_PREFIX: &str = "FETCHGATE";

const ENV_SEPARATOR: &str = "__";

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(" ")
        .with_list_parse_key("fetcher.args")
}

impl AppConfig {
    /// Loads configuration from defaults, an optional TOML file, then the
    /// environment. Later layers win.
    ///
    /// A `path` that does not exist is an error; omitting it is not.
    pub fn load(path: Option<&Path>) -> Result<Self, Whatever> { Self::load_with(path, environment()) }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, Whatever> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            ensure_whatever!(path.is_file(), "Config file {} does not exist", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(env)
            .build()
            .whatever_context("Failed to read configuration")?
            .try_deserialize()
            .whatever_context("Invalid configuration")
    }
}
