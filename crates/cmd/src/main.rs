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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use snafu::Whatever;

mod build_info;
use fetchgate_app::AppConfig;

#[derive(Debug, Parser)]
#[clap(
name = "fetchgate",
about= "WebSocket-triggered fetch gateway with a range-aware file server",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
    Version(VersionArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the build version.
Examples:

fetchgate version

")]
struct VersionArgs {}

impl VersionArgs {
    #[allow(clippy::unnecessary_wraps)]
    fn run(&self) -> Result<(), Whatever> {
        println!("fetchgate {}", build_info::FULL_VERSION);
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the fetchgate server.
Examples:

fetchgate server
fetchgate server --config fetchgate.toml
fetchgate server --bind 127.0.0.1:9000 --downloads /srv/media

Environment variables such as FETCHGATE__HTTP__BIND_ADDRESS override the
config file; flags override both.

")]
struct ServerArgs {
    /// Path to a TOML config file
    #[arg(short, long)]
    config:    Option<PathBuf>,
    /// Address to listen on, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    bind:      Option<String>,
    /// Directory artifacts are fetched into and served from
    #[arg(short, long)]
    downloads: Option<PathBuf>,
}

impl ServerArgs {
    fn config(&self) -> Result<AppConfig, Whatever> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(bind) = &self.bind {
            config.http.bind_address.clone_from(bind);
        }
        if let Some(downloads) = &self.downloads {
            config.gateway.downloads_dir.clone_from(downloads);
        }
        Ok(config)
    }

    async fn run(&self) -> Result<(), Whatever> {
        let app = self.config()?.open();
        app.run().await
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(sa) => sa.run().await,
        Commands::Version(va) => va.run(),
    }
}
