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

mod settings;

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bon::Builder;
use fetchgate_common_telemetry::{LoggingOptions, init_global_logging, set_panic_hook};
use fetchgate_fetcher::{CommandFetcher, Fetcher, FetcherConfig};
use fetchgate_server::{GatewayConfig, GatewayState, HttpServerConfig, start_gateway_server};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, Whatever};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Represents the main application with lifecycle management
#[derive(SmartDefault)]
pub struct App {
    /// Application configuration
    pub config:             AppConfig,
    /// Controls if the application should continue running
    #[default(_code = "Arc::new(AtomicBool::new(false))")]
    pub running:            Arc<AtomicBool>,
    /// Cancelled once the gateway has fully stopped
    #[default(_code = "CancellationToken::new()")]
    pub cancellation_token: CancellationToken,
}

/// Configuration for the application
///
/// Loaded by [`AppConfig::load`]: built-in defaults, then an optional TOML
/// file, then `FETCHGATE__SECTION__KEY` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault, Builder)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener configuration
    #[builder(default)]
    pub http:    HttpServerConfig,
    /// Downloads root, routes and job behavior
    #[builder(default)]
    pub gateway: GatewayConfig,
    /// External fetch program
    #[builder(default)]
    pub fetcher: FetcherConfig,
    /// Log sinks and filters
    #[builder(default)]
    pub logging: LoggingOptions,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config: self,
            ..Default::default()
        }
    }
}

/// Handle for controlling a running application
pub struct AppHandle {
    /// Sender for triggering shutdown
    shutdown_tx:        Option<oneshot::Sender<()>>,
    /// Application running flag
    running:            Arc<AtomicBool>,
    /// Cancelled once the gateway has stopped
    cancellation_token: CancellationToken,
    /// Address the gateway listens on
    local_addr:         SocketAddr,
}

impl AppHandle {
    /// Gracefully shutdown the application
    pub fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the application is still running
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    /// Wait for the application to shutdown
    pub async fn wait_for_shutdown(&self) { self.cancellation_token.cancelled().await; }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}

impl App {
    /// Start the gateway with `fetcher` and return a handle for controlling it
    ///
    /// The downloads root is created if it does not exist yet.
    pub async fn start(&self, fetcher: Arc<dyn Fetcher>) -> Result<AppHandle, Whatever> {
        info!("Starting fetchgate");

        let gateway_config = &self.config.gateway;
        std::fs::create_dir_all(&gateway_config.downloads_dir).with_whatever_context(|_| {
            format!(
                "Failed to create downloads directory {}",
                gateway_config.downloads_dir.display()
            )
        })?;

        let state = GatewayState::new(gateway_config, fetcher, self.config.fetcher.format.clone());
        let mut gateway = start_gateway_server(&self.config.http, state)
            .await
            .whatever_context("Failed to start gateway")?;
        gateway
            .wait_for_start()
            .await
            .whatever_context("Gateway failed to start")?;
        let local_addr = gateway.local_addr();

        self.running.store(true, Ordering::SeqCst);
        info!(
            addr = %local_addr,
            downloads = %gateway_config.downloads_dir.display(),
            "Application started successfully"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app_handle = AppHandle {
            shutdown_tx: Some(shutdown_tx),
            running: Arc::clone(&self.running),
            cancellation_token: self.cancellation_token.clone(),
            local_addr,
        };

        let running = Arc::clone(&self.running);
        let cancellation_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_rx).await;

            info!("Shutting down gateway");
            gateway.shutdown();
            if let Err(e) = gateway.wait_for_stop().await {
                warn!(error = %e, "Gateway did not stop cleanly");
            }

            running.store(false, Ordering::SeqCst);
            cancellation_token.cancel();
            info!("Application shutdown complete");
        });

        Ok(app_handle)
    }

    /// Run the application blocking until it's shut down
    ///
    /// Installs logging and the panic hook, then serves with a
    /// [`CommandFetcher`] built from the configuration.
    pub async fn run(self) -> Result<(), Whatever> {
        let _guards = init_global_logging(&self.config.logging);
        set_panic_hook();

        let fetcher = Arc::new(CommandFetcher::new(self.config.fetcher.clone()));
        info!(program = %fetcher.config().program, "Using command fetcher");

        let handle = self.start(fetcher).await?;
        handle.wait_for_shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        _ = shutdown_rx => { info!("Received shutdown signal"); },
    }
}
