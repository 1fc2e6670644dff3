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

pub mod downloads;
pub mod files;
pub mod http;
pub mod job;
pub mod mime;
pub mod range;
pub mod route;
pub mod state;

use std::net::SocketAddr;

use snafu::Snafu;
use tokio::{sync::oneshot::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub use crate::{
    http::{HttpServerConfig, gateway_router, start_gateway_server},
    state::{GatewayConfig, GatewayState},
};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(transparent)]
    Network { source: NetworkError },

    #[snafu(display("Gateway task ended before it started serving"))]
    NeverStarted,

    #[snafu(display("Gateway start signal already consumed"))]
    StartSignalConsumed,

    #[snafu(display("Gateway task panicked"))]
    TaskPanicked {
        #[snafu(source)]
        source: tokio::task::JoinError,
    },
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum NetworkError {
    #[snafu(display("Failed to bind {addr}"))]
    Bind {
        addr:   SocketAddr,
        #[snafu(source)]
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse address {addr}"))]
    ParseAddress {
        addr:   String,
        #[snafu(source)]
        source: std::net::AddrParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle for managing the running gateway.
///
/// This handle provides control over a running service, allowing you to:
/// - Wait for the service to start accepting connections
/// - Signal graceful shutdown
/// - Wait for the service to fully stop
///
/// Shutdown stops accepting new connections and lets in-flight requests
/// finish; fetch jobs already running on the blocking pool run to completion.
#[derive(Debug)]
pub struct ServiceHandler {
    /// Join handle for the server task
    join_handle:        JoinHandle<()>,
    /// Token for signalling shutdown
    cancellation_token: CancellationToken,
    /// Receiver for server start notification
    started_rx:         Option<Receiver<()>>,
    /// Address the listener actually bound, useful with port `0`
    local_addr:         SocketAddr,
}

impl ServiceHandler {
    /// Waits for the server to start accepting connections.
    ///
    /// The start signal can only be consumed once.
    pub async fn wait_for_start(&mut self) -> Result<()> {
        let started_rx = self.started_rx.take().ok_or(Error::StartSignalConsumed)?;
        started_rx.await.map_err(|_| Error::NeverStarted)
    }

    /// Waits for the server task to finish. Call after [`Self::shutdown`].
    pub async fn wait_for_stop(self) -> Result<()> {
        self.join_handle
            .await
            .map_err(|source| Error::TaskPanicked { source })
    }

    /// Signals the server to begin graceful shutdown.
    ///
    /// This method triggers the shutdown process but does not wait for
    /// completion. Use `wait_for_stop()` to wait for the server to fully stop.
    pub fn shutdown(&self) { self.cancellation_token.cancel(); }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr { self.local_addr }
}
