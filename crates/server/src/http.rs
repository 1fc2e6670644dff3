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

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::ServiceHandler;
use crate::{
    BindSnafu, ParseAddressSnafu, Result,
    files::{self, FileResponse},
    route::{HEALTH_BODY, Route},
    state::GatewayState,
};

/// Configuration options for the HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, bon::Builder)]
#[serde(default)]
pub struct HttpServerConfig {
    /// The address to bind, serving both WebSocket upgrades and plain GETs
    #[default = "0.0.0.0:8080"]
    #[builder(into, default = "0.0.0.0:8080".to_string())]
    pub bind_address: String,
    /// Whether to allow cross-origin requests from any origin
    #[default = false]
    #[builder(default)]
    pub enable_cors:  bool,
}

/// Builds the gateway router.
///
/// Every request goes through a single dispatcher: upgrade requests become
/// control connections, everything else is classified by [`Route`].
pub fn gateway_router(state: GatewayState, enable_cors: bool) -> Router {
    let mut router = Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }
    router
}

/// Binds the listener, spawns the gateway and returns a handle for managing
/// its lifecycle.
///
/// # Errors
/// Returns an error if the bind address cannot be parsed or bound.
///
/// # Example
///
/// ```rust,ignore
/// let state = GatewayState::new(&GatewayConfig::default(), fetcher, "best");
/// let mut handle = start_gateway_server(&HttpServerConfig::default(), state).await?;
/// handle.wait_for_start().await?;
/// ```
pub async fn start_gateway_server(
    config: &HttpServerConfig,
    state: GatewayState,
) -> Result<ServiceHandler> {
    let bind_addr = config
        .bind_address
        .parse::<std::net::SocketAddr>()
        .context(ParseAddressSnafu {
            addr: config.bind_address.clone(),
        })?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context(BindSnafu { addr: bind_addr })?;
    let local_addr = listener.local_addr().context(BindSnafu { addr: bind_addr })?;

    let router = gateway_router(state, config.enable_cors);

    let cancellation_token = CancellationToken::new();
    let (join_handle, started_rx) = {
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let cancellation_token_clone = cancellation_token.clone();
        let join_handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    info!("Gateway (on {}) started", local_addr);
                    let _ = started_tx.send(());
                    cancellation_token_clone.cancelled().await;
                    info!("Gateway (on {}) received shutdown signal", local_addr);
                })
                .await;

            info!("Gateway (on {}) task completed: {:?}", local_addr, result);
        });
        (join_handle, started_rx)
    };

    Ok(ServiceHandler {
        join_handle,
        cancellation_token,
        started_rx: Some(started_rx),
        local_addr,
    })
}

async fn dispatch(
    State(state): State<GatewayState>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Ok(upgrade) = upgrade {
        let orchestrator = Arc::clone(&state.orchestrator);
        return upgrade.on_upgrade(move |socket| async move {
            orchestrator.handle_connection(socket).await;
        });
    }

    // A Range header that is not visible ASCII is malformed, not absent.
    let range = headers
        .get(header::RANGE)
        .map(|value| value.to_str().unwrap_or_default());

    match Route::classify(&method, uri.path(), state.downloads.route()) {
        Route::Health => (StatusCode::OK, HEALTH_BODY).into_response(),
        Route::Index => files::serve(&state.index_file, range, &state.mime)
            .await
            .into_response(),
        Route::Artifact(relative) => match state.downloads.resolve(&relative).await {
            Some(path) => files::serve(&path, range, &state.mime).await.into_response(),
            None => FileResponse::not_found().into_response(),
        },
        Route::NotFound => StatusCode::NOT_FOUND.into_response(),
        Route::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
