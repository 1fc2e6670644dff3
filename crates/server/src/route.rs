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

use axum::http::Method;
use percent_encoding::percent_decode_str;

/// Liveness endpoint, answered regardless of any other state.
pub const HEALTH_PATH: &str = "/healthz";

/// Body of the liveness response.
pub const HEALTH_BODY: &str = "OK\n";

/// Where a plain HTTP request goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Health,
    /// The client UI asset.
    Index,
    /// A percent-decoded path relative to the downloads root.
    Artifact(String),
    NotFound,
    MethodNotAllowed,
}

impl Route {
    /// Classifies a request by method and raw (still percent-encoded) path.
    ///
    /// `artifacts_route` is the first path segment artifacts live under,
    /// without slashes.
    #[must_use]
    pub fn classify(method: &Method, path: &str, artifacts_route: &str) -> Self {
        if *method != Method::GET && *method != Method::HEAD {
            return Self::MethodNotAllowed;
        }
        match path {
            HEALTH_PATH => return Self::Health,
            "/" => return Self::Index,
            _ => {}
        }

        let Some(encoded) = path
            .strip_prefix('/')
            .and_then(|p| p.strip_prefix(artifacts_route))
            .and_then(|p| p.strip_prefix('/'))
        else {
            return Self::NotFound;
        };
        if artifacts_route.is_empty() || encoded.is_empty() {
            return Self::NotFound;
        }

        match percent_decode_str(encoded).decode_utf8() {
            Ok(decoded) => Self::Artifact(decoded.into_owned()),
            Err(_) => Self::NotFound,
        }
    }
}
