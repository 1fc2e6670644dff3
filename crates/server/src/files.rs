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

//! Range-aware file responses.
//!
//! A file that is still being written by a fetch is served as whatever is on
//! disk when the request arrives; the size is read once per request.

use std::{io::SeekFrom, path::Path};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, Take},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{
    mime::MimeTable,
    range::{self, RangeOutcome},
};

/// Body of a [`FileResponse`]: nothing, or a bounded reader over one window
/// of an open file.
#[derive(Debug)]
pub enum FileBody {
    Empty,
    Window(Take<File>),
}

/// Status, headers and body for one file request.
#[derive(Debug)]
pub struct FileResponse {
    pub status:  StatusCode,
    pub headers: HeaderMap,
    pub body:    FileBody,
}

impl FileResponse {
    fn bare(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: FileBody::Empty,
        }
    }

    #[must_use]
    pub fn not_found() -> Self { Self::bare(StatusCode::NOT_FOUND) }

    #[must_use]
    pub fn range_not_satisfiable() -> Self { Self::bare(StatusCode::RANGE_NOT_SATISFIABLE) }
}

impl IntoResponse for FileResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            FileBody::Empty => Body::empty(),
            FileBody::Window(reader) => Body::from_stream(ReaderStream::new(reader)),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Serves `path` honoring an optional `Range` header value.
///
/// - missing, unreadable or non-regular file: `404`
/// - bad or unsatisfiable range: `416` without `Content-Range`
/// - no range: `200` with the whole file
/// - satisfiable range: `206` with exactly that window
///
/// I/O failures never escape; they collapse into `404`.
pub async fn serve(path: &Path, range_header: Option<&str>, mime: &MimeTable) -> FileResponse {
    match open_window(path, range_header, mime).await {
        Ok(response) => response,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "file not servable");
            FileResponse::not_found()
        }
    }
}

async fn open_window(
    path: &Path,
    range_header: Option<&str>,
    mime: &MimeTable,
) -> std::io::Result<FileResponse> {
    let mut file = File::open(path).await?;
    if !file.metadata().await?.is_file() {
        return Ok(FileResponse::not_found());
    }
    let total_size = file.seek(SeekFrom::End(0)).await?;

    let outcome = range::resolve(range_header, total_size);
    let (status, start) = match outcome {
        RangeOutcome::Unsatisfiable => {
            debug!(
                path = %path.display(),
                range = range_header.unwrap_or_default(),
                total_size,
                "range not satisfiable"
            );
            return Ok(FileResponse::range_not_satisfiable());
        }
        RangeOutcome::Whole => (StatusCode::OK, 0),
        RangeOutcome::Partial { start, .. } => (StatusCode::PARTIAL_CONTENT, start),
    };
    let length = outcome.len(total_size);

    file.seek(SeekFrom::Start(start)).await?;

    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&mime.content_type(path)) {
        Ok(value) => {
            headers.insert(header::CONTENT_TYPE, value);
        }
        Err(e) => warn!(path = %path.display(), error = %e, "unusable content type"),
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let RangeOutcome::Partial { start, end } = outcome
        && let Ok(value) =
            HeaderValue::from_str(&format!("bytes {start}-{}/{total_size}", end - 1))
    {
        headers.insert(header::CONTENT_RANGE, value);
    }

    Ok(FileResponse {
        status,
        headers,
        body: FileBody::Window(file.take(length)),
    })
}
