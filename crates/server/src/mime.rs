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

use std::{collections::HashMap, path::Path};

/// Fallback for files with no or unknown extension.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extensions the generic table gets wrong for media players.
const BUILTIN_OVERRIDES: &[(&str, &str)] = &[
    ("m4a", "audio/mp4"),
    ("opus", "audio/ogg"),
    ("mkv", "video/x-matroska"),
    ("webm", "video/webm"),
];

/// Extension to `Content-Type` lookup with per-extension overrides.
#[derive(Clone, Debug)]
pub struct MimeTable {
    overrides: HashMap<String, String>,
}

impl Default for MimeTable {
    fn default() -> Self {
        Self {
            overrides: BUILTIN_OVERRIDES
                .iter()
                .map(|(ext, mime)| ((*ext).to_string(), (*mime).to_string()))
                .collect(),
        }
    }
}

impl MimeTable {
    /// Built-in overrides extended (or replaced) by `extra`. Extensions are
    /// matched case-insensitively, with or without a leading dot.
    #[must_use]
    pub fn with_overrides<'a>(extra: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut table = Self::default();
        for (ext, mime) in extra {
            table.overrides.insert(normalize_ext(ext), mime.clone());
        }
        table
    }

    /// Content type for `path`, decided by its extension.
    #[must_use]
    pub fn content_type(&self, path: &Path) -> String {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return DEFAULT_CONTENT_TYPE.to_string();
        };
        let ext = normalize_ext(ext);
        if let Some(mime) = self.overrides.get(&ext) {
            return mime.clone();
        }
        mime_guess::from_ext(&ext)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }
}

fn normalize_ext(ext: &str) -> String { ext.trim_start_matches('.').to_ascii_lowercase() }
