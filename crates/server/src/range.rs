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

//! Single-range `Range` header resolution.
//!
//! Windows are half-open: `Partial { start, end }` covers bytes
//! `start..end`, so the wire form `bytes=A-B` becomes `A..B+1`.

/// Result of resolving a `Range` header against a file size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No `Range` header; the whole file, `0..total_size`.
    Whole,
    /// A satisfiable window with `start < end <= total_size`.
    Partial { start: u64, end: u64 },
    /// Malformed, multi-range, or outside the file.
    Unsatisfiable,
}

impl RangeOutcome {
    /// Byte count of the body this outcome produces.
    #[must_use]
    pub const fn len(self, total_size: u64) -> u64 {
        match self {
            Self::Whole => total_size,
            Self::Partial { start, end } => end - start,
            Self::Unsatisfiable => 0,
        }
    }

    #[must_use]
    pub const fn is_empty(self, total_size: u64) -> bool { self.len(total_size) == 0 }
}

/// Resolves an optional `Range` header value against `total_size`.
///
/// Accepts `bytes=A-B`, `bytes=A-` and `bytes=-N`. A suffix longer than the
/// file is clamped to the whole file. Everything else resolves to
/// [`RangeOutcome::Unsatisfiable`].
#[must_use]
pub fn resolve(range_header: Option<&str>, total_size: u64) -> RangeOutcome {
    let Some(header) = range_header else {
        return RangeOutcome::Whole;
    };
    parse_window(header, total_size).map_or(RangeOutcome::Unsatisfiable, |(start, end)| {
        RangeOutcome::Partial { start, end }
    })
}

fn parse_window(header: &str, total_size: u64) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, true) => return None,
        (false, false) => (parse_offset(first)?, parse_offset(last)?.checked_add(1)?),
        (false, true) => (parse_offset(first)?, total_size),
        (true, false) => {
            let suffix = parse_offset(last)?;
            (total_size.saturating_sub(suffix), total_size)
        }
    };

    (start < end && end <= total_size).then_some((start, end))
}

/// Digits only; `u64::from_str` would also take a leading `+`.
fn parse_offset(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
