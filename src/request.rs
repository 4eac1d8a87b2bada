//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! `FileProcessingRequest`: path and id hygiene checked once, before any
//! stream is opened. A request that fails validation never reaches
//! [`crate::storage::StorageService`].

use std::path::PathBuf;

use crate::error::{CoreError, Result};

const MAX_PATH_LEN: usize = 260;
const INVALID_CHARS: &[char] = &['*', '?', '"', '<', '>', '|'];

/// Reserved device names, including the `COM^`/`LPT^` entries the source
/// validator carried as a literal (not real Windows reserved names — kept
/// as-is, see DESIGN.md Open Question 4).
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "COM^", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9", "LPT^",
];

/// A validated request to encrypt or decrypt one file.
#[derive(Debug, Clone)]
pub struct FileProcessingRequest {
    pub file_id: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
}

impl FileProcessingRequest {
    /// Build a request, running every §6 validation rule. Returns
    /// `InvalidRequest` on the first rule broken.
    pub fn new(
        file_id: impl Into<String>,
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let req = Self {
            file_id: file_id.into(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
        };
        req.validate()?;
        Ok(req)
    }

    fn validate(&self) -> Result<()> {
        validate_id(&self.file_id)?;
        validate_path(&self.source_path)?;
        validate_path(&self.destination_path)?;
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CoreError::InvalidRequest("fileId must be non-empty and non-whitespace".into()));
    }
    Ok(())
}

fn validate_path(path: &std::path::Path) -> Result<()> {
    let s = path
        .to_str()
        .ok_or_else(|| CoreError::InvalidRequest("path is not valid UTF-8".into()))?;

    if s.trim().is_empty() {
        return Err(CoreError::InvalidRequest("path must be non-empty and non-whitespace".into()));
    }
    if s.len() > MAX_PATH_LEN {
        return Err(CoreError::InvalidRequest(format!("path exceeds {MAX_PATH_LEN} characters")));
    }
    if s.contains("//") || s.contains("\\\\") {
        return Err(CoreError::InvalidRequest("path contains a double separator".into()));
    }
    if let Some(last) = s.chars().last() {
        if last == ' ' || last == '.' {
            return Err(CoreError::InvalidRequest("path has a trailing space or dot".into()));
        }
    }
    if s.chars().any(|c| c.is_control() || INVALID_CHARS.contains(&c)) {
        return Err(CoreError::InvalidRequest("path contains an invalid character".into()));
    }

    let segments: Vec<&str> = s.split(['/', '\\']).filter(|seg| !seg.is_empty()).collect();
    if segments.iter().any(|seg| *seg == "..") {
        return Err(CoreError::InvalidRequest("path contains a \"..\" segment".into()));
    }

    if let Some(stem) = segments.last().map(|seg| strip_extension(seg)) {
        if RESERVED_NAMES.iter().any(|name| name.eq_ignore_ascii_case(stem)) {
            return Err(CoreError::InvalidRequest(format!("\"{stem}\" is a reserved device name")));
        }
    }

    if !has_valid_root(s) {
        return Err(CoreError::InvalidRequest("path has no valid root".into()));
    }

    Ok(())
}

fn strip_extension(segment: &str) -> &str {
    match segment.find('.') {
        Some(0) | None => segment,
        Some(idx) => &segment[..idx],
    }
}

fn has_valid_root(s: &str) -> bool {
    if s.starts_with('/') {
        return true;
    }
    if s.starts_with("\\\\") {
        return true; // UNC: \\host\share\...
    }
    let bytes = s.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
}
