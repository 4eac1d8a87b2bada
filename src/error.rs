//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Unified error taxonomy for the encrypt-at-rest core.

use thiserror::Error;

/// Top-level error type returned by every public operation in this crate.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),

    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    #[error("vault corrupt: system key file has unexpected length (expected {expected}, found {found})")]
    VaultCorrupt { expected: usize, found: usize },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("io error during {phase}: {source}")]
    Io {
        phase: IoPhase,
        #[source]
        source: std::io::Error,
    },

    #[error("durable flush failed during {operation}: os error {code}")]
    IoDurability { operation: &'static str, code: i32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("stream or service already closed")]
    AlreadyClosed,
}

/// Which phase of a stream operation an I/O error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPhase {
    Open,
    Read,
    Write,
    Flush,
    Close,
}

impl std::fmt::Display for IoPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IoPhase::Open => "open",
            IoPhase::Read => "read",
            IoPhase::Write => "write",
            IoPhase::Flush => "flush",
            IoPhase::Close => "close",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
