//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Chunked authenticated-encryption-at-rest core.
//!
//! Given a plaintext file and a caller-supplied master key, [`storage`]
//! produces a self-contained ciphertext file that can later be decrypted by
//! re-presenting the same master key: per-file content-key generation,
//! two-layer key wrapping behind a process-local system key ([`vault`]),
//! deterministic per-chunk nonces ([`nonce`]), and durable write-through I/O
//! ([`direct_stream`]).

pub mod buffer_pool;
pub mod config;
pub mod direct_stream;
pub mod error;
pub mod hash_provider;
pub mod nonce;
pub mod request;
pub mod storage;
pub mod vault;

pub use config::Config;
pub use direct_stream::{DirectStream, PlatformDirectStream};
pub use error::{CoreError, IoPhase, Result};
pub use request::FileProcessingRequest;
pub use storage::StorageService;
pub use vault::VaultService;
