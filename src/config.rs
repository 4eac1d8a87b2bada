//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Runtime configuration: where the system security key lives, how big a
//! chunk is, how many PBKDF2 iterations guard the SSK. All of it defaults
//! to the fixed constants spec.md §6 names; overriding is for tests and
//! operators who need a non-default base directory, not a security knob.

use std::path::{Path, PathBuf};

/// Plaintext chunk size; only the final chunk of a stream may be shorter.
pub const BUFFER_SIZE: usize = 81_920;
/// AEAD authentication tag size (AES-GCM).
pub const TAG_SIZE: usize = 16;
/// AEAD nonce size (AES-GCM).
pub const NONCE_SIZE: usize = 12;
/// Default (and only supported) content-key size.
pub const DEFAULT_KEY_SIZE: usize = 32;
/// Wrapped content key size for a 32-byte CK: two AEAD layers, each
/// `nonce(12) || ciphertext(32) || tag(16)` = 60 bytes, so 2 * 60 - (32
/// bytes saved because the inner layer's ciphertext is itself only 32
/// bytes of CK, not re-padded) — fixed at 88 bytes per spec.md §3/§6.
pub const FINAL_ENCRYPTED_KEY_SIZE: usize = 88;
/// System security key size in bits.
pub const SYSTEM_SECURITY_KEY_BITS: usize = 256;
pub const SYSTEM_SECURITY_KEY_BYTES: usize = SYSTEM_SECURITY_KEY_BITS / 8;
/// PBKDF2-HMAC-SHA256 iteration count used to derive the SSK.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Directory (under the process base directory) the system key lives in.
pub const DEFAULT_VAULT_SUBDIR: &str = "vault";
/// Filename of the persisted system security key.
pub const DEFAULT_KEY_FILENAME: &str = "spbin.key";

/// Runtime configuration for [`crate::vault::VaultService`] and
/// [`crate::storage::StorageService`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Process base directory; the SSK lives at `base_dir/vault_subdir/key_filename`.
    pub base_dir: PathBuf,
    pub vault_subdir: String,
    pub key_filename: String,
    pub buffer_size: usize,
    pub pbkdf2_iterations: u32,
}

impl Config {
    /// Build a config rooted at `base_dir`, keeping every other default.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Full path to the persisted system security key file.
    pub fn key_file_path(&self) -> PathBuf {
        self.base_dir.join(&self.vault_subdir).join(&self.key_filename)
    }

    /// Directory the key file lives in (created on first SSK generation).
    pub fn vault_dir(&self) -> PathBuf {
        self.base_dir.join(&self.vault_subdir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            vault_subdir: DEFAULT_VAULT_SUBDIR.to_string(),
            key_filename: DEFAULT_KEY_FILENAME.to_string(),
            buffer_size: BUFFER_SIZE,
            pbkdf2_iterations: PBKDF2_ITERATIONS,
        }
    }
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("NEXPLOCK_BASE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(".").join(".nexplock"))
}
