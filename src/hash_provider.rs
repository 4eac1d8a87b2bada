//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Platform-selected HMAC/hash capability provider.
//!
//! A small trait selected once at process start from the host OS. All three
//! variants currently agree on SHA-256, a 32-byte HMAC key size, and a
//! 32-byte salt size; the indirection exists so a platform can later swap in
//! a hardware-accelerated primitive without touching call sites.

use hmac::Hmac;
use sha2::Sha256;

/// Hash family reported by a [`HashProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
}

/// Capability set consulted by [`crate::vault::VaultService`] and
/// [`crate::storage::StorageService`].
pub trait HashProvider: Send + Sync {
    /// Build a keyed HMAC instance over this provider's hash algorithm.
    fn create_hmac(&self, key: &[u8]) -> Hmac<Sha256>;

    /// Which hash family this provider is backed by.
    fn hash_name(&self) -> HashAlgorithm;

    /// Size, in bytes, of the key this provider's HMAC expects.
    fn hmac_key_size(&self) -> usize;

    /// Size, in bytes, of salts this provider expects (SSK derivation, etc).
    fn salt_size(&self) -> usize;
}

macro_rules! sha256_hash_provider {
    ($name:ident) => {
        /// Platform-selected hash provider.
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl HashProvider for $name {
            fn create_hmac(&self, key: &[u8]) -> Hmac<Sha256> {
                use hmac::Mac;
                // HMAC accepts any key length; spec.md fixes callers to hmac_key_size().
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length")
            }

            fn hash_name(&self) -> HashAlgorithm {
                HashAlgorithm::Sha256
            }

            fn hmac_key_size(&self) -> usize {
                32
            }

            fn salt_size(&self) -> usize {
                32
            }
        }
    };
}

sha256_hash_provider!(LinuxHashProvider);
sha256_hash_provider!(MacHashProvider);
sha256_hash_provider!(WindowsHashProvider);

/// Select the hash provider for the host this process is running on.
pub fn current() -> &'static dyn HashProvider {
    #[cfg(target_os = "linux")]
    {
        &LinuxHashProvider
    }
    #[cfg(target_os = "macos")]
    {
        &MacHashProvider
    }
    #[cfg(target_os = "windows")]
    {
        &WindowsHashProvider
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        &LinuxHashProvider
    }
}
