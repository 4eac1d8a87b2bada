//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Deterministic per-chunk nonce derivation.
//!
//! Two stages: an amortised salt precomputation once per stream, then a
//! cheap HKDF-Expand per chunk. This is a home-grown construction rather
//! than standard HKDF-Extract(salt, IKM) — see DESIGN.md Open Question 1.
//! It is secure for nonce generation given a random file nonce, but it is
//! not a general-purpose KDF and must not be repurposed as one.

use hkdf::Hkdf;
use hmac::Mac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::hash_provider::HashProvider;

pub const NONCE_SIZE: usize = 12;
pub const FILE_NONCE_SIZE: usize = 12;

/// Domain-separation context mixed into every per-chunk HKDF-Expand call.
pub const NONCE_CONTEXT: &[u8] = b"NexpLock/chunk-nonce/v1";

/// Precomputed per-stream salt, amortising the cost of nonce derivation
/// across every chunk in a file. Zeroized on drop.
pub struct NonceSalt([u8; 32]);

impl Drop for NonceSalt {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// `HMAC-SHA256(key = file_nonce, msg = 0_i64_le)`, once per stream.
pub fn precompute_salt(
    provider: &dyn HashProvider,
    file_nonce: &[u8; FILE_NONCE_SIZE],
) -> NonceSalt {
    let mut mac = provider.create_hmac(file_nonce);
    mac.update(&0i64.to_le_bytes());
    let out = mac.finalize().into_bytes();
    let mut salt = [0u8; 32];
    salt.copy_from_slice(&out);
    NonceSalt(salt)
}

/// Derive the nonce for chunk `idx` from the stream's precomputed salt.
///
/// `prk = HMAC-SHA256(key = salt, msg = idx_le)`, then
/// `okm = HKDF-Expand-SHA256(prk, info = idx_le || NONCE_CONTEXT, L = 12)`.
pub fn derive(provider: &dyn HashProvider, salt: &NonceSalt, idx: i64) -> [u8; NONCE_SIZE] {
    let idx_le = idx.to_le_bytes();

    let mut mac = provider.create_hmac(&salt.0);
    mac.update(&idx_le);
    let mut prk = mac.finalize().into_bytes();

    let mut info = Vec::with_capacity(idx_le.len() + NONCE_CONTEXT.len());
    info.extend_from_slice(&idx_le);
    info.extend_from_slice(NONCE_CONTEXT);

    let hk = Hkdf::<Sha256>::from_prk(&prk).expect("32-byte PRK is always valid for HKDF-SHA256");
    let mut okm = [0u8; NONCE_SIZE];
    hk.expand(&info, &mut okm)
        .expect("12-byte output is within HKDF-SHA256's expand limit");

    prk.zeroize();
    okm
}
