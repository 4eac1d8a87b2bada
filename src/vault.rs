//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Owns the process-local system security key (SSK) and performs the
//! two-layer content-key wrap: `AEAD(SSK, AEAD(MK, CK))`.

use std::sync::Arc;

use aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::Engine;
use rand::RngCore;
use rand_core::OsRng;
use tokio::sync::OnceCell;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{Config, DEFAULT_KEY_SIZE, NONCE_SIZE, SYSTEM_SECURITY_KEY_BYTES, TAG_SIZE};
use crate::direct_stream::{DirectStream, PlatformDirectStream};
use crate::error::{CoreError, Result};

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, aes_gcm::aead::consts::U12>;

/// The process-local system security key. Zeroized on drop; `Debug` never
/// prints key material.
pub struct Ssk([u8; SYSTEM_SECURITY_KEY_BYTES]);

impl Ssk {
    fn as_bytes(&self) -> &[u8; SYSTEM_SECURITY_KEY_BYTES] {
        &self.0
    }
}

impl Drop for Ssk {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Ssk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Ssk([REDACTED])")
    }
}

/// Owns the SSK and performs content-key wrap/unwrap. Cheap to clone —
/// the expensive state (the loaded SSK) is shared via the inner `Arc`/
/// `OnceCell`, and construction itself is free until the SSK is first used.
#[derive(Clone)]
pub struct VaultService {
    config: Arc<Config>,
    ssk_cell: Arc<OnceCell<std::result::Result<Arc<Ssk>, Arc<CoreError>>>>,
}

impl VaultService {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            ssk_cell: Arc::new(OnceCell::new()),
        }
    }

    /// Load the SSK from disk, generating and persisting one on first use.
    /// Memoised exactly once; a failed first attempt is sticky — later
    /// callers observe the same error rather than racing a retry.
    async fn ssk(&self) -> Result<Arc<Ssk>> {
        let result = self
            .ssk_cell
            .get_or_init(|| async { load_or_generate_ssk(&self.config).await.map(Arc::new).map_err(Arc::new) })
            .await;
        match result {
            Ok(ssk) => Ok(Arc::clone(ssk)),
            Err(e) => Err(clone_core_error(e)),
        }
    }

    /// Wrap a content key: `AEAD(SSK, AEAD(MK, CK))`.
    ///
    /// `mk_bytes` and `inner` are held in [`Zeroizing`] wrappers rather than
    /// zeroized by an explicit call placed after a fallible `?` expression,
    /// so a failure at `self.ssk().await?` still wipes them on unwind.
    pub async fn encrypt_key(&self, ck: &[u8; DEFAULT_KEY_SIZE], mk_b64: &str) -> Result<Vec<u8>> {
        let mk_bytes = Zeroizing::new(decode_master_key(mk_b64)?);
        let inner = Zeroizing::new(aead_wrap(&mk_bytes, ck)?);

        let ssk = self.ssk().await?;
        aead_wrap(ssk.as_bytes(), &inner)
    }

    /// Unwrap a content key, verifying both AEAD layers.
    ///
    /// Every intermediate buffer (`mk_bytes`, `inner`, the recovered `ck_vec`)
    /// is a [`Zeroizing`] value, so a failure anywhere along the chain —
    /// including a tampered WCK failing the outer `aead_unwrap` — still
    /// zeroizes it on unwind instead of leaking it on an early return.
    pub async fn decrypt_key(&self, wck: &[u8], mk_b64: &str) -> Result<[u8; DEFAULT_KEY_SIZE]> {
        let mk_bytes = Zeroizing::new(decode_master_key(mk_b64)?);

        let ssk = self.ssk().await?;
        let inner = Zeroizing::new(aead_unwrap(ssk.as_bytes(), wck)?);

        let ck_vec = Zeroizing::new(aead_unwrap(&mk_bytes, &inner)?);
        if ck_vec.len() != DEFAULT_KEY_SIZE {
            return Err(CoreError::AuthenticationFailed);
        }
        let mut ck = [0u8; DEFAULT_KEY_SIZE];
        ck.copy_from_slice(&ck_vec);
        Ok(ck)
    }
}

fn clone_core_error(e: &CoreError) -> CoreError {
    match e {
        CoreError::InvalidRequest(s) => CoreError::InvalidRequest(s.clone()),
        CoreError::InvalidMasterKey(s) => CoreError::InvalidMasterKey(s.clone()),
        CoreError::VaultUnavailable(s) => CoreError::VaultUnavailable(s.clone()),
        CoreError::VaultCorrupt { expected, found } => {
            CoreError::VaultCorrupt { expected: *expected, found: *found }
        }
        CoreError::AuthenticationFailed => CoreError::AuthenticationFailed,
        CoreError::Cancelled => CoreError::Cancelled,
        CoreError::AlreadyClosed => CoreError::AlreadyClosed,
        CoreError::IoDurability { operation, code } => {
            CoreError::IoDurability { operation, code: *code }
        }
        CoreError::Io { phase, source } => CoreError::Io {
            phase: *phase,
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
    }
}

fn decode_master_key(mk_b64: &str) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(mk_b64.trim())
        .map_err(|e| CoreError::InvalidMasterKey(e.to_string()))?;
    match bytes.len() {
        16 | 24 | 32 => Ok(bytes),
        other => Err(CoreError::InvalidMasterKey(format!(
            "decoded key must be 16, 24, or 32 bytes, got {other}"
        ))),
    }
}

/// `fresh_nonce(12) || AEAD(key, plaintext, tag=16)`.
fn aead_wrap(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = aes_gcm::Nonce::from_slice(&nonce_bytes);

    let ciphertext = match key.len() {
        16 => {
            let cipher = Aes128Gcm::new_from_slice(key)
                .map_err(|_| CoreError::InvalidMasterKey("bad key length".into()))?;
            cipher
                .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
                .map_err(|_| CoreError::AuthenticationFailed)?
        }
        24 => {
            let cipher = Aes192Gcm::new_from_slice(key)
                .map_err(|_| CoreError::InvalidMasterKey("bad key length".into()))?;
            cipher
                .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
                .map_err(|_| CoreError::AuthenticationFailed)?
        }
        32 => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CoreError::InvalidMasterKey("bad key length".into()))?;
            cipher
                .encrypt(nonce, Payload { msg: plaintext, aad: &[] })
                .map_err(|_| CoreError::AuthenticationFailed)?
        }
        _ => return Err(CoreError::InvalidMasterKey("unsupported key length".into())),
    };

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`aead_wrap`]: split `nonce || ciphertext || tag` and decrypt.
fn aead_unwrap(key: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CoreError::AuthenticationFailed);
    }
    let (nonce_bytes, ct) = wrapped.split_at(NONCE_SIZE);
    let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

    match key.len() {
        16 => {
            let cipher = Aes128Gcm::new_from_slice(key)
                .map_err(|_| CoreError::InvalidMasterKey("bad key length".into()))?;
            cipher
                .decrypt(nonce, Payload { msg: ct, aad: &[] })
                .map_err(|_| CoreError::AuthenticationFailed)
        }
        24 => {
            let cipher = Aes192Gcm::new_from_slice(key)
                .map_err(|_| CoreError::InvalidMasterKey("bad key length".into()))?;
            cipher
                .decrypt(nonce, Payload { msg: ct, aad: &[] })
                .map_err(|_| CoreError::AuthenticationFailed)
        }
        32 => {
            let cipher = Aes256Gcm::new_from_slice(key)
                .map_err(|_| CoreError::InvalidMasterKey("bad key length".into()))?;
            cipher
                .decrypt(nonce, Payload { msg: ct, aad: &[] })
                .map_err(|_| CoreError::AuthenticationFailed)
        }
        _ => Err(CoreError::InvalidMasterKey("unsupported key length".into())),
    }
}

async fn load_or_generate_ssk(config: &Config) -> Result<Ssk> {
    let path = config.key_file_path();
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            if bytes.len() != SYSTEM_SECURITY_KEY_BYTES {
                return Err(CoreError::VaultCorrupt {
                    expected: SYSTEM_SECURITY_KEY_BYTES,
                    found: bytes.len(),
                });
            }
            let mut raw = [0u8; SYSTEM_SECURITY_KEY_BYTES];
            raw.copy_from_slice(&bytes);
            Ok(Ssk(raw))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => generate_and_persist_ssk(config).await,
        Err(e) => Err(CoreError::VaultUnavailable(e.to_string())),
    }
}

async fn generate_and_persist_ssk(config: &Config) -> Result<Ssk> {
    tokio::fs::create_dir_all(config.vault_dir())
        .await
        .map_err(|e| CoreError::VaultUnavailable(e.to_string()))?;

    let mut seed = [0u8; 32];
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    OsRng.fill_bytes(&mut salt);

    let mut raw = [0u8; SYSTEM_SECURITY_KEY_BYTES];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(&seed, &salt, config.pbkdf2_iterations, &mut raw);
    seed.zeroize();
    salt.zeroize();

    let path = config.key_file_path();
    let mut stream = PlatformDirectStream::create_write(&path).await?;
    stream.write_all(&raw).await?;
    stream.flush().await?;
    stream.close().await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        let _ = tokio::fs::set_permissions(&path, perms).await;
    }

    Ok(Ssk(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tempfile::tempdir;

    fn mk_b64(len: usize) -> String {
        let bytes = vec![0x42u8; len];
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trip() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let ck = [9u8; DEFAULT_KEY_SIZE];
        let mk = mk_b64(32);

        let wck = vault.encrypt_key(&ck, &mk).await.unwrap();
        assert_eq!(wck.len(), crate::config::FINAL_ENCRYPTED_KEY_SIZE);

        let recovered = vault.decrypt_key(&wck, &mk).await.unwrap();
        assert_eq!(recovered, ck);
    }

    #[tokio::test]
    async fn wrong_master_key_fails_authentication() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let ck = [1u8; DEFAULT_KEY_SIZE];
        let wck = vault.encrypt_key(&ck, &mk_b64(32)).await.unwrap();

        let err = vault.decrypt_key(&wck, &mk_b64(16)).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn ssk_is_memoised_across_calls() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let ck = [5u8; DEFAULT_KEY_SIZE];
        let mk = mk_b64(32);

        let wck_a = vault.encrypt_key(&ck, &mk).await.unwrap();
        let wck_b = vault.encrypt_key(&ck, &mk).await.unwrap();
        // Different nonces each time, but both must unwrap under the same SSK.
        assert_eq!(vault.decrypt_key(&wck_a, &mk).await.unwrap(), ck);
        assert_eq!(vault.decrypt_key(&wck_b, &mk).await.unwrap(), ck);
    }

    #[tokio::test]
    async fn corrupt_ssk_file_is_detected() {
        let dir = tempdir().unwrap();
        let cfg = Config::with_base_dir(dir.path());
        tokio::fs::create_dir_all(cfg.vault_dir()).await.unwrap();
        tokio::fs::write(cfg.key_file_path(), vec![0u8; 10]).await.unwrap();

        let vault = VaultService::new(cfg);
        let err = vault.encrypt_key(&[0u8; DEFAULT_KEY_SIZE], &mk_b64(32)).await.unwrap_err();
        assert!(matches!(err, CoreError::VaultCorrupt { .. }));
    }
}
