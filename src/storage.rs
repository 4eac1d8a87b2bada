//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Orchestrates chunked AEAD encryption/decryption of file bodies and the
//! header (`WCK || FN`) that precedes them.

use aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, KeyInit};
use rand::RngCore;
use rand_core::OsRng;
use tokio_util::sync::CancellationToken;
use zeroize::{Zeroize, Zeroizing};

use crate::buffer_pool;
use crate::config::{Config, DEFAULT_KEY_SIZE, FINAL_ENCRYPTED_KEY_SIZE, TAG_SIZE};
use crate::direct_stream::{DirectStream, PlatformDirectStream};
use crate::error::{CoreError, IoPhase, Result};
use crate::hash_provider;
use crate::nonce::{self, FILE_NONCE_SIZE};
use crate::request::FileProcessingRequest;
use crate::vault::VaultService;

/// Orchestrates chunked encryption/decryption over [`DirectStream`]s, using
/// a [`VaultService`] for content-key wrap/unwrap.
#[derive(Clone)]
pub struct StorageService {
    vault: VaultService,
    config: Config,
}

impl StorageService {
    pub fn new(vault: VaultService, config: Config) -> Self {
        Self { vault, config }
    }

    /// Encrypt `req.source_path` into `req.destination_path`.
    pub async fn encrypt(
        &self,
        req: &FileProcessingRequest,
        mk_b64: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let mut ck = [0u8; DEFAULT_KEY_SIZE];
        OsRng.fill_bytes(&mut ck);

        let wck = match self.vault.encrypt_key(&ck, mk_b64).await {
            Ok(wck) => wck,
            Err(e) => {
                ck.zeroize();
                return Err(e);
            }
        };

        let mut file_nonce = [0u8; FILE_NONCE_SIZE];
        OsRng.fill_bytes(&mut file_nonce);

        let result = self.encrypt_body(req, &ck, &wck, &file_nonce, cancel).await;
        ck.zeroize();
        file_nonce.zeroize();
        result
    }

    async fn encrypt_body(
        &self,
        req: &FileProcessingRequest,
        ck: &[u8; DEFAULT_KEY_SIZE],
        wck: &[u8],
        file_nonce: &[u8; FILE_NONCE_SIZE],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut src = PlatformDirectStream::open_read(&req.source_path).await?;
        let mut dst = PlatformDirectStream::create_write(&req.destination_path).await?;

        let result = async {
            dst.write_all(wck).await?;
            dst.write_all(file_nonce).await?;
            dst.flush().await?;
            check_cancelled(cancel)?;

            let provider = hash_provider::current();
            let salt = nonce::precompute_salt(provider, file_nonce);
            let cipher = Aes256Gcm::new_from_slice(ck)
                .map_err(|_| CoreError::InvalidRequest("content key must be 32 bytes".into()))?;

            let mut idx: i64 = 0;
            loop {
                check_cancelled(cancel)?;

                let mut plain = buffer_pool::rent(self.config.buffer_size);
                let n = read_fill(&mut src, &mut plain).await?;
                if n == 0 {
                    break;
                }

                let mut ct = buffer_pool::rent(n);
                ct.copy_from_slice(&plain[..n]);
                drop(plain);

                let chunk_nonce = nonce::derive(provider, &salt, idx);
                let tag = encrypt_chunk(&cipher, &chunk_nonce, &mut ct)?;

                dst.write_all(&tag).await?;
                dst.write_all(&ct).await?;
                dst.flush().await?;

                idx += 1;
            }
            Ok(())
        }
        .await;

        finish_streams(src, dst, result).await
    }

    /// Decrypt `req.source_path` into `req.destination_path`.
    pub async fn decrypt(
        &self,
        req: &FileProcessingRequest,
        mk_b64: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;

        let mut src = PlatformDirectStream::open_read(&req.source_path).await?;
        let mut dst = PlatformDirectStream::create_write(&req.destination_path).await?;

        let result = async {
            let mut wck = vec![0u8; FINAL_ENCRYPTED_KEY_SIZE];
            read_header_field(&mut src, &mut wck, "wrapped content key").await?;

            let mut file_nonce = [0u8; FILE_NONCE_SIZE];
            read_header_field(&mut src, &mut file_nonce, "file nonce").await?;

            check_cancelled(cancel)?;
            // `ck` is held in a `Zeroizing` guard rather than zeroized by an
            // explicit call placed after the `?`s below, so a `Cancelled`
            // return from the next check (or any other early exit) still
            // wipes the raw content key instead of leaving it live on unwind.
            let ck = Zeroizing::new(self.vault.decrypt_key(&wck, mk_b64).await?);
            wck.zeroize();
            check_cancelled(cancel)?;

            let provider = hash_provider::current();
            let salt = nonce::precompute_salt(provider, &file_nonce);
            let cipher = Aes256Gcm::new_from_slice(&ck).map_err(|_| CoreError::AuthenticationFailed)?;

            let body_result =
                decrypt_body(&mut src, &mut dst, provider, &salt, &cipher, self.config.buffer_size, cancel)
                    .await;
            file_nonce.zeroize();
            body_result
        }
        .await;

        finish_streams(src, dst, result).await
    }
}

async fn decrypt_body(
    src: &mut PlatformDirectStream,
    dst: &mut PlatformDirectStream,
    provider: &dyn hash_provider::HashProvider,
    salt: &nonce::NonceSalt,
    cipher: &Aes256Gcm,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut idx: i64 = 0;
    loop {
        check_cancelled(cancel)?;

        let mut tag = [0u8; TAG_SIZE];
        let tag_read = read_fill(src, &mut tag).await?;
        if tag_read < TAG_SIZE {
            // Short read on a chunk tag is treated as a clean end of stream,
            // not an error — see DESIGN.md Open Question 2.
            break;
        }

        let mut ct = buffer_pool::rent(buffer_size);
        let ct_read = read_fill(src, &mut ct).await?;
        if ct_read == 0 {
            break;
        }
        let ct_slice = &mut ct[..ct_read];

        let chunk_nonce = nonce::derive(provider, salt, idx);
        decrypt_chunk(cipher, &chunk_nonce, &tag, ct_slice)?;

        dst.write_all(ct_slice).await?;
        dst.flush().await?;

        idx += 1;
    }
    Ok(())
}

fn encrypt_chunk(cipher: &Aes256Gcm, nonce: &[u8; 12], buf: &mut [u8]) -> Result<[u8; TAG_SIZE]> {
    let nonce = aes_gcm::Nonce::from_slice(nonce);
    let tag = cipher
        .encrypt_in_place_detached(nonce, b"", buf)
        .map_err(|_| CoreError::AuthenticationFailed)?;
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn decrypt_chunk(cipher: &Aes256Gcm, nonce: &[u8; 12], tag: &[u8; TAG_SIZE], buf: &mut [u8]) -> Result<()> {
    let nonce = aes_gcm::Nonce::from_slice(nonce);
    let tag = aes_gcm::Tag::from_slice(tag);
    cipher
        .decrypt_in_place_detached(nonce, b"", buf, tag)
        .map_err(|_| CoreError::AuthenticationFailed)
}

/// Read until `buf` is full or the stream is exhausted, looping over
/// short `read` calls — a single `read` is not guaranteed to fill `buf`.
async fn read_fill(stream: &mut impl DirectStream, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = stream.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Read a fixed-size header field; a short read here is a hard error,
/// unlike the "short tag read means EOF" policy in the chunk loop.
async fn read_header_field(stream: &mut impl DirectStream, buf: &mut [u8], label: &str) -> Result<()> {
    let n = read_fill(stream, buf).await?;
    if n != buf.len() {
        return Err(CoreError::Io {
            phase: IoPhase::Read,
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, format!("truncated {label}")),
        });
    }
    Ok(())
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Close both streams regardless of outcome, preferring the original
/// pipeline error over a close-time error if both occur.
async fn finish_streams(
    mut src: PlatformDirectStream,
    mut dst: PlatformDirectStream,
    result: Result<()>,
) -> Result<()> {
    let _ = src.close().await;
    let close_result = dst.close().await;
    result.and(close_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tempfile::tempdir;

    fn mk_b64() -> String {
        base64::engine::general_purpose::STANDARD.encode([0x11u8; 32])
    }

    async fn round_trip(plaintext: &[u8]) {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let storage = StorageService::new(vault, Config::with_base_dir(dir.path()));
        let cancel = CancellationToken::new();

        let src_path = dir.path().join("plain.bin");
        let enc_path = dir.path().join("sealed.bin");
        let dec_path = dir.path().join("roundtrip.bin");
        tokio::fs::write(&src_path, plaintext).await.unwrap();

        let req = FileProcessingRequest::new("f", &src_path, &enc_path).unwrap();
        storage.encrypt(&req, &mk_b64(), &cancel).await.unwrap();

        let req2 = FileProcessingRequest::new("f", &enc_path, &dec_path).unwrap();
        storage.decrypt(&req2, &mk_b64(), &cancel).await.unwrap();

        let recovered = tokio::fs::read(&dec_path).await.unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[tokio::test]
    async fn empty_file_round_trips() {
        round_trip(&[]).await;
    }

    #[tokio::test]
    async fn exact_one_chunk_round_trips() {
        round_trip(&vec![0x41u8; crate::config::BUFFER_SIZE]).await;
    }

    #[tokio::test]
    async fn two_chunks_short_tail_round_trips() {
        round_trip(&vec![0x5au8; 100_000]).await;
    }

    #[tokio::test]
    async fn sealed_file_size_matches_header_plus_chunks() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let storage = StorageService::new(vault, Config::with_base_dir(dir.path()));
        let cancel = CancellationToken::new();

        let src_path = dir.path().join("plain.bin");
        let enc_path = dir.path().join("sealed.bin");
        tokio::fs::write(&src_path, &[]).await.unwrap();

        let req = FileProcessingRequest::new("f", &src_path, &enc_path).unwrap();
        storage.encrypt(&req, &mk_b64(), &cancel).await.unwrap();

        let meta = tokio::fs::metadata(&enc_path).await.unwrap();
        assert_eq!(meta.len(), 100);
    }

    #[tokio::test]
    async fn tampered_tag_fails_authentication_before_any_plaintext_write() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let storage = StorageService::new(vault, Config::with_base_dir(dir.path()));
        let cancel = CancellationToken::new();

        let src_path = dir.path().join("plain.bin");
        let enc_path = dir.path().join("sealed.bin");
        let dec_path = dir.path().join("roundtrip.bin");
        tokio::fs::write(&src_path, vec![0x7eu8; 1000]).await.unwrap();

        let req = FileProcessingRequest::new("f", &src_path, &enc_path).unwrap();
        storage.encrypt(&req, &mk_b64(), &cancel).await.unwrap();

        let mut sealed = tokio::fs::read(&enc_path).await.unwrap();
        sealed[100] ^= 0x01; // first chunk tag, byte 0

        tokio::fs::write(&enc_path, &sealed).await.unwrap();

        let req2 = FileProcessingRequest::new("f", &enc_path, &dec_path).unwrap();
        let err = storage.decrypt(&req2, &mk_b64(), &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationFailed));

        let out = tokio::fs::read(&dec_path).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn wrong_master_key_fails_authentication() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let storage = StorageService::new(vault, Config::with_base_dir(dir.path()));
        let cancel = CancellationToken::new();

        let src_path = dir.path().join("plain.bin");
        let enc_path = dir.path().join("sealed.bin");
        let dec_path = dir.path().join("roundtrip.bin");
        tokio::fs::write(&src_path, vec![0x01u8; 500]).await.unwrap();

        let req = FileProcessingRequest::new("f", &src_path, &enc_path).unwrap();
        storage.encrypt(&req, &mk_b64(), &cancel).await.unwrap();

        let other_mk = base64::engine::general_purpose::STANDARD.encode([0x22u8; 32]);
        let req2 = FileProcessingRequest::new("f", &enc_path, &dec_path).unwrap();
        let err = storage.decrypt(&req2, &other_mk, &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn cancellation_observed_before_any_stream_is_opened() {
        let dir = tempdir().unwrap();
        let vault = VaultService::new(Config::with_base_dir(dir.path()));
        let storage = StorageService::new(vault, Config::with_base_dir(dir.path()));

        let src_path = dir.path().join("plain.bin");
        let enc_path = dir.path().join("sealed.bin");
        tokio::fs::write(&src_path, vec![0x01u8; 500]).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let req = FileProcessingRequest::new("f", &src_path, &enc_path).unwrap();
        let err = storage.encrypt(&req, &mk_b64(), &cancel).await.unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(!enc_path.exists());
    }
}
