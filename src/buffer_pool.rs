//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

//! Process-wide pool of zeroed scratch buffers for plaintext/ciphertext
//! chunks. Every rent is paired with a return that zeroes the buffer
//! before it becomes reusable — callers never observe another call's
//! leftover bytes.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};
use zeroize::Zeroize;

/// Cap on how many idle buffers the pool retains; excess returns are dropped
/// (and still zeroed first) rather than growing the pool unbounded.
const MAX_IDLE_BUFFERS: usize = 32;

fn pool() -> &'static Mutex<Vec<Vec<u8>>> {
    static POOL: OnceLock<Mutex<Vec<Vec<u8>>>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(Vec::new()))
}

/// A rented, zero-filled buffer of at least `len` bytes. Zeroized and
/// returned to the process-wide pool on drop.
pub struct PooledBuffer {
    buf: Vec<u8>,
}

impl PooledBuffer {
    fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.buf.zeroize();
        let mut guard = pool().lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() < MAX_IDLE_BUFFERS {
            let buf = std::mem::take(&mut self.buf);
            guard.push(buf);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Rent a zero-filled buffer of exactly `len` bytes from the pool.
pub fn rent(len: usize) -> PooledBuffer {
    let mut guard = pool().lock().unwrap_or_else(|e| e.into_inner());
    let mut buf = guard
        .pop()
        .map(|mut b| {
            b.clear();
            b
        })
        .unwrap_or_default();
    drop(guard);
    buf.resize(len, 0);
    PooledBuffer::new(buf)
}
