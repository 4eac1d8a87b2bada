//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

use assert_cmd::Command;
use base64::Engine;
use predicates::prelude::*;

fn mk_b64() -> String {
    base64::engine::general_purpose::STANDARD.encode([0x5au8; 32])
}

#[test]
fn encrypt_then_decrypt_round_trips_through_the_binary() {
    let dir = assert_fs::TempDir::new().unwrap();
    let base_dir = dir.path().join("vaultroot");
    let src = dir.path().join("plain.bin");
    let sealed = dir.path().join("sealed.bin");
    let opened = dir.path().join("opened.bin");
    std::fs::write(&src, b"hello from the cli").unwrap();

    let mk = mk_b64();

    Command::cargo_bin("nexplock")
        .unwrap()
        .args(["--base-dir", base_dir.to_str().unwrap(), "encrypt"])
        .arg(&src)
        .arg(&sealed)
        .args(["--master-key", &mk])
        .assert()
        .success();

    assert!(sealed.exists());

    Command::cargo_bin("nexplock")
        .unwrap()
        .args(["--base-dir", base_dir.to_str().unwrap(), "decrypt"])
        .arg(&sealed)
        .arg(&opened)
        .args(["--master-key", &mk])
        .assert()
        .success();

    let recovered = std::fs::read(&opened).unwrap();
    assert_eq!(recovered, b"hello from the cli");
}

#[test]
fn encrypt_without_master_key_fails_with_a_clear_message() {
    let dir = assert_fs::TempDir::new().unwrap();
    let src = dir.path().join("plain.bin");
    let sealed = dir.path().join("sealed.bin");
    std::fs::write(&src, b"x").unwrap();

    Command::cargo_bin("nexplock")
        .unwrap()
        .arg("encrypt")
        .arg(&src)
        .arg(&sealed)
        .assert()
        .failure()
        .stderr(predicate::str::contains("master key"));
}

#[test]
fn inspect_header_reports_lengths_without_a_master_key() {
    let dir = assert_fs::TempDir::new().unwrap();
    let base_dir = dir.path().join("vaultroot");
    let src = dir.path().join("plain.bin");
    let sealed = dir.path().join("sealed.bin");
    std::fs::write(&src, b"some plaintext").unwrap();

    Command::cargo_bin("nexplock")
        .unwrap()
        .args(["--base-dir", base_dir.to_str().unwrap(), "encrypt"])
        .arg(&src)
        .arg(&sealed)
        .args(["--master-key", &mk_b64()])
        .assert()
        .success();

    Command::cargo_bin("nexplock")
        .unwrap()
        .arg("inspect-header")
        .arg(&sealed)
        .assert()
        .success()
        .stdout(predicate::str::contains("wck_len = 88"))
        .stdout(predicate::str::contains("body_len = 30"));
}
