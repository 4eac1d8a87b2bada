//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: trustedge — Privacy and trust at the edge.
//

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nexplock_core::config::{Config, FINAL_ENCRYPTED_KEY_SIZE};
use nexplock_core::{FileProcessingRequest, StorageService, VaultService};
use tokio_util::sync::CancellationToken;
use tracing::info;

const MASTER_KEY_ENV: &str = "NEXPLOCK_MASTER_KEY";

#[derive(Parser)]
#[command(name = "nexplock", about = "Chunked authenticated-encryption-at-rest core", version)]
struct Cli {
    /// Base directory the system key vault lives under.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a file in place of a new sealed file.
    Encrypt {
        source: PathBuf,
        destination: PathBuf,
        /// Base64 master key; falls back to NEXPLOCK_MASTER_KEY if omitted.
        #[arg(long)]
        master_key: Option<String>,
    },
    /// Decrypt a sealed file back to plaintext.
    Decrypt {
        source: PathBuf,
        destination: PathBuf,
        #[arg(long)]
        master_key: Option<String>,
    },
    /// Report the WCK/FN lengths of a sealed file's header without touching the vault.
    InspectHeader { path: PathBuf },
}

fn resolve_master_key(cli_value: Option<String>) -> anyhow::Result<String> {
    cli_value
        .or_else(|| std::env::var(MASTER_KEY_ENV).ok())
        .context("no master key provided: pass --master-key or set NEXPLOCK_MASTER_KEY")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.base_dir {
        Some(dir) => Config::with_base_dir(dir.clone()),
        None => Config::default(),
    };

    match cli.command {
        Command::Encrypt { source, destination, master_key } => {
            let mk = resolve_master_key(master_key)?;
            let file_id = destination.to_string_lossy().into_owned();
            let req = FileProcessingRequest::new(file_id, source, destination)?;
            let vault = VaultService::new(config.clone());
            let storage = StorageService::new(vault, config);
            let cancel = CancellationToken::new();
            storage.encrypt(&req, &mk, &cancel).await?;
            info!(path = %req.destination_path.display(), "encrypted file");
        }
        Command::Decrypt { source, destination, master_key } => {
            let mk = resolve_master_key(master_key)?;
            let file_id = destination.to_string_lossy().into_owned();
            let req = FileProcessingRequest::new(file_id, source, destination)?;
            let vault = VaultService::new(config.clone());
            let storage = StorageService::new(vault, config);
            let cancel = CancellationToken::new();
            storage.decrypt(&req, &mk, &cancel).await?;
            info!(path = %req.destination_path.display(), "decrypted file");
        }
        Command::InspectHeader { path } => {
            let bytes = tokio::fs::read(&path).await.context("reading sealed file")?;
            if bytes.len() < FINAL_ENCRYPTED_KEY_SIZE + 12 {
                bail!("file is too short to contain a valid header");
            }
            println!("wck_len = {FINAL_ENCRYPTED_KEY_SIZE}");
            println!("fn_len  = 12");
            println!("body_len = {}", bytes.len() - FINAL_ENCRYPTED_KEY_SIZE - 12);
        }
    }

    Ok(())
}
