use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::hex;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wallet_core::crypto::{hash_password, open_secret, seal_secret, verify_password};
use wallet_core::paths::{config_path, data_dir, database_path};
use wallet_core::{
    EvmChainReader, HttpRemoteStore, LocalStore, OwnershipEngine, RemoteStore, SecretMaterial,
    SyncCoordinator, WalletAddress, WalletConfig, WalletError, WalletRecord,
};
use zeroize::Zeroizing;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Local-first wallet store with remote sync and device NFT lookup",
    long_about = None
)]
struct Cli {
    /// Directory holding wallet.db and config.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new wallet and seal its key with a password
    Create {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Import an existing private key
    Import {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Show a stored wallet (secrets are never printed)
    Show { address: String },
    /// Resolve a username or email to a wallet address
    Resolve { identifier: String },
    /// Check the password and unseal the stored key
    Verify { address: String },
    /// List device NFTs currently owned by an address
    Assets { address: String },
    /// Probe the remote store
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = match cli.data_dir {
        Some(dir) => dir,
        None => data_dir()?,
    };
    let config = WalletConfig::load(&config_path(&data))?;

    match cli.command {
        Commands::Assets { address } => assets_command(&config, &address).await,
        Commands::Health => health_command(&config).await,
        command => {
            let result = match open_coordinator(&data, &config) {
                Ok(sync) => {
                    let result = run_with_store(&sync, command).await;
                    // Background syncs get their single attempt before the process exits.
                    sync.drain().await;
                    result
                }
                Err(err) => Err(err),
            };
            if let Some(err) = result.as_ref().err().and_then(|e| e.downcast_ref::<WalletError>()) {
                if err.is_local() {
                    error!(data_dir = %data.display(), error = %err, "local wallet store failed");
                }
            }
            result
        }
    }
}

fn open_coordinator(data: &std::path::Path, config: &WalletConfig) -> Result<SyncCoordinator> {
    let local = LocalStore::open(&database_path(data))
        .with_context(|| format!("open local store in {}", data.display()))?;
    let remote = HttpRemoteStore::new(config)?;
    Ok(SyncCoordinator::new(
        Arc::new(local),
        Arc::new(remote),
        config.remote_timeout(),
    ))
}

async fn run_with_store(sync: &SyncCoordinator, command: Commands) -> Result<()> {
    match command {
        Commands::Create { username, email } => {
            let signer = PrivateKeySigner::random();
            store_new_wallet(sync, signer, username, email).await
        }
        Commands::Import { username, email } => {
            let key = prompt_secret("WALLET_PRIVATE_KEY", "Private key: ")?;
            let signer = PrivateKeySigner::from_str(key.trim())
                .map_err(|e| anyhow!("invalid private key: {e}"))?;
            store_new_wallet(sync, signer, username, email).await
        }
        Commands::Show { address } => show_command(sync, &address).await,
        Commands::Resolve { identifier } => {
            match sync.resolve_identifier(&identifier).await? {
                Some(address) => println!("{address}"),
                None => println!("not found"),
            }
            Ok(())
        }
        Commands::Verify { address } => verify_command(sync, &address).await,
        Commands::Assets { .. } | Commands::Health => Ok(()),
    }
}

async fn store_new_wallet(
    sync: &SyncCoordinator,
    signer: PrivateKeySigner,
    username: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let address = WalletAddress::from(signer.address());
    let secret = Zeroizing::new(format!("0x{}", hex::encode(signer.to_bytes())));
    let password = prompt_password_twice()?;

    let sealed = seal_secret(&secret, &password)?;
    let mut record =
        WalletRecord::new(address).with_encrypted_secret(sealed.encrypted_key, sealed.iv);
    record.password_hash = Some(hash_password(&password)?);
    record.username = username.clone();
    record.email = email.clone();

    sync.put_wallet(record).await?;
    let mappings = sync
        .put_identity_mapping(username.as_deref(), email.as_deref(), &address)
        .await?;
    info!(address = %address, mappings = mappings.len(), "wallet stored");
    println!("{address}");
    Ok(())
}

async fn show_command(sync: &SyncCoordinator, address: &str) -> Result<()> {
    let address = WalletAddress::parse(address)?;
    let Some(record) = sync.get_wallet(&address).await? else {
        println!("not found");
        return Ok(());
    };
    let secret = match record.secret() {
        Some(SecretMaterial::Plaintext(_)) => "plaintext",
        Some(SecretMaterial::Encrypted { .. }) => "encrypted",
        None => "none",
    };
    let identities: Vec<_> = sync
        .mappings_for(&address)?
        .into_iter()
        .map(|m| json!({"identifier": m.identifier, "type": m.kind.as_str()}))
        .collect();
    let view = json!({
        "address": record.address,
        "secret": secret,
        "passwordHash": record.password_hash.is_some(),
        "username": record.username,
        "email": record.email,
        "createdAt": record.created_at.to_rfc3339(),
        "updatedAt": record.updated_at.to_rfc3339(),
        "identities": identities,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn verify_command(sync: &SyncCoordinator, address: &str) -> Result<()> {
    let address = WalletAddress::parse(address)?;
    let record = sync
        .get_wallet(&address)
        .await?
        .ok_or_else(|| anyhow!("wallet {address} not found"))?;

    let key = match record.secret() {
        None => bail!("wallet {address} has no stored key"),
        Some(SecretMaterial::Plaintext(key)) => Zeroizing::new(key.to_string()),
        Some(SecretMaterial::Encrypted { encrypted_key, iv }) => {
            let password = prompt_password_once()?;
            if let Some(hash) = &record.password_hash {
                if !verify_password(&password, hash)? {
                    bail!("password does not match");
                }
            }
            open_secret(encrypted_key, iv, &password)?
        }
    };

    let signer = PrivateKeySigner::from_str(key.trim())
        .map_err(|e| anyhow!("stored key is unreadable: {e}"))?;
    if !address.matches(&signer.address()) {
        bail!("stored key belongs to {}, not {address}", signer.address());
    }
    println!("verified {address}");
    Ok(())
}

async fn assets_command(config: &WalletConfig, address: &str) -> Result<()> {
    let reader = EvmChainReader::new(config)?;
    let engine = OwnershipEngine::new(Arc::new(reader), config.max_enumerated_tokens);
    let outcome = engine.reconcile(address).await?;
    if !outcome.diagnostics.is_empty() {
        info!(
            skipped = outcome.diagnostics.len(),
            "some chain lookups failed; result is partial"
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome.assets)?);
    Ok(())
}

async fn health_command(config: &WalletConfig) -> Result<()> {
    let remote = HttpRemoteStore::new(config)?;
    remote
        .health()
        .await
        .with_context(|| format!("remote store at {}", config.api_base_url))?;
    println!("remote store reachable at {}", config.api_base_url);
    Ok(())
}

fn prompt_secret(env_key: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(env_key) {
        if !value.is_empty() {
            return Ok(Zeroizing::new(value));
        }
    }
    let value = rpassword::prompt_password(prompt).map_err(|e| anyhow!("prompt: {e}"))?;
    Ok(Zeroizing::new(value))
}

fn prompt_password_once() -> Result<Zeroizing<String>> {
    prompt_secret("WALLET_PASSWORD", "Wallet password: ")
}

fn ensure_password_len(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!("password too short; minimum {MIN_PASSWORD_LEN} characters");
    }
    Ok(())
}

fn prompt_password_twice() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("WALLET_PASSWORD") {
        if !pw.is_empty() {
            let pw = Zeroizing::new(pw);
            ensure_password_len(&pw)?;
            return Ok(pw);
        }
    }
    let first = prompt_password_once()?;
    ensure_password_len(&first)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if first != second {
        bail!("passwords do not match");
    }
    Ok(first)
}
