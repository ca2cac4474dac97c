//! `si vault`: scope-namespaced secrets in sun

use crate::output::{self, AlreadyReported};
use anyhow::Context;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;
use si_config::Settings;
use si_sun::SunClient;
use si_vault::{
    DotenvFile, KvStore, PUBLIC_KEY_NAME, VaultError, VaultTarget, collect_status, decrypt_value,
    encrypt_value, ensure_identity, is_encrypted, load_identity, normalize_value, plain_value,
    render_value, resolve_backend, resolve_target, resolve_values, rotate_identity,
    validate_key_name,
};
use std::io::Read;
use std::path::{Path, PathBuf};

const SOURCE: &str = "si-cli";

#[derive(Args, Debug, Clone)]
pub struct VaultArgs {
    /// Vault scope, e.g. `default` or `acme/prod`
    #[arg(long, global = true)]
    pub scope: Option<String>,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: VaultCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum VaultCommands {
    /// Identity, backend and key summary for the scope
    Status,
    /// Encrypt and store a value
    Set {
        key: String,
        /// Value; omit with --stdin
        #[arg(required_unless_present = "stdin", conflicts_with = "stdin")]
        value: Option<String>,
        /// Read the value from stdin
        #[arg(long)]
        stdin: bool,
    },
    /// Tombstone a key
    Unset { key: String },
    /// Show a key; the plain value only with --reveal
    Get {
        key: String,
        #[arg(long)]
        reveal: bool,
    },
    /// Keys of the scope
    List {
        /// Include tombstoned keys
        #[arg(long)]
        all: bool,
    },
    /// Revisions of a key, newest first
    History {
        key: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Encrypt plaintext values of a dotenv file in place
    Encrypt {
        #[arg(long, default_value = ".env")]
        file: PathBuf,
    },
    /// Print a dotenv file with encrypted values decrypted
    Decrypt {
        #[arg(long, default_value = ".env")]
        file: PathBuf,
    },
    /// Mirror a dotenv file into the scope (keys missing locally are tombstoned)
    Push {
        #[arg(long, default_value = ".env")]
        file: PathBuf,
    },
    /// Run a command with the scope's values in its environment
    Run {
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Rotate the vault identity (old keys stay as backups)
    Keygen {
        /// Re-encrypt every stored value to the new key
        #[arg(long)]
        reencrypt: bool,
    },
    /// Effective sync backend
    Backend,
}

pub async fn handle(args: VaultArgs, settings: &Settings) -> anyhow::Result<()> {
    let target = resolve_target(settings, args.scope.as_deref().unwrap_or_default())?;

    match &args.command {
        VaultCommands::Status => {
            let status = collect_status(settings, &target).await?;
            if args.json {
                output::print_json(&status)?;
            } else {
                println!("{}", status.render_text());
            }
            if !status.is_ok() {
                return Err(AlreadyReported.into());
            }
            Ok(())
        }
        VaultCommands::Backend => {
            let backend = resolve_backend(settings)?;
            if args.json {
                output::print_json(&json!({
                    "mode": backend.mode.as_str(),
                    "source": backend.source,
                    "sun_backup_enabled": backend.sun_backup_enabled(),
                    "sun_backup_strict": backend.sun_backup_strict(),
                }))
            } else {
                println!("backend: {} ({})", backend.mode, backend.source);
                Ok(())
            }
        }
        VaultCommands::Encrypt { file } => encrypt_file(settings, file, args.json).await,
        VaultCommands::Decrypt { file } => decrypt_file(settings, file).await,
        command => {
            target.guard_repo_scope()?;
            let client = SunClient::from_settings(settings)?;
            let store = KvStore::new(&client, &target);
            handle_store(command, &client, &store, &target, args.json).await
        }
    }
}

async fn handle_store(
    command: &VaultCommands,
    client: &SunClient,
    store: &KvStore<'_>,
    target: &VaultTarget,
    as_json: bool,
) -> anyhow::Result<()> {
    match command {
        VaultCommands::Set { key, value, stdin } => {
            validate_key_name(key)?;
            let value = match value {
                Some(value) => value.clone(),
                None if *stdin => read_stdin()?,
                None => return Err(anyhow::anyhow!("a value or --stdin is required")),
            };
            let identity = ensure_identity(client, SOURCE).await?;
            let ciphertext = encrypt_value(&value, &identity.recipients())?;
            let revision = store.put_raw(key, &ciphertext, SOURCE).await?;
            if as_json {
                output::print_json(&json!({
                    "scope": target.scope,
                    "key": key,
                    "revision": revision,
                    "encrypted": true,
                }))
            } else {
                output::success(format!("{} set in {} (revision {})", key, target.scope, revision));
                Ok(())
            }
        }
        VaultCommands::Unset { key } => {
            let removed = store.unset(key, SOURCE).await?;
            if as_json {
                return output::print_json(&json!({"scope": target.scope, "key": key, "removed": removed}));
            }
            if removed {
                output::success(format!("{} unset in {}", key, target.scope));
            } else {
                println!("{} is not set in {}", key, target.scope);
            }
            Ok(())
        }
        VaultCommands::Get { key, reveal } => {
            validate_key_name(key)?;
            let raw = store
                .get_raw(key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("{} is not set in {}", key, target.scope))?;
            let encrypted = normalize_value(&raw).is_ok_and(|v| is_encrypted(&v));
            if !reveal {
                if as_json {
                    return output::print_json(&json!({"key": key, "encrypted": encrypted}));
                }
                let state = if encrypted { "encrypted".green() } else { "plaintext".yellow() };
                println!("{}: {} (pass --reveal to print the value)", key, state);
                return Ok(());
            }
            let identity = if encrypted {
                Some(load_identity(client).await?)
            } else {
                None
            };
            let plain = plain_value(&raw, identity.as_ref())?;
            if as_json {
                output::print_json(&json!({"key": key, "encrypted": encrypted, "value": plain}))
            } else {
                println!("{plain}");
                Ok(())
            }
        }
        VaultCommands::List { all } => {
            let entries: Vec<_> = store
                .entries()
                .await?
                .into_iter()
                .filter(|e| *all || !e.deleted)
                .collect();
            if as_json {
                let rows: Vec<_> = entries
                    .iter()
                    .map(|e| {
                        json!({
                            "key": e.key,
                            "deleted": e.deleted,
                            "revision": e.revision,
                            "operation": e.operation,
                            "changed_at": e.changed_at,
                            "source": e.source,
                        })
                    })
                    .collect();
                return output::print_json(&rows);
            }
            if entries.is_empty() {
                println!("No keys in {}", target.scope);
                return Ok(());
            }
            println!(
                "{}",
                format!("{:<32} {:>5} {:<8} {}", "KEY", "REV", "OP", "CHANGED").bold()
            );
            for entry in &entries {
                let key = if entry.deleted {
                    entry.key.dimmed().to_string()
                } else {
                    entry.key.clone()
                };
                println!(
                    "{:<32} {:>5} {:<8} {}",
                    key, entry.revision, entry.operation, entry.changed_at
                );
            }
            Ok(())
        }
        VaultCommands::History { key, limit } => {
            let revisions = store.history(key, *limit).await?;
            if as_json {
                return output::print_json(&revisions);
            }
            if revisions.is_empty() {
                println!("No history for {}", key);
                return Ok(());
            }
            println!("{}", format!("{:>5} {:<8} {}", "REV", "OP", "CREATED").bold());
            for revision in &revisions {
                let op = revision
                    .metadata
                    .get("operation")
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                println!("{:>5} {:<8} {}", revision.revision, op, revision.created_at);
            }
            Ok(())
        }
        VaultCommands::Push { file } => {
            let doc = DotenvFile::read(file).with_context(|| format!("reading {}", file.display()))?;
            let result = store.mirror(&doc, SOURCE).await?;
            if as_json {
                output::print_json(&json!({
                    "scope": target.scope,
                    "pushed": result.pushed,
                    "tombstoned": result.tombstoned,
                }))
            } else {
                output::success(format!(
                    "{}: {} pushed, {} tombstoned",
                    target.scope, result.pushed, result.tombstoned
                ));
                Ok(())
            }
        }
        VaultCommands::Run { command } => {
            let pairs = resolve_values(client, store, false).await?;
            tracing::debug!(scope = target.scope.as_str(), keys = pairs.len(), "running with vault env");
            let (program, rest) = command
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("no command given"))?;
            let status = tokio::process::Command::new(program)
                .args(rest)
                .envs(pairs)
                .status()
                .await
                .with_context(|| format!("failed to start {program}"))?;
            match status.code() {
                Some(0) => Ok(()),
                code => std::process::exit(code.unwrap_or(1)),
            }
        }
        VaultCommands::Keygen { reencrypt } => {
            let identity = rotate_identity(client, SOURCE).await?;
            let reencrypted = if *reencrypt {
                store.reencrypt(&identity, SOURCE).await?
            } else {
                0
            };
            if as_json {
                output::print_json(&json!({
                    "recipient": identity.recipient().to_string(),
                    "backup_keys": identity.backup_count(),
                    "reencrypted": reencrypted,
                }))
            } else {
                output::success(format!("rotated vault identity: {}", identity.recipient()));
                output::print_fields(&[
                    ("backup_keys", identity.backup_count().to_string()),
                    ("reencrypted", reencrypted.to_string()),
                ]);
                Ok(())
            }
        }
        VaultCommands::Status
        | VaultCommands::Backend
        | VaultCommands::Encrypt { .. }
        | VaultCommands::Decrypt { .. } => Ok(()),
    }
}

fn read_stdin() -> anyhow::Result<String> {
    let mut value = String::new();
    std::io::stdin()
        .read_to_string(&mut value)
        .context("reading value from stdin")?;
    Ok(value.trim_end_matches(['\r', '\n']).to_string())
}

/// Encrypt every plaintext value of `path` in place.
async fn encrypt_file(settings: &Settings, path: &Path, as_json: bool) -> anyhow::Result<()> {
    let mut doc = DotenvFile::read(path).with_context(|| format!("reading {}", path.display()))?;
    let client = SunClient::from_settings(settings)?;
    let identity = ensure_identity(&client, SOURCE).await?;
    let recipients = identity.recipients();

    let mut encrypted = 0;
    for entry in doc.entries()? {
        if entry.key == PUBLIC_KEY_NAME {
            continue;
        }
        let plain = normalize_value(&entry.value_raw)
            .map_err(|message| VaultError::Dotenv { line: entry.line + 1, message })?;
        if plain.is_empty() || is_encrypted(&plain) {
            continue;
        }
        let ciphertext = encrypt_value(&plain, &recipients)?;
        if doc.replace_at(entry.line, &ciphertext) {
            encrypted += 1;
        }
    }
    let header_changed = doc.ensure_public_key_header(&identity.recipient().to_string());
    if encrypted > 0 || header_changed {
        doc.write_atomic(path)?;
    }
    if as_json {
        output::print_json(&json!({"file": path.display().to_string(), "encrypted": encrypted}))
    } else {
        output::success(format!("{}: {} value(s) encrypted", path.display(), encrypted));
        Ok(())
    }
}

/// Decrypted rendering of `path` on stdout. The file is left untouched.
async fn decrypt_file(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let mut doc = DotenvFile::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut identities = None;
    for entry in doc.entries()? {
        let value = normalize_value(&entry.value_raw)
            .map_err(|message| VaultError::Dotenv { line: entry.line + 1, message })?;
        if !is_encrypted(&value) {
            continue;
        }
        if identities.is_none() {
            let client = SunClient::from_settings(settings)?;
            identities = Some(load_identity(&client).await?.identities());
        }
        let plain = decrypt_value(&value, identities.as_deref().unwrap_or_default())?;
        doc.replace_at(entry.line, &render_value(&plain));
    }
    print!("{}", doc.render());
    Ok(())
}
