//! `si sun`: account, tokens, audit and machines

use super::machine::{self, MachineCommands};
use crate::output::{self, AlreadyReported};
use anyhow::Context;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::json;
use si_config::Settings;
use si_sun::login::{DEFAULT_LOGIN_URL, is_headless};
use si_sun::{BrowserLogin, SunClient, split_csv};
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct SunArgs {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: SunCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SunCommands {
    /// Sign in, inspect or drop the stored sun credentials
    Auth {
        #[command(subcommand)]
        command: SunAuthCommands,
    },
    /// Check reachability and the stored token
    Doctor,
    /// API tokens of the account
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Audit trail of the account
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
    /// Machine registry and remote jobs
    Machine {
        #[command(subcommand)]
        command: MachineCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SunAuthCommands {
    /// Store a token, or sign in through the browser
    Login {
        /// Sun base URL
        #[arg(long, env = "SI_SUN_BASE_URL")]
        url: Option<String>,
        /// Existing API token; skips the browser flow
        #[arg(long, env = "SI_SUN_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Account slug to record
        #[arg(long)]
        account: Option<String>,
        /// Sign in with Google through the browser
        #[arg(long)]
        google: bool,
        /// Login start page
        #[arg(long, default_value = DEFAULT_LOGIN_URL)]
        login_url: String,
        /// Launch the login page instead of only printing it
        #[arg(long)]
        open_browser: bool,
        /// Seconds to wait for the browser callback
        #[arg(long, default_value_t = 120)]
        timeout_seconds: u64,
        /// Request timeout for sun calls, stored in settings
        #[arg(long)]
        request_timeout_seconds: Option<u64>,
    },
    /// Base URL and token identity
    Status,
    /// Forget the stored token
    Logout,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TokenCommands {
    List {
        /// Include revoked tokens
        #[arg(long)]
        include_revoked: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Issue a token; the secret is printed once
    Create {
        #[arg(long)]
        label: String,
        /// Comma-separated scopes
        #[arg(long, default_value = "")]
        scopes: String,
        /// Hours until expiry (0 = server default)
        #[arg(long, default_value_t = 0)]
        expires_in_hours: u32,
    },
    Revoke {
        token_id: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AuditCommands {
    List {
        #[arg(long, default_value = "")]
        action: String,
        #[arg(long, default_value = "")]
        kind: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

pub async fn handle(args: SunArgs, settings: &mut Settings) -> anyhow::Result<()> {
    match &args.command {
        SunCommands::Auth { command } => handle_auth(command, settings, args.json).await,
        SunCommands::Doctor => doctor(settings, args.json).await,
        SunCommands::Token { command } => handle_token(command, settings, args.json).await,
        SunCommands::Audit {
            command:
                AuditCommands::List {
                    action,
                    kind,
                    name,
                    limit,
                },
        } => {
            let client = SunClient::from_settings(settings)?;
            let events = client.list_audit_events(action, kind, name, *limit).await?;
            if args.json {
                return output::print_json(&events);
            }
            if events.is_empty() {
                println!("No audit events");
                return Ok(());
            }
            println!(
                "{}",
                format!(
                    "{:<22} {:<16} {:<24} {:<32} {:>5}",
                    "CREATED", "ACTION", "KIND", "NAME", "REV"
                )
                .bold()
            );
            for event in &events {
                println!(
                    "{:<22} {:<16} {:<24} {:<32} {:>5}",
                    event.created_at, event.action, event.kind, event.name, event.revision
                );
            }
            Ok(())
        }
        SunCommands::Machine { command } => machine::handle(command, settings, args.json).await,
    }
}

fn request_timeout(settings: &Settings) -> Duration {
    settings
        .sun
        .timeout_seconds
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or(si_sun::client::DEFAULT_TIMEOUT)
}

async fn handle_auth(command: &SunAuthCommands, settings: &mut Settings, as_json: bool) -> anyhow::Result<()> {
    match command {
        SunAuthCommands::Login {
            url,
            token,
            account,
            google,
            login_url,
            open_browser,
            timeout_seconds,
            request_timeout_seconds,
        } => {
            if let Some(seconds) = request_timeout_seconds {
                settings.sun.timeout_seconds = Some(*seconds);
            }
            let url = url.as_deref().map(str::trim).filter(|u| !u.is_empty());
            let token = token.as_deref().map(str::trim).filter(|t| !t.is_empty());

            let (base_url, token, mut account_slug, auto_sync) = match token {
                Some(token) if !google => {
                    let base_url = url
                        .map(str::to_string)
                        .unwrap_or_else(|| settings.sun.base_url.clone());
                    (base_url, token.to_string(), String::new(), settings.sun.auto_sync)
                }
                _ => {
                    let login = BrowserLogin::start(login_url).await?;
                    eprintln!("Open this URL to sign in:\n  {}", login.auth_url());
                    if *open_browser {
                        login.open();
                    } else if !is_headless() {
                        eprintln!("{}", "Pass --open-browser to launch it automatically.".dimmed());
                    }
                    let result = login.wait(Duration::from_secs(*timeout_seconds)).await?;
                    let base_url = [result.base_url.as_str(), url.unwrap_or_default(), settings.sun.base_url.as_str()]
                        .into_iter()
                        .map(str::trim)
                        .find(|u| !u.is_empty())
                        .unwrap_or_default()
                        .to_string();
                    (base_url, result.token, result.account, result.auto_sync)
                }
            };
            if base_url.trim().is_empty() {
                return Err(anyhow::anyhow!("sun base URL is required (--url or SI_SUN_BASE_URL)"));
            }

            let client = SunClient::new(&base_url, &token, request_timeout(settings))?;
            let whoami = client.whoami().await.context("verifying sun token")?;
            if let Some(account) = account.as_deref().filter(|a| !a.trim().is_empty()) {
                account_slug = account.trim().to_string();
            }
            if account_slug.is_empty() {
                account_slug = whoami.account_slug.clone();
            }

            settings.sun.base_url = client.base_url().to_string();
            settings.sun.token = token;
            settings.sun.account = account_slug.clone();
            settings.sun.auto_sync = auto_sync;
            settings.save()?;
            tracing::info!(base_url = client.base_url(), account = account_slug.as_str(), "sun login stored");

            if as_json {
                output::print_json(&json!({
                    "base_url": client.base_url(),
                    "account": account_slug,
                    "whoami": whoami,
                }))
            } else {
                output::success(format!(
                    "signed in to {} as {}",
                    client.base_url(),
                    account_slug.bold()
                ));
                Ok(())
            }
        }
        SunAuthCommands::Status => {
            let client = SunClient::from_settings(settings)?;
            let whoami = client.whoami().await?;
            if as_json {
                output::print_json(&json!({"base_url": client.base_url(), "whoami": whoami}))
            } else {
                output::print_fields(&[
                    ("base_url", client.base_url().to_string()),
                    ("account", whoami.account_slug.clone()),
                    ("token_id", whoami.token_id.clone()),
                    ("scopes", whoami.scopes.join(",")),
                ]);
                Ok(())
            }
        }
        SunAuthCommands::Logout => {
            let had_token = !settings.sun.token.is_empty();
            settings.sun.token.clear();
            settings.save()?;
            if as_json {
                output::print_json(&json!({"logged_out": had_token}))
            } else {
                if had_token {
                    output::success("sun token removed from settings");
                } else {
                    println!("No sun token stored");
                }
                Ok(())
            }
        }
    }
}

async fn doctor(settings: &Settings, as_json: bool) -> anyhow::Result<()> {
    let mut checks: Vec<(&str, bool, String)> = Vec::new();
    match SunClient::from_settings(settings) {
        Err(err) => checks.push(("config", false, err.to_string())),
        Ok(client) => {
            checks.push(("config", true, client.base_url().to_string()));
            match client.ready().await {
                Ok(()) => checks.push(("readyz", true, "ok".to_string())),
                Err(err) => checks.push(("readyz", false, err.to_string())),
            }
            match client.whoami().await {
                Ok(whoami) => checks.push(("whoami", true, whoami.account_slug)),
                Err(err) => checks.push(("whoami", false, err.to_string())),
            }
        }
    }
    let ok = checks.iter().all(|(_, passed, _)| *passed);

    if as_json {
        let rows: Vec<_> = checks
            .iter()
            .map(|(name, passed, detail)| json!({"name": name, "ok": passed, "detail": detail}))
            .collect();
        output::print_json(&json!({"ok": ok, "checks": rows}))?;
    } else {
        for (name, passed, detail) in &checks {
            let mark = if *passed { "✓".green() } else { "✗".red() };
            println!("{} {:<8} {}", mark, name, detail);
        }
    }
    if ok { Ok(()) } else { Err(AlreadyReported.into()) }
}

async fn handle_token(command: &TokenCommands, settings: &Settings, as_json: bool) -> anyhow::Result<()> {
    let client = SunClient::from_settings(settings)?;
    match command {
        TokenCommands::List {
            include_revoked,
            limit,
        } => {
            let tokens = client.list_tokens(*include_revoked, *limit).await?;
            if as_json {
                return output::print_json(&tokens);
            }
            if tokens.is_empty() {
                println!("No tokens");
                return Ok(());
            }
            println!(
                "{}",
                format!("{:<24} {:<20} {:<22} {}", "TOKEN ID", "LABEL", "EXPIRES", "SCOPES").bold()
            );
            for token in &tokens {
                let id = if token.revoked_at.is_empty() {
                    token.token_id.clone()
                } else {
                    token.token_id.dimmed().to_string()
                };
                println!(
                    "{:<24} {:<20} {:<22} {}",
                    id,
                    token.label,
                    if token.expires_at.is_empty() { "-" } else { &token.expires_at },
                    token.scopes.join(",")
                );
            }
            Ok(())
        }
        TokenCommands::Create {
            label,
            scopes,
            expires_in_hours,
        } => {
            let issued = client
                .create_token(label, &split_csv(scopes), *expires_in_hours)
                .await?;
            if as_json {
                return output::print_json(&issued);
            }
            output::success(format!("issued token {}", issued.token_id));
            output::print_fields(&[
                ("token", issued.token.clone()),
                ("label", issued.label.clone()),
                ("scopes", issued.scopes.join(",")),
                ("expires_at", issued.expires_at.clone()),
            ]);
            eprintln!("{}", "The token is shown only once.".yellow());
            Ok(())
        }
        TokenCommands::Revoke { token_id } => {
            client.revoke_token(token_id).await?;
            if as_json {
                output::print_json(&json!({"token_id": token_id, "revoked": true}))
            } else {
                output::success(format!("revoked {token_id}"));
                Ok(())
            }
        }
    }
}
