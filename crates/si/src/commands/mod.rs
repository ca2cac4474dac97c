//! Command handlers
//!
//! Every provider tree shares the same context flags and the same `raw`,
//! `auth status`, `context` and `doctor` leaves; those live here.

pub mod apple;
pub mod aws;
pub mod cloudflare;
pub mod gcp;
pub mod github;
pub mod google;
pub mod machine;
pub mod providers;
pub mod social;
pub mod sun;
pub mod vault;
pub mod workos;

use crate::output::{self, AlreadyReported};
use clap::{Args, Subcommand};
use colored::Colorize;
use si_config::Settings;
use si_providers::{ContextFlags, Provider};
use si_runtime::{ProviderId, Request, Response, redact};

/// Flags accepted by every provider command.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// Account alias from settings
    #[arg(long, global = true)]
    pub account: Option<String>,
    /// Target environment (prod, staging, dev)
    #[arg(long, global = true)]
    pub env: Option<String>,
    /// Override the API base URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
    /// Print the response body exactly as received (redacted)
    #[arg(long, global = true, conflicts_with = "json")]
    pub raw: bool,
}

impl ContextArgs {
    pub fn flags(&self) -> ContextFlags {
        ContextFlags::new()
            .account(self.account.as_deref())
            .env(self.env.as_deref())
            .base_url(self.base_url.as_deref())
    }

    /// Print a provider response in the selected output mode.
    pub fn show(&self, response: &Response) -> anyhow::Result<()> {
        if self.raw {
            println!("{}", redact(&response.body));
            return Ok(());
        }
        output::print_response(response, self.json)
    }
}

/// `raw` (alias `api`): one request against the provider's API.
#[derive(Args, Debug, Clone)]
pub struct RawArgs {
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,
    /// Request path, relative to the base URL
    #[arg(long)]
    pub path: String,
    /// Query parameter as key=value (repeatable)
    #[arg(long = "param")]
    pub params: Vec<String>,
    /// Header as "Name: value" (repeatable)
    #[arg(long = "header")]
    pub headers: Vec<String>,
    /// Request body; JSON is sent as application/json
    #[arg(long)]
    pub body: Option<String>,
}

impl RawArgs {
    pub fn request(&self) -> anyhow::Result<Request> {
        let mut request = Request::new(&self.method.trim().to_ascii_uppercase(), self.path.trim())
            .with_params(&self.params)?
            .with_headers(&self.headers)?;
        if let Some(body) = self.body.as_deref().filter(|b| !b.trim().is_empty()) {
            request = match serde_json::from_str(body) {
                Ok(value) => request.json(value),
                Err(_) => request.raw(body),
            };
        }
        Ok(request)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum AuthCommands {
    /// Resolve credentials and run the provider's verify call
    Status,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ContextCommands {
    /// Configured accounts
    List,
    /// Account and environment that would be used
    Current,
    /// Make an account the default (--env also sets the default environment)
    Use {
        /// Account alias
        alias: String,
    },
}

pub async fn raw(
    provider: &dyn Provider,
    settings: &Settings,
    flags: &ContextFlags,
    args: &RawArgs,
    out: &ContextArgs,
) -> anyhow::Result<()> {
    let ctx = provider.context(settings, flags)?;
    let request = provider.prepare_raw(args.request()?);
    tracing::debug!(provider = provider.id().as_str(), method = request.method.as_str(), path = request.path.as_str(), "raw request");
    let response = provider.send(&ctx, &request).await?;
    out.show(&response)
}

/// Exits non-zero unless the verify call succeeded.
pub async fn auth_status(
    provider: &dyn Provider,
    settings: &Settings,
    flags: &ContextFlags,
    as_json: bool,
) -> anyhow::Result<()> {
    let ctx = provider.context(settings, flags)?;
    let status = si_providers::auth_status(provider, &ctx).await;
    if as_json {
        output::print_json(&status)?;
    } else {
        let text = status.render_text(provider.display_name());
        if status.is_ready() {
            println!("{}", text.green());
        } else {
            println!("{}", text.yellow());
        }
    }
    if !status.is_ready() {
        return Err(AlreadyReported.into());
    }
    Ok(())
}

pub async fn doctor(
    provider: &dyn Provider,
    settings: &Settings,
    flags: &ContextFlags,
    as_json: bool,
) -> anyhow::Result<()> {
    let report = si_providers::doctor(provider, settings, flags).await;
    if as_json {
        output::print_json(&report)?;
    } else {
        println!("{}", report.render_text(provider.display_name()));
    }
    if !report.ok {
        return Err(AlreadyReported.into());
    }
    Ok(())
}

pub fn context(
    command: &ContextCommands,
    provider: ProviderId,
    settings: &mut Settings,
    args: &ContextArgs,
) -> anyhow::Result<()> {
    match command {
        ContextCommands::List => {
            let rows = si_providers::list_accounts(settings, provider);
            if args.json {
                return output::print_json(&rows);
            }
            if rows.is_empty() {
                println!("{}", format!("No {provider} accounts configured").dimmed());
                return Ok(());
            }
            println!("{}", format!("{:<16} {:<24} {:<8} {}", "ALIAS", "NAME", "DEFAULT", "IDS").bold());
            for row in rows {
                let ids: Vec<String> = row.ids.iter().map(|(k, v)| format!("{k}={v}")).collect();
                println!(
                    "{:<16} {:<24} {:<8} {}",
                    row.alias.cyan(),
                    if row.name.is_empty() { "-" } else { &row.name },
                    if row.default { "*" } else { "" },
                    ids.join(" ").dimmed()
                );
            }
            Ok(())
        }
        ContextCommands::Current => {
            let current = si_providers::current(
                settings,
                provider,
                args.account.as_deref(),
                args.env.as_deref(),
            )?;
            if args.json {
                return output::print_json(&current);
            }
            output::print_fields(&[
                ("provider", current.provider.to_string()),
                ("account", current.account_alias.clone()),
                ("environment", current.environment.to_string()),
                ("base_url", current.base_url.clone()),
                ("env_prefix", current.env_prefix.clone()),
            ]);
            Ok(())
        }
        ContextCommands::Use { alias } => {
            si_providers::use_account(settings, provider, alias, args.env.as_deref())?;
            settings.save()?;
            if args.json {
                return output::print_json(&serde_json::json!({
                    "provider": provider,
                    "default_account": alias.trim(),
                }));
            }
            output::success(format!("{provider} default account set to {}", alias.trim().cyan()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use si_runtime::Body;

    fn raw_args(method: &str, body: Option<&str>) -> RawArgs {
        RawArgs {
            method: method.to_string(),
            path: "/zones".to_string(),
            params: vec!["per_page=5".to_string()],
            headers: vec!["X-Trace: abc".to_string()],
            body: body.map(str::to_string),
        }
    }

    #[test]
    fn test_raw_request_parses_params_and_headers() {
        let request = raw_args("get", None).request().unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.query, vec![("per_page".to_string(), "5".to_string())]);
        assert_eq!(request.headers, vec![("X-Trace".to_string(), "abc".to_string())]);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_raw_request_body_json_or_text() {
        let request = raw_args("post", Some(r#"{"name":"example.com"}"#)).request().unwrap();
        assert!(matches!(request.body, Body::Json(_)));
        let request = raw_args("post", Some("plain text")).request().unwrap();
        assert!(!matches!(request.body, Body::Json(_)));
    }

    #[test]
    fn test_context_flags_skip_empty_values() {
        let args = ContextArgs {
            account: Some("acme".to_string()),
            env: Some(" ".to_string()),
            ..Default::default()
        };
        let flags = args.flags();
        assert_eq!(flags.account.as_deref(), Some("acme"));
        assert!(flags.env.is_none());
    }
}
