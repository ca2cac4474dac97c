use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use crate::output::{self, AlreadyReported};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{Cloudflare, ContextFlags, Provider};
use si_runtime::ProviderId;

#[derive(Args, Debug, Clone)]
pub struct CloudflareArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    /// API token (otherwise CLOUDFLARE_API_TOKEN or the account's token env)
    #[arg(long, global = true)]
    pub api_token: Option<String>,
    #[arg(long, global = true)]
    pub account_id: Option<String>,
    #[arg(long, global = true)]
    pub zone_id: Option<String>,
    /// Zone name, for commands that look zones up by name
    #[arg(long, global = true)]
    pub zone: Option<String>,
    #[command(subcommand)]
    pub command: CloudflareCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CloudflareCommands {
    /// Send one request to the Cloudflare API
    #[command(alias = "api")]
    Raw(RawArgs),
    /// Read-only sweep across the API families the token should reach
    Smoke {
        /// Exit 0 even when checks fail
        #[arg(long)]
        no_fail: bool,
    },
    /// Credential status
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Same as `auth status`
    Status,
    /// Accounts configured in settings
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    /// Check context, base URL and token
    Doctor,
    /// Zones
    Zone {
        #[command(subcommand)]
        command: ZoneCommands,
    },
    /// DNS records
    Dns {
        #[command(subcommand)]
        command: DnsCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ZoneCommands {
    List {
        /// Filter by zone name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        per_page: Option<u32>,
    },
    /// Zone details (defaults to the environment's zone)
    Get {
        id: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DnsCommands {
    /// Records of --zone-id (defaults to the environment's zone)
    List {
        /// Record type (A, AAAA, CNAME, ...)
        #[arg(long = "type")]
        record_type: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

impl CloudflareArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--api-token", self.api_token.as_deref());
        flags.set("--account-id", self.account_id.as_deref());
        flags.set("--zone-id", self.zone_id.as_deref());
        flags.set("--zone", self.zone.as_deref());
        flags
    }
}

pub async fn handle(args: CloudflareArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let flags = args.flags();
    let provider = Cloudflare;
    match &args.command {
        CloudflareCommands::Raw(raw) => super::raw(&provider, settings, &flags, raw, &args.ctx).await,
        CloudflareCommands::Smoke { no_fail } => {
            let ctx = provider.context(settings, &flags)?;
            let report = provider.smoke(&ctx).await;
            if args.ctx.json {
                output::print_json(&report)?;
            } else {
                println!("{}", report.render_text());
            }
            if !report.ok && !no_fail {
                return Err(AlreadyReported.into());
            }
            Ok(())
        }
        CloudflareCommands::Auth {
            command: AuthCommands::Status,
        }
        | CloudflareCommands::Status => {
            super::auth_status(&provider, settings, &flags, args.ctx.json).await
        }
        CloudflareCommands::Context { command } => {
            super::context(command, ProviderId::Cloudflare, settings, &args.ctx)
        }
        CloudflareCommands::Doctor => super::doctor(&provider, settings, &flags, args.ctx.json).await,
        CloudflareCommands::Zone { command } => {
            let ctx = provider.context(settings, &flags)?;
            let response = match command {
                ZoneCommands::List { name, per_page } => {
                    let name = name.as_deref().or(args.zone.as_deref());
                    provider.list_zones(&ctx, name, *per_page).await?
                }
                ZoneCommands::Get { id } => provider.get_zone(&ctx, id.as_deref()).await?,
            };
            args.ctx.show(&response)
        }
        CloudflareCommands::Dns {
            command:
                DnsCommands::List { record_type, name },
        } => {
            let ctx = provider.context(settings, &flags)?;
            let response = provider
                .list_dns(&ctx, None, record_type.as_deref(), name.as_deref())
                .await?;
            args.ctx.show(&response)
        }
    }
}
