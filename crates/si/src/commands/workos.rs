use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{ContextFlags, Provider, WorkOs};
use si_runtime::ProviderId;

#[derive(Args, Debug, Clone)]
pub struct WorkosArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    #[arg(long, global = true)]
    pub api_key: Option<String>,
    /// Organization used by `user list`
    #[arg(long, global = true)]
    pub organization_id: Option<String>,
    #[command(subcommand)]
    pub command: WorkosCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum WorkosCommands {
    /// Send one request to the WorkOS API
    #[command(alias = "api")]
    Raw(RawArgs),
    /// Organizations
    #[command(alias = "org")]
    Organization {
        #[command(subcommand)]
        command: OrganizationCommands,
    },
    /// User management
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum OrganizationCommands {
    List {
        /// Filter by domain
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Get {
        id: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserCommands {
    List {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

impl WorkosArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--api-key", self.api_key.as_deref());
        flags.set("--organization-id", self.organization_id.as_deref());
        flags
    }
}

pub async fn handle(args: WorkosArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let flags = args.flags();
    match &args.command {
        WorkosCommands::Raw(raw) => super::raw(&WorkOs, settings, &flags, raw, &args.ctx).await,
        WorkosCommands::Organization { command } => {
            let ctx = WorkOs.context(settings, &flags)?;
            let response = match command {
                OrganizationCommands::List { domain, limit } => {
                    WorkOs.list_organizations(&ctx, domain.as_deref(), *limit).await?
                }
                OrganizationCommands::Get { id } => WorkOs.get_organization(&ctx, id).await?,
            };
            args.ctx.show(&response)
        }
        WorkosCommands::User {
            command: UserCommands::List { email, limit },
        } => {
            let ctx = WorkOs.context(settings, &flags)?;
            args.ctx
                .show(&WorkOs.list_users(&ctx, None, email.as_deref(), *limit).await?)
        }
        WorkosCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&WorkOs, settings, &flags, args.ctx.json).await,
        WorkosCommands::Context { command } => {
            super::context(command, ProviderId::Workos, settings, &args.ctx)
        }
    }
}
