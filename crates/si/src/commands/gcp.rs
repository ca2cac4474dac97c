use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{ContextFlags, Gcp, Gemini, Provider};
use si_runtime::{ProviderId, RuntimeError};

#[derive(Args, Debug, Clone)]
pub struct GcpArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    /// Project id
    #[arg(long, global = true)]
    pub project: Option<String>,
    /// OAuth access token (otherwise GOOGLE_OAUTH_ACCESS_TOKEN)
    #[arg(long, global = true)]
    pub access_token: Option<String>,
    /// Gemini API key (otherwise GEMINI_API_KEY)
    #[arg(long, global = true)]
    pub api_key: Option<String>,
    #[command(subcommand)]
    pub command: GcpCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GcpCommands {
    /// Service Usage: enabled APIs of the project
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },
    /// Send one request to the Service Usage API
    #[command(alias = "api")]
    Raw(RawArgs),
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    Doctor,
    /// Gemini API (api-key auth)
    Gemini {
        #[command(subcommand)]
        command: GeminiCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ServiceCommands {
    List {
        #[arg(long)]
        limit: Option<u32>,
        /// e.g. state:ENABLED
        #[arg(long)]
        filter: Option<String>,
    },
    Get {
        /// Service name (compute or compute.googleapis.com)
        name: String,
    },
    Enable {
        name: String,
    },
    Disable {
        name: String,
        /// Required: disabling can break running workloads
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum GeminiCommands {
    Models {
        #[arg(long)]
        limit: Option<u32>,
    },
}

impl GcpArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--project", self.project.as_deref());
        flags.set("--access-token", self.access_token.as_deref());
        flags.set("--api-key", self.api_key.as_deref());
        flags
    }
}

pub async fn handle(args: GcpArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let flags = args.flags();
    match &args.command {
        GcpCommands::Service { command } => {
            let ctx = Gcp.context(settings, &flags)?;
            let response = match command {
                ServiceCommands::List { limit, filter } => {
                    Gcp.list_services(&ctx, filter.as_deref(), *limit).await?
                }
                ServiceCommands::Get { name } => Gcp.get_service(&ctx, name).await?,
                ServiceCommands::Enable { name } => Gcp.enable_service(&ctx, name).await?,
                ServiceCommands::Disable { name, force } => {
                    if !force {
                        return Err(RuntimeError::usage(format!(
                            "disabling {name} affects every workload in the project; pass --force to confirm"
                        ))
                        .into());
                    }
                    Gcp.disable_service(&ctx, name).await?
                }
            };
            args.ctx.show(&response)
        }
        GcpCommands::Raw(raw) => super::raw(&Gcp, settings, &flags, raw, &args.ctx).await,
        GcpCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&Gcp, settings, &flags, args.ctx.json).await,
        GcpCommands::Context { command } => super::context(command, ProviderId::Gcp, settings, &args.ctx),
        GcpCommands::Doctor => super::doctor(&Gcp, settings, &flags, args.ctx.json).await,
        GcpCommands::Gemini {
            command: GeminiCommands::Models { limit },
        } => {
            let ctx = Gemini.context(settings, &flags)?;
            args.ctx.show(&Gemini.list_models(&ctx, *limit).await?)
        }
    }
}
