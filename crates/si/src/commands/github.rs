use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{ContextFlags, GitHub, Provider};
use si_runtime::ProviderId;

#[derive(Args, Debug, Clone)]
pub struct GithubArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    /// oauth or app (default: app when an app id is configured)
    #[arg(long, global = true)]
    pub auth_mode: Option<String>,
    /// Personal or OAuth token
    #[arg(long, global = true)]
    pub token: Option<String>,
    #[arg(long, global = true)]
    pub app_id: Option<String>,
    /// App private key (PEM)
    #[arg(long, global = true)]
    pub app_key: Option<String>,
    #[arg(long, global = true)]
    pub installation_id: Option<String>,
    /// Default owner for repo commands
    #[arg(long, global = true)]
    pub owner: Option<String>,
    #[command(subcommand)]
    pub command: GithubCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GithubCommands {
    /// Send one request to the GitHub REST API
    #[command(alias = "api")]
    Raw(RawArgs),
    /// Repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    Doctor,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RepoCommands {
    List {
        #[arg(long)]
        limit: Option<u32>,
    },
    Get {
        /// owner/name, or a name under --owner
        repo: String,
    },
}

impl GithubArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--auth-mode", self.auth_mode.as_deref());
        flags.set("--token", self.token.as_deref());
        flags.set("--app-id", self.app_id.as_deref());
        flags.set("--app-key", self.app_key.as_deref());
        flags.set("--installation-id", self.installation_id.as_deref());
        flags.set("--owner", self.owner.as_deref());
        flags
    }
}

pub async fn handle(args: GithubArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let flags = args.flags();
    match &args.command {
        GithubCommands::Raw(raw) => super::raw(&GitHub, settings, &flags, raw, &args.ctx).await,
        GithubCommands::Repo { command } => {
            let ctx = GitHub.context(settings, &flags)?;
            let response = match command {
                RepoCommands::List { limit } => GitHub.list_repos(&ctx, None, *limit).await?,
                RepoCommands::Get { repo } => GitHub.get_repo(&ctx, repo).await?,
            };
            args.ctx.show(&response)
        }
        GithubCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&GitHub, settings, &flags, args.ctx.json).await,
        GithubCommands::Context { command } => {
            super::context(command, ProviderId::Github, settings, &args.ctx)
        }
        GithubCommands::Doctor => super::doctor(&GitHub, settings, &flags, args.ctx.json).await,
    }
}
