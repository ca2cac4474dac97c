use super::{AuthCommands, ContextArgs, RawArgs};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{ContextFlags, Provider, Social};

#[derive(Args, Debug, Clone)]
pub struct SocialArgs {
    /// facebook, instagram, x, linkedin or reddit
    pub network: String,
    #[command(flatten)]
    pub ctx: ContextArgs,
    #[arg(long, global = true)]
    pub access_token: Option<String>,
    /// none, bearer or query (default depends on the network)
    #[arg(long, global = true)]
    pub auth_style: Option<String>,
    #[command(subcommand)]
    pub command: SocialCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SocialCommands {
    /// Send one request to the network's API (paths are versioned)
    #[command(alias = "api")]
    Raw(RawArgs),
    /// Profile of the token owner
    Profile,
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

impl SocialArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--access-token", self.access_token.as_deref());
        flags.set("--auth-style", self.auth_style.as_deref());
        flags
    }
}

pub async fn handle(args: SocialArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let network = Social::parse(&args.network)?;
    let flags = args.flags();
    match &args.command {
        SocialCommands::Raw(raw) => super::raw(&network, settings, &flags, raw, &args.ctx).await,
        SocialCommands::Profile => {
            let ctx = network.context(settings, &flags)?;
            args.ctx.show(&network.profile(&ctx).await?)
        }
        SocialCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&network, settings, &flags, args.ctx.json).await,
    }
}
