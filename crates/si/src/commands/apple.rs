use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{AppStore, ContextFlags, Provider};
use si_runtime::ProviderId;

#[derive(Args, Debug, Clone)]
pub struct AppleArgs {
    #[command(subcommand)]
    pub command: AppleCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AppleCommands {
    /// App Store Connect API (ES256 JWT auth)
    Appstore(AppstoreArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AppstoreArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    #[arg(long, global = true)]
    pub issuer_id: Option<String>,
    #[arg(long, global = true)]
    pub key_id: Option<String>,
    /// PKCS#8 private key (PEM)
    #[arg(long, global = true)]
    pub private_key: Option<String>,
    /// Path to the .p8 key file
    #[arg(long, global = true)]
    pub private_key_file: Option<String>,
    #[command(subcommand)]
    pub command: AppstoreCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AppstoreCommands {
    #[command(alias = "api")]
    Raw(RawArgs),
    Apps {
        #[command(subcommand)]
        command: AppsCommands,
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
pub enum AppsCommands {
    List {
        #[arg(long)]
        bundle_id: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Get {
        id: String,
    },
}

impl AppstoreArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--issuer-id", self.issuer_id.as_deref());
        flags.set("--key-id", self.key_id.as_deref());
        flags.set("--private-key", self.private_key.as_deref());
        flags.set("--private-key-file", self.private_key_file.as_deref());
        flags
    }
}

pub async fn handle(args: AppleArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let AppleCommands::Appstore(args) = args.command;
    let flags = args.flags();
    match &args.command {
        AppstoreCommands::Raw(raw) => super::raw(&AppStore, settings, &flags, raw, &args.ctx).await,
        AppstoreCommands::Apps { command } => {
            let ctx = AppStore.context(settings, &flags)?;
            let response = match command {
                AppsCommands::List { bundle_id, limit } => {
                    AppStore.list_apps(&ctx, bundle_id.as_deref(), *limit).await?
                }
                AppsCommands::Get { id } => AppStore.get_app(&ctx, id).await?,
            };
            args.ctx.show(&response)
        }
        AppstoreCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&AppStore, settings, &flags, args.ctx.json).await,
        AppstoreCommands::Context { command } => {
            super::context(command, ProviderId::AppStore, settings, &args.ctx)
        }
    }
}
