mod commands;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::apple::AppleArgs;
use commands::aws::AwsArgs;
use commands::cloudflare::CloudflareArgs;
use commands::gcp::GcpArgs;
use commands::github::GithubArgs;
use commands::google::{GoogleArgs, GoogleCommands};
use commands::providers::ProvidersCommands;
use commands::social::SocialArgs;
use commands::sun::SunArgs;
use commands::vault::VaultArgs;
use commands::workos::WorkosArgs;
use output::AlreadyReported;
use si_config::Settings;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "si")]
#[command(about = "One CLI for SaaS control planes, the sun vault and remote machines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cloudflare API
    #[command(alias = "cf")]
    Cloudflare(CloudflareArgs),
    /// AWS IAM, STS, S3 and Bedrock
    Aws(AwsArgs),
    /// Google Cloud Service Usage and Gemini
    Gcp(GcpArgs),
    /// GitHub REST API
    Github(GithubArgs),
    /// WorkOS organizations and users
    Workos(WorkosArgs),
    /// Facebook, Instagram, X, LinkedIn and Reddit
    Social(SocialArgs),
    /// Google Play and YouTube
    Google(GoogleArgs),
    /// App Store Connect
    Apple(AppleArgs),
    /// Provider registry and runtime health
    #[command(alias = "provider")]
    Providers {
        #[command(subcommand)]
        command: ProvidersCommands,
    },
    /// Secrets stored in sun
    Vault(VaultArgs),
    /// Sun account, tokens and machines
    Sun(SunArgs),
    /// Print the version
    Version,
}

impl Commands {
    /// Root name as used by the vault hydration allow-list.
    fn root_name(&self) -> &'static str {
        match self {
            Self::Cloudflare(_) => "cloudflare",
            Self::Aws(_) => "aws",
            Self::Gcp(_) => "gcp",
            Self::Github(_) => "github",
            Self::Workos(_) => "workos",
            Self::Social(_) => "social",
            Self::Google(_) => "google",
            Self::Apple(_) => "apple",
            Self::Providers { .. } => "providers",
            Self::Vault(_) => "vault",
            Self::Sun(_) => "sun",
            Self::Version => "version",
        }
    }

    fn wants_json(&self) -> bool {
        match self {
            Self::Cloudflare(args) => args.ctx.json,
            Self::Aws(args) => args.ctx.json,
            Self::Gcp(args) => args.ctx.json,
            Self::Github(args) => args.ctx.json,
            Self::Workos(args) => args.ctx.json,
            Self::Social(args) => args.ctx.json,
            Self::Google(args) => match &args.command {
                GoogleCommands::Play(play) => play.ctx.json,
                GoogleCommands::Youtube(youtube) => youtube.ctx.json,
            },
            Self::Apple(args) => {
                let commands::apple::AppleCommands::Appstore(appstore) = &args.command;
                appstore.ctx.json
            }
            Self::Providers {
                command: ProvidersCommands::List { json } | ProvidersCommands::Health { json, .. },
            } => *json,
            Self::Vault(args) => args.json,
            Self::Sun(args) => args.json,
            Self::Version => false,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(std::env::var_os("NO_COLOR").is_none())
        .with_target(false)
        .init();
}

async fn run(command: Commands) -> anyhow::Result<()> {
    if matches!(command, Commands::Version) {
        println!("si {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut settings = Settings::load().context("loading settings")?;
    let hydrated = si_vault::auto_hydrate(&settings, command.root_name()).await;
    if hydrated > 0 {
        tracing::debug!(hydrated, "exported vault values");
    }

    match command {
        Commands::Cloudflare(args) => commands::cloudflare::handle(args, &mut settings).await,
        Commands::Aws(args) => commands::aws::handle(args, &mut settings).await,
        Commands::Gcp(args) => commands::gcp::handle(args, &mut settings).await,
        Commands::Github(args) => commands::github::handle(args, &mut settings).await,
        Commands::Workos(args) => commands::workos::handle(args, &mut settings).await,
        Commands::Social(args) => commands::social::handle(args, &mut settings).await,
        Commands::Google(args) => commands::google::handle(args, &mut settings).await,
        Commands::Apple(args) => commands::apple::handle(args, &mut settings).await,
        Commands::Providers { command } => commands::providers::handle(&command),
        Commands::Vault(args) => commands::vault::handle(args, &settings).await,
        Commands::Sun(args) => commands::sun::handle(args, &mut settings).await,
        Commands::Version => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let as_json = cli.command.wants_json();
    if let Err(err) = run(cli.command).await {
        if !err.is::<AlreadyReported>() {
            output::report_error(&err, as_json);
        }
        std::process::exit(1);
    }
}
