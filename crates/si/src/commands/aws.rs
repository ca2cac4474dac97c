use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use clap::{Args, Subcommand, ValueEnum};
use si_config::Settings;
use si_providers::{Aws, AwsService, ContextFlags};
use si_runtime::ProviderId;

#[derive(Args, Debug, Clone)]
pub struct AwsArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    #[arg(long, global = true)]
    pub access_key_id: Option<String>,
    #[arg(long, global = true)]
    pub secret_access_key: Option<String>,
    #[arg(long, global = true)]
    pub session_token: Option<String>,
    /// Region (default us-east-1)
    #[arg(long, global = true)]
    pub region: Option<String>,
    /// Service used by raw, auth status and doctor
    #[arg(long, global = true, value_enum, default_value_t = Service::Sts)]
    pub service: Service,
    #[command(subcommand)]
    pub command: AwsCommands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Sts,
    Iam,
    S3,
    Bedrock,
    BedrockRuntime,
}

impl From<Service> for AwsService {
    fn from(service: Service) -> Self {
        match service {
            Service::Sts => AwsService::Sts,
            Service::Iam => AwsService::Iam,
            Service::S3 => AwsService::S3,
            Service::Bedrock => AwsService::Bedrock,
            Service::BedrockRuntime => AwsService::BedrockRuntime,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum AwsCommands {
    /// Send one signed request to --service
    #[command(alias = "api")]
    Raw(RawArgs),
    /// Security Token Service
    Sts {
        #[command(subcommand)]
        command: StsCommands,
    },
    /// Identity and Access Management
    Iam {
        #[command(subcommand)]
        command: IamCommands,
    },
    S3 {
        #[command(subcommand)]
        command: S3Commands,
    },
    /// Bedrock models
    Bedrock {
        #[command(subcommand)]
        command: BedrockCommands,
    },
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    Doctor,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StsCommands {
    /// GetCallerIdentity
    Whoami,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IamCommands {
    User {
        #[command(subcommand)]
        command: IamUserCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum IamUserCommands {
    List {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum S3Commands {
    Bucket {
        #[command(subcommand)]
        command: S3BucketCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum S3BucketCommands {
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BedrockCommands {
    /// Invoke a model with a JSON request body
    Invoke {
        /// Model id, e.g. anthropic.claude-3-haiku-20240307-v1:0
        #[arg(long)]
        model: String,
        /// JSON body
        #[arg(long)]
        body: String,
    },
    /// Foundation models
    Models {
        /// Filter by model provider
        #[arg(long)]
        by_provider: Option<String>,
    },
}

impl AwsArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--access-key-id", self.access_key_id.as_deref());
        flags.set("--secret-access-key", self.secret_access_key.as_deref());
        flags.set("--session-token", self.session_token.as_deref());
        flags.set("--region", self.region.as_deref());
        flags
    }
}

pub async fn handle(args: AwsArgs, settings: &mut Settings) -> anyhow::Result<()> {
    use si_providers::Provider;

    let flags = args.flags();
    let selected = Aws::new(args.service.into());
    match &args.command {
        AwsCommands::Raw(raw) => super::raw(&selected, settings, &flags, raw, &args.ctx).await,
        AwsCommands::Sts {
            command: StsCommands::Whoami,
        } => {
            let sts = Aws::new(AwsService::Sts);
            let ctx = sts.context(settings, &flags)?;
            args.ctx.show(&sts.caller_identity(&ctx).await?)
        }
        AwsCommands::Iam {
            command:
                IamCommands::User {
                    command: IamUserCommands::List { limit },
                },
        } => {
            let iam = Aws::new(AwsService::Iam);
            let ctx = iam.context(settings, &flags)?;
            args.ctx.show(&iam.list_users(&ctx, *limit).await?)
        }
        AwsCommands::S3 {
            command:
                S3Commands::Bucket {
                    command: S3BucketCommands::List,
                },
        } => {
            let s3 = Aws::new(AwsService::S3);
            let ctx = s3.context(settings, &flags)?;
            args.ctx.show(&s3.list_buckets(&ctx).await?)
        }
        AwsCommands::Bedrock { command } => match command {
            BedrockCommands::Invoke { model, body } => {
                let body: serde_json::Value = serde_json::from_str(body)
                    .map_err(|e| anyhow::anyhow!("--body must be JSON: {e}"))?;
                let runtime = Aws::new(AwsService::BedrockRuntime);
                let ctx = runtime.context(settings, &flags)?;
                args.ctx.show(&runtime.invoke_model(&ctx, model, body).await?)
            }
            BedrockCommands::Models { by_provider } => {
                let control = Aws::new(AwsService::Bedrock);
                let ctx = control.context(settings, &flags)?;
                args.ctx.show(&control.list_models(&ctx, by_provider.as_deref()).await?)
            }
        },
        AwsCommands::Context { command } => super::context(command, ProviderId::Aws, settings, &args.ctx),
        AwsCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&selected, settings, &flags, args.ctx.json).await,
        AwsCommands::Doctor => super::doctor(&selected, settings, &flags, args.ctx.json).await,
    }
}
