use super::{AuthCommands, ContextArgs, ContextCommands, RawArgs};
use clap::{Args, Subcommand};
use si_config::Settings;
use si_providers::{ContextFlags, GooglePlay, Provider, YouTube};
use si_runtime::{ProviderId, RuntimeError};

#[derive(Args, Debug, Clone)]
pub struct GoogleArgs {
    #[command(subcommand)]
    pub command: GoogleCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GoogleCommands {
    /// Google Play Developer API
    Play(PlayArgs),
    /// YouTube Data API
    Youtube(YoutubeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PlayArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    #[arg(long, global = true)]
    pub access_token: Option<String>,
    /// Application package name, e.g. com.example.app
    #[arg(long, global = true)]
    pub package: Option<String>,
    #[command(subcommand)]
    pub command: PlayCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PlayCommands {
    #[command(alias = "api")]
    Raw(RawArgs),
    /// Edit transactions
    Edit {
        #[command(subcommand)]
        command: EditCommands,
    },
    Tracks {
        #[command(subcommand)]
        command: TrackCommands,
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
pub enum EditCommands {
    /// Open a new edit
    Insert,
    /// Commit an edit (publishes its changes)
    Commit { id: String },
    /// Discard an edit
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TrackCommands {
    List {
        /// Edit id to read tracks from
        #[arg(long)]
        edit: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct YoutubeArgs {
    #[command(flatten)]
    pub ctx: ContextArgs,
    #[arg(long, global = true)]
    pub api_key: Option<String>,
    /// OAuth token; required for `mine` queries
    #[arg(long, global = true)]
    pub access_token: Option<String>,
    #[arg(long, global = true)]
    pub channel_id: Option<String>,
    #[command(subcommand)]
    pub command: YoutubeCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum YoutubeCommands {
    #[command(alias = "api")]
    Raw(RawArgs),
    Channel {
        #[command(subcommand)]
        command: ChannelCommands,
    },
    Video {
        #[command(subcommand)]
        command: VideoCommands,
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
pub enum ChannelCommands {
    /// Channels of the token owner, or --channel-id
    List,
    Get { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum VideoCommands {
    /// Latest uploads of a channel
    List {
        #[arg(long)]
        limit: Option<u32>,
    },
}

impl PlayArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--access-token", self.access_token.as_deref());
        flags.set("--package", self.package.as_deref());
        flags
    }
}

impl YoutubeArgs {
    fn flags(&self) -> ContextFlags {
        let mut flags = self.ctx.flags();
        flags.set("--api-key", self.api_key.as_deref());
        flags.set("--access-token", self.access_token.as_deref());
        flags.set("--channel-id", self.channel_id.as_deref());
        flags
    }
}

pub async fn handle(args: GoogleArgs, settings: &mut Settings) -> anyhow::Result<()> {
    match args.command {
        GoogleCommands::Play(play) => handle_play(play, settings).await,
        GoogleCommands::Youtube(youtube) => handle_youtube(youtube, settings).await,
    }
}

async fn handle_play(args: PlayArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let flags = args.flags();
    match &args.command {
        PlayCommands::Raw(raw) => super::raw(&GooglePlay, settings, &flags, raw, &args.ctx).await,
        PlayCommands::Edit { command } => {
            let ctx = GooglePlay.context(settings, &flags)?;
            let response = match command {
                EditCommands::Insert => GooglePlay.insert_edit(&ctx).await?,
                EditCommands::Commit { id } => GooglePlay.commit_edit(&ctx, id).await?,
                EditCommands::Delete { id, force } => {
                    if !force {
                        return Err(RuntimeError::usage(format!(
                            "deleting edit {id} discards its pending changes; pass --force to confirm"
                        ))
                        .into());
                    }
                    GooglePlay.delete_edit(&ctx, id).await?
                }
            };
            args.ctx.show(&response)
        }
        PlayCommands::Tracks {
            command: TrackCommands::List { edit },
        } => {
            let ctx = GooglePlay.context(settings, &flags)?;
            args.ctx.show(&GooglePlay.list_tracks(&ctx, edit).await?)
        }
        PlayCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&GooglePlay, settings, &flags, args.ctx.json).await,
        PlayCommands::Context { command } => {
            super::context(command, ProviderId::GooglePlay, settings, &args.ctx)
        }
    }
}

async fn handle_youtube(args: YoutubeArgs, settings: &mut Settings) -> anyhow::Result<()> {
    let flags = args.flags();
    match &args.command {
        YoutubeCommands::Raw(raw) => super::raw(&YouTube, settings, &flags, raw, &args.ctx).await,
        YoutubeCommands::Channel { command } => {
            let ctx = YouTube.context(settings, &flags)?;
            let response = match command {
                ChannelCommands::List => YouTube.list_channels(&ctx, None).await?,
                ChannelCommands::Get { id } => YouTube.get_channel(&ctx, id).await?,
            };
            args.ctx.show(&response)
        }
        YoutubeCommands::Video {
            command: VideoCommands::List { limit },
        } => {
            let ctx = YouTube.context(settings, &flags)?;
            args.ctx.show(&YouTube.list_videos(&ctx, None, *limit).await?)
        }
        YoutubeCommands::Auth {
            command: AuthCommands::Status,
        } => super::auth_status(&YouTube, settings, &flags, args.ctx.json).await,
        YoutubeCommands::Context { command } => {
            super::context(command, ProviderId::Youtube, settings, &args.ctx)
        }
    }
}
