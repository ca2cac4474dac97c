//! YouTube Data API adapter
//!
//! OAuth access tokens win over API keys; `mine=true` queries only work with
//! a token.

use crate::provider::{ContextBuilder, ContextFlags, Provider};
use si_config::Settings;
use si_runtime::{
    Credentials, DefaultNormalizer, EntryField, FieldSpec, ProviderId, Request, Response,
    ResponseNormalizer, Result, RuntimeContext, RuntimeError,
};

pub const API_KEY: FieldSpec = FieldSpec::secret(
    "youtube api key",
    "--api-key",
    "API_KEY",
    Some(EntryField::ApiKeyEnv),
    &["GOOGLE_YOUTUBE_API_KEY", "YOUTUBE_API_KEY"],
);

pub const ACCESS_TOKEN: FieldSpec = FieldSpec::secret(
    "youtube access token",
    "--access-token",
    "ACCESS_TOKEN",
    Some(EntryField::AccessTokenEnv),
    &["GOOGLE_YOUTUBE_ACCESS_TOKEN", "YOUTUBE_ACCESS_TOKEN"],
);

pub const CHANNEL_ID: FieldSpec = FieldSpec::id(
    "youtube channel id",
    "--channel-id",
    "CHANNEL_ID",
    Some(EntryField::ChannelId),
    None,
    &["YOUTUBE_CHANNEL_ID"],
);

#[derive(Debug, Clone, Copy, Default)]
pub struct YouTube;

impl YouTube {
    pub async fn list_channels(&self, ctx: &RuntimeContext, id: Option<&str>) -> Result<Response> {
        let mut request = Request::get("/youtube/v3/channels").query("part", "id,snippet,statistics");
        match id.or_else(|| ctx.id("channel_id")) {
            Some(id) => request = request.query("id", id),
            None if matches!(ctx.credentials, Credentials::Bearer(_)) => {
                request = request.query("mine", "true");
            }
            None => {
                return Err(RuntimeError::usage(
                    "youtube channel id is required with api-key auth (set --channel-id or use an access token)",
                ));
            }
        }
        self.send(ctx, &request).await
    }

    pub async fn get_channel(&self, ctx: &RuntimeContext, id: &str) -> Result<Response> {
        if id.trim().is_empty() {
            return Err(RuntimeError::usage("channel id is required"));
        }
        self.list_channels(ctx, Some(id.trim())).await
    }

    /// Most recent uploads of a channel, via `search`.
    pub async fn list_videos(
        &self,
        ctx: &RuntimeContext,
        channel: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<Response> {
        let mut request = Request::get("/youtube/v3/search")
            .query("part", "snippet")
            .query("type", "video")
            .query("order", "date");
        match channel.or_else(|| ctx.id("channel_id")) {
            Some(channel) => request = request.query("channelId", channel),
            None => request = request.query("forMine", "true"),
        }
        if let Some(max) = max_results {
            request = request.query("maxResults", max.min(50).to_string());
        }
        self.send(ctx, &request).await
    }
}

impl Provider for YouTube {
    fn id(&self) -> ProviderId {
        ProviderId::Youtube
    }

    fn display_name(&self) -> &'static str {
        "YouTube"
    }

    fn context(&self, settings: &Settings, flags: &ContextFlags) -> Result<RuntimeContext> {
        let mut builder = ContextBuilder::new(settings, ProviderId::Youtube, flags)?;
        builder.id("channel_id", &CHANNEL_ID);
        let credentials = match builder.optional(&ACCESS_TOKEN) {
            Some(token) => Credentials::Bearer(token),
            None => Credentials::ApiKey {
                param: "key".to_string(),
                key: builder.require(&API_KEY)?,
            },
        };
        Ok(builder.finish(credentials))
    }

    fn normalizer(&self) -> &dyn ResponseNormalizer {
        &DefaultNormalizer(ProviderId::Youtube)
    }

    fn verify_request(&self, _ctx: &RuntimeContext) -> Result<Request> {
        Ok(Request::get("/youtube/v3/i18nLanguages")
            .query("part", "snippet")
            .query("hl", "en_US"))
    }
}
