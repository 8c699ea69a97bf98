//! Route paths.

pub const GET_HEALTH: &str = "/health";

/// Data callback; GET for the URL challenge, POST for event delivery.
pub const WECOM_CALLBACK: &str = "/api/v1/wecom/callback";
/// Command callback; same semantics as [`WECOM_CALLBACK`].
pub const WECOM_COMMAND: &str = "/api/v1/wecom/command";

pub const GET_WECOM_INSTALL: &str = "/api/v1/wecom/install";
pub const GET_WECOM_OAUTH_AUTHORIZE: &str = "/api/v1/wecom/oauth/authorize";
pub const GET_WECOM_OAUTH_CALLBACK: &str = "/api/v1/wecom/oauth/callback";
pub const GET_WECOM_AUTH_VERIFY_USER: &str = "/api/v1/wecom/auth/verify_user";
pub const POST_WECOM_AUTH_VERIFY: &str = "/api/v1/wecom/auth/verify";
pub const POST_WECOM_SYNC_MEMBERS: &str = "/api/v1/wecom/sync-members";
/// Manual auth-code exchange, for when the `create_auth` event was missed.
pub const POST_WECOM_AUTH: &str = "/api/v1/wecom/auth";
pub const GET_WECOM_JSSDK_SIGNATURE: &str = "/api/v1/wecom/jssdk/signature";
