//! Suite configuration.
//!
//! Built once at process start and shared by reference; business logic never
//! reads the environment directly.

use std::path::PathBuf;
use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::info;

/// Default platform API origin.
pub const DEFAULT_API_BASE_URL: &str = "https://qyapi.weixin.qq.com";

/// Default public origin used for card links pushed to external contacts.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://zjemail.cn";

/// Upstream HTTP timeout: 5 seconds.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Session token lifetime: 12 hours.
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 3600);

/// Subtracted from platform-reported token lifetimes before caching.
const DEFAULT_TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Static suite credentials and engine tunables.
#[derive(Clone, Debug)]
pub struct SuiteConfig {
    /// Suite id issued by the platform.
    pub suite_id: String,
    /// Suite secret issued by the platform.
    pub suite_secret: String,
    /// Token used to sign webhook callbacks.
    pub token: String,
    /// 43-character base64 AES key (no padding).
    pub encoding_aes_key: String,
    /// HS256 secret for session tokens.
    pub jwt_secret: String,
    /// Platform API origin, without trailing slash.
    pub api_base_url: String,
    /// Public origin of this application, without trailing slash.
    pub public_base_url: String,
    pub http_timeout: Duration,
    pub session_ttl: Duration,
    pub token_safety_margin: Duration,
}

impl SuiteConfig {
    /// Build a config with defaults for everything except the suite credentials.
    pub fn new(
        suite_id: impl Into<String>,
        suite_secret: impl Into<String>,
        token: impl Into<String>,
        encoding_aes_key: impl Into<String>,
        jwt_secret: impl Into<String>,
    ) -> Self {
        Self {
            suite_id: suite_id.into(),
            suite_secret: suite_secret.into(),
            token: token.into(),
            encoding_aes_key: encoding_aes_key.into(),
            jwt_secret: jwt_secret.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            session_ttl: DEFAULT_SESSION_TTL,
            token_safety_margin: DEFAULT_TOKEN_SAFETY_MARGIN,
        }
    }

    /// Point the exchanger at another API origin (mock servers, proxies).
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Reads configuration from environment variables.
    ///
    /// | Variable                  | Default                          |
    /// |---------------------------|----------------------------------|
    /// | `WECOM_SUITE_ID`          | empty                            |
    /// | `WECOM_SUITE_SECRET`      | empty                            |
    /// | `WECOM_TOKEN`             | empty                            |
    /// | `WECOM_ENCODING_AES_KEY`  | empty                            |
    /// | `WECOM_API_BASE_URL`      | `https://qyapi.weixin.qq.com`    |
    /// | `PUBLIC_BASE_URL`         | `https://zjemail.cn`             |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file |
    pub fn from_env() -> Self {
        let env = |name: &str| std::env::var(name).unwrap_or_default();
        let mut config = Self::new(
            env("WECOM_SUITE_ID"),
            env("WECOM_SUITE_SECRET"),
            env("WECOM_TOKEN"),
            env("WECOM_ENCODING_AES_KEY"),
            resolve_jwt_secret(),
        );
        if let Ok(url) = std::env::var("WECOM_API_BASE_URL")
            && !url.is_empty()
        {
            config = config.with_api_base_url(url);
        }
        if let Ok(url) = std::env::var("PUBLIC_BASE_URL")
            && !url.is_empty()
        {
            config = config.with_public_base_url(url);
        }
        config
    }

    /// Names of suite credentials that are still unset.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("suite_id", &self.suite_id),
            ("suite_secret", &self.suite_secret),
            ("token", &self.token),
            ("encoding_aes_key", &self.encoding_aes_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
///
/// The persisted file keeps every worker on a host signing with the same key.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wecard")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_lists_empty_credentials() {
        let config = SuiteConfig::new("suite", "", "tok", "", "jwt");
        assert_eq!(config.missing_fields(), vec!["suite_secret", "encoding_aes_key"]);
    }

    #[test]
    fn base_urls_drop_trailing_slash() {
        let config = SuiteConfig::new("s", "s", "t", "k", "j")
            .with_api_base_url("http://127.0.0.1:9000/")
            .with_public_base_url("https://cards.example.com/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.public_base_url, "https://cards.example.com");
    }
}
