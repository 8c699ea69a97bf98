//! Shared fixtures: router over in-memory backends, upstream on wiremock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;
use wecard_api::AppState;
use wecard_core::cache::{self, CredentialCache, MemoryCache};
use wecard_core::config::SuiteConfig;
use wecard_core::models::{TRIAL_PLAN, Tenant, TenantStatus};
use wecard_core::store::MemoryStore;
use wiremock::MockServer;

/// `base64(0x00..=0x1f)` without padding.
pub const AES_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";
pub const TOKEN: &str = "callback-token";
pub const SUITE_ID: &str = "ww-suite";
pub const CORP_ID: &str = "wwcorp";

pub struct TestApp {
    pub server: MockServer,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub state: AppState,
}

impl TestApp {
    /// Fully configured app with a cached suite token.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let config = SuiteConfig::new(SUITE_ID, "suite-secret", TOKEN, AES_KEY, "jwt-secret")
            .with_api_base_url(server.uri())
            .with_public_base_url("https://cards.example.com");
        Self::with_config(server, config).await
    }

    pub async fn with_config(server: MockServer, config: SuiteConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        cache
            .put(cache::SUITE_ACCESS_TOKEN, "suite-token", Duration::from_secs(600))
            .await;
        cache
            .put(
                &cache::corp_access_token_key(CORP_ID),
                "corp-token",
                Duration::from_secs(600),
            )
            .await;
        let state = AppState::new(Arc::new(config), cache.clone(), store.clone()).unwrap();
        Self {
            server,
            store,
            cache,
            state,
        }
    }

    pub fn router(&self) -> Router {
        wecard_api::router(self.state.clone())
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, String) {
        let resp = self.router().oneshot(req).await.expect("request");
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, String::from_utf8(body.to_vec()).expect("utf-8 body"))
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let (status, body) = self.get(uri).await;
        (status, serde_json::from_str(&body).expect("parse JSON"))
    }

    pub async fn get_bearer(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let (status, body) = self.send(builder.body(Body::empty()).unwrap()).await;
        (status, serde_json::from_str(&body).expect("parse JSON"))
    }

    pub async fn post_json(&self, uri: &str, payload: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, body) = self.send(req).await;
        (status, serde_json::from_str(&body).expect("parse JSON"))
    }

    pub async fn post_bearer(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let (status, body) = self.send(builder.body(Body::empty()).unwrap()).await;
        (status, serde_json::from_str(&body).expect("parse JSON"))
    }
}

/// Active tenant installed by `u1`, visible to `u2` and `u3`.
pub fn tenant() -> Tenant {
    Tenant {
        id: 0,
        corp_id: CORP_ID.into(),
        name: "Acme".into(),
        plan: TRIAL_PLAN.into(),
        status: TenantStatus::Active,
        permanent_code: Some("perm".into()),
        installer_userid: Some("u1".into()),
        auth_info: json!({"agent": [{"privilege": {"allow_user": ["u2", "u3"]}}]}),
        user_limit: 2,
        config: json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Percent-encoded query string.
pub fn query(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
