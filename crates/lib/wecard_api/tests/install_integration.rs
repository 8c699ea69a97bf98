//! Install, OAuth authorize/callback and health endpoints.

mod common;

use axum::http::StatusCode;
use common::{CORP_ID, TestApp, query, tenant};
use serde_json::json;
use wecard_core::cache::{self, CredentialCache};
use wecard_core::config::SuiteConfig;
use wecard_core::store::DirectoryStore;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::start().await;
    let (status, body) = app.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], wecard_core::version());
}

#[tokio::test]
async fn install_returns_qr_url() {
    let app = TestApp::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/service/get_pre_auth_code"))
        .and(query_param("suite_access_token", "suite-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 0, "pre_auth_code": "pac-1", "expires_in": 1200
        })))
        .mount(&app.server)
        .await;

    let (status, body) = app.get_json("/api/v1/wecom/install").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["pre_auth_code"], "pac-1");
    let qr_url = body["qr_url"].as_str().unwrap();
    assert!(qr_url.contains("pre_auth_code=pac-1"));
    assert!(qr_url.contains("state=wechat_auth"));
    assert!(qr_url.contains("cards.example.com%2Fwecom%2Fsettings"));
}

#[tokio::test]
async fn install_with_incomplete_config_is_internal_error() {
    let server = MockServer::start().await;
    let config = SuiteConfig::new("", "", "tok", "", "jwt").with_api_base_url(server.uri());
    let app = TestApp::with_config(server, config).await;

    let (status, body) = app.get_json("/api/v1/wecom/install").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal server error");
    assert!(app.server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn install_without_pre_auth_code_is_bad_gateway() {
    let app = TestApp::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/service/get_pre_auth_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 42009, "errmsg": "suite_access_token expired"
        })))
        .mount(&app.server)
        .await;

    let (status, _) = app.get_json("/api/v1/wecom/install").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn authorize_remembers_redirect_under_state() {
    let app = TestApp::start().await;
    let qs = query(&[("redirect_uri", "https://cards.example.com/wecom/profile")]);

    let (status, body) = app
        .get_json(&format!("/api/v1/wecom/oauth/authorize?{qs}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let state = body["state"].as_str().unwrap();
    assert!(!state.is_empty());
    let auth_url = body["auth_url"].as_str().unwrap();
    assert!(auth_url.contains("scope=snsapi_base"));
    assert!(auth_url.contains(&format!("state={state}")));
    assert!(auth_url.ends_with("#wechat_redirect"));
    assert_eq!(
        app.cache.get(&cache::oauth_state_key(state)).await.as_deref(),
        Some("https://cards.example.com/wecom/profile")
    );
}

#[tokio::test]
async fn callback_captures_profile_and_consumes_state() {
    let app = TestApp::start().await;
    let t = app.store.insert_tenant(tenant()).await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/service/auth/getuserinfo3rd"))
        .and(query_param("code", "code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 0, "corpid": CORP_ID, "userid": "u1", "open_userid": "wo-u1"
        })))
        .mount(&app.server)
        .await;
    app.cache
        .put(
            &cache::oauth_state_key("st-1"),
            "https://cards.example.com/wecom/profile",
            std::time::Duration::from_secs(600),
        )
        .await;

    let qs = query(&[("code", "code-1"), ("corp_id", CORP_ID), ("state", "st-1")]);
    let (status, body) = app
        .get_json(&format!("/api/v1/wecom/oauth/callback?{qs}"))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(body["user"]["role"], "installer");
    assert_eq!(body["member"]["userid"], "u1");
    assert_eq!(body["member"]["oauth_authorized"], true);
    assert_eq!(body["redirect_uri"], "https://cards.example.com/wecom/profile");
    assert!(body["member"].get("user_ticket").is_none());

    assert_eq!(app.cache.get(&cache::oauth_state_key("st-1")).await, None);
    let member = app.store.member(t.id, "u1").await.unwrap().unwrap();
    assert_eq!(member.open_userid.as_deref(), Some("wo-u1"));
}

#[tokio::test]
async fn callback_requires_code_and_known_corp() {
    let app = TestApp::start().await;

    let (status, _) = app
        .get_json(&format!("/api/v1/wecom/oauth/callback?{}", query(&[("corp_id", CORP_ID)])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .get_json(&format!("/api/v1/wecom/oauth/callback?{}", query(&[("code", "c")])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let qs = query(&[("code", "c"), ("corp_id", "wwunknown")]);
    let (status, _) = app
        .get_json(&format!("/api/v1/wecom/oauth/callback?{qs}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn mount_permanent_code(app: &TestApp) {
    Mock::given(method("POST"))
        .and(path("/cgi-bin/service/get_permanent_code"))
        .and(query_param("suite_access_token", "suite-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "permanent_code": "perm-secret",
            "auth_corp_info": {"corpid": CORP_ID, "corp_name": "Acme"},
            "auth_info": {"agent": [{"agentid": 1000002, "privilege": {"allow_user": ["u2"]}}]},
            "auth_user_info": {"userid": "u1"}
        })))
        .mount(&app.server)
        .await;
}

#[tokio::test]
async fn auth_code_exchange_creates_then_updates_tenant() {
    let app = TestApp::start().await;
    mount_permanent_code(&app).await;

    let (status, body) = app
        .post_json("/api/v1/wecom/auth", json!({"auth_code": "auth-1"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["corp_id"], CORP_ID);
    assert_eq!(body["corp_name"], "Acme");
    assert_eq!(body["created"], true);
    assert_eq!(body["auth_info"]["agent"][0]["agentid"], 1000002);
    assert!(!body.to_string().contains("perm-secret"));

    let stored = app.store.tenant_by_corp_id(CORP_ID).await.unwrap().unwrap();
    assert_eq!(body["tenant_id"], stored.id);
    assert_eq!(stored.permanent_code(), Some("perm-secret"));
    assert_eq!(stored.installer_userid.as_deref(), Some("u1"));

    let (status, body) = app
        .post_json("/api/v1/wecom/auth", json!({"auth_code": "auth-1"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["created"], false);
    assert_eq!(app.store.tenant_count().await, 1);
}

#[tokio::test]
async fn auth_code_exchange_validates_input_and_upstream() {
    let app = TestApp::start().await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/service/get_permanent_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 40029, "errmsg": "invalid code"
        })))
        .mount(&app.server)
        .await;

    let (status, body) = app.post_json("/api/v1/wecom/auth", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing parameter: auth_code");

    let (status, _) = app
        .post_json("/api/v1/wecom/auth", json!({"auth_code": "used"}))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(app.store.tenant_count().await, 0);
}

#[tokio::test]
async fn auth_code_exchange_with_incomplete_config_is_internal_error() {
    let server = MockServer::start().await;
    let config = SuiteConfig::new("", "", "tok", "", "jwt").with_api_base_url(server.uri());
    let app = TestApp::with_config(server, config).await;

    let (status, _) = app
        .post_json("/api/v1/wecom/auth", json!({"auth_code": "auth-1"}))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.server.received_requests().await.unwrap_or_default().is_empty());
}
