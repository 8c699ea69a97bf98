//! JS-SDK signature endpoint.

mod common;

use axum::http::StatusCode;
use common::{CORP_ID, TestApp, tenant};
use serde_json::json;
use wecard_core::cache::{self, CredentialCache};
use wecard_core::crypto::jsapi_signature;
use wecard_core::models::Tenant;
use wecard_core::session::SessionClaims;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

const PAGE_URL: &str = "https://cards.example.com/card?id=7";

/// Tenant with an agent id, plus an installer session for it.
async fn signed_in(app: &TestApp) -> (Tenant, String) {
    let mut t = tenant();
    t.auth_info = json!({
        "agent": [{"agentid": 1000002, "privilege": {"allow_user": ["u2", "u3"]}}]
    });
    let t = app.store.insert_tenant(t).await;
    let permission = app.state.permissions.resolve(&t, "u1").await;
    let token = app
        .state
        .sessions
        .issue(SessionClaims::new(&t, "u1", None, &permission))
        .unwrap();
    (t, token)
}

fn signature_uri() -> String {
    format!("/api/v1/wecom/jssdk/signature?{}", common::query(&[("url", PAGE_URL)]))
}

#[tokio::test]
async fn signature_uses_cached_ticket() {
    let app = TestApp::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .and(query_param("access_token", "corp-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 0, "errmsg": "ok", "ticket": "js-ticket", "expires_in": 7200
        })))
        .expect(1)
        .mount(&app.server)
        .await;
    let (_, token) = signed_in(&app).await;

    let (status, body) = app.get_bearer(&signature_uri(), Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["corpid"], CORP_ID);
    assert_eq!(body["agentid"], 1000002);
    let nonce = body["nonceStr"].as_str().unwrap();
    assert_eq!(nonce.len(), 16);
    let timestamp = body["timestamp"].as_i64().unwrap().to_string();
    assert_eq!(
        body["signature"],
        jsapi_signature("js-ticket", nonce, &timestamp, PAGE_URL)
    );

    let (status, _) = app.get_bearer(&signature_uri(), Some(token.as_str())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        app.cache.get(&cache::jsapi_ticket_key(CORP_ID)).await.as_deref(),
        Some("js-ticket")
    );
}

#[tokio::test]
async fn signature_requires_session_and_url() {
    let app = TestApp::start().await;
    let (_, token) = signed_in(&app).await;

    let (status, _) = app.get_bearer(&signature_uri(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .get_bearer("/api/v1/wecom/jssdk/signature", Some(token.as_str()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing parameter: url");
}

#[tokio::test]
async fn ticket_rejection_is_bad_gateway() {
    let app = TestApp::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/get_jsapi_ticket"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errcode": 40014, "errmsg": "invalid access_token"
        })))
        .mount(&app.server)
        .await;
    let (_, token) = signed_in(&app).await;

    let (status, _) = app.get_bearer(&signature_uri(), Some(token.as_str())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(app.cache.get(&cache::jsapi_ticket_key(CORP_ID)).await.is_none());
}
