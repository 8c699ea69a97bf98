//! # wecard_api
//!
//! HTTP API library for WeCard.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wecard_core::cache::CredentialCache;
use wecard_core::config::SuiteConfig;
use wecard_core::directory::DirectorySync;
use wecard_core::events::EventDispatcher;
use wecard_core::exchanger::{CredentialExchanger, ExchangeError};
use wecard_core::permission::PermissionResolver;
use wecard_core::profile::ProfileCapture;
use wecard_core::session::SessionIssuer;
use wecard_core::store::DirectoryStore;

use crate::handlers::{health, install, jssdk, members, oauth, session, webhook};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SuiteConfig>,
    /// Credential cache shared by every worker.
    pub cache: Arc<dyn CredentialCache>,
    pub store: Arc<dyn DirectoryStore>,
    pub exchanger: CredentialExchanger,
    pub dispatcher: EventDispatcher,
    pub permissions: PermissionResolver,
    pub sessions: SessionIssuer,
    pub directory: DirectorySync,
    pub profiles: ProfileCapture,
}

impl AppState {
    /// Wire the engine components over a cache and a store.
    pub fn new(
        config: Arc<SuiteConfig>,
        cache: Arc<dyn CredentialCache>,
        store: Arc<dyn DirectoryStore>,
    ) -> Result<Self, ExchangeError> {
        let exchanger = CredentialExchanger::new(config.clone(), cache.clone())?;
        let sessions = SessionIssuer::new(config.jwt_secret.as_bytes(), config.session_ttl);
        Ok(Self {
            dispatcher: EventDispatcher::new(exchanger.clone(), store.clone()),
            permissions: PermissionResolver::new(exchanger.clone()),
            directory: DirectorySync::new(exchanger.clone(), store.clone()),
            profiles: ProfileCapture::new(exchanger.clone(), store.clone()),
            sessions,
            exchanger,
            config,
            cache,
            store,
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `wecard_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    wecard_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (platform callbacks and login flows)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(
            routes::WECOM_CALLBACK,
            get(webhook::challenge_handler).post(webhook::delivery_handler),
        )
        .route(
            routes::WECOM_COMMAND,
            get(webhook::challenge_handler).post(webhook::delivery_handler),
        )
        .route(routes::GET_WECOM_INSTALL, get(install::install_handler))
        .route(routes::POST_WECOM_AUTH, post(install::auth_code_handler))
        .route(
            routes::GET_WECOM_OAUTH_AUTHORIZE,
            get(oauth::authorize_handler),
        )
        .route(routes::GET_WECOM_OAUTH_CALLBACK, get(oauth::callback_handler))
        .route(
            routes::GET_WECOM_AUTH_VERIFY_USER,
            get(session::verify_user_handler),
        );

    // Protected routes (require a session token)
    let protected = Router::new()
        .route(routes::POST_WECOM_AUTH_VERIFY, post(session::verify_handler))
        .route(
            routes::POST_WECOM_SYNC_MEMBERS,
            post(members::sync_members_handler),
        )
        .route(
            routes::GET_WECOM_JSSDK_SIGNATURE,
            get(jssdk::signature_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_session,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
