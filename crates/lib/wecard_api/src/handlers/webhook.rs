//! Platform callback handlers (data and command callbacks share them).

use axum::extract::{Query, State};
use tracing::{debug, error, info, warn};
use wecard_core::crypto;
use wecard_core::events::SuiteEvent;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::handlers::required;
use crate::models::CallbackQuery;

/// Acknowledgement the platform expects for every delivered event.
pub const SUCCESS: &str = "success";

struct Signed {
    signature: String,
    timestamp: String,
    nonce: String,
}

impl CallbackQuery {
    fn signed(&self) -> AppResult<Signed> {
        Ok(Signed {
            signature: required(self.msg_signature.clone(), "msg_signature")?,
            timestamp: required(self.timestamp.clone(), "timestamp")?,
            nonce: required(self.nonce.clone(), "nonce")?,
        })
    }
}

fn check_signature(state: &AppState, signed: &Signed, data: &str) -> AppResult<()> {
    if crypto::verify_signature(
        &state.config.token,
        &signed.timestamp,
        &signed.nonce,
        data,
        &signed.signature,
    ) {
        Ok(())
    } else {
        warn!(timestamp = %signed.timestamp, "callback signature mismatch");
        Err(AppError::BadRequest("Invalid signature".into()))
    }
}

/// `GET /api/v1/wecom/callback`: URL challenge; echoes the decrypted `echostr`.
pub async fn challenge_handler(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> AppResult<String> {
    let signed = query.signed()?;
    let echostr = required(query.echostr, "echostr")?;
    check_signature(&state, &signed, &echostr)?;

    let plaintext = crypto::decrypt(&echostr, &state.config.encoding_aes_key)?;
    info!("callback URL verified");
    Ok(plaintext)
}

/// `POST /api/v1/wecom/callback`: event delivery.
///
/// Unauthenticated payloads are rejected. An authentic payload always gets
/// `success`; processing failures are only logged.
pub async fn delivery_handler(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    body: String,
) -> AppResult<&'static str> {
    let signed = query.signed()?;
    let encrypted = crypto::parse_encrypted_envelope(&body).map_err(|e| {
        warn!(error = %e, "callback body unreadable");
        AppError::BadRequest("Invalid XML".into())
    })?;
    check_signature(&state, &signed, &encrypted)?;

    let opened = crypto::decrypt_envelope(&encrypted, &state.config.encoding_aes_key)?;
    debug!(receiver_id = %opened.receiver_id, "callback decrypted");

    let event = match SuiteEvent::parse(&opened.message) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "callback event unreadable");
            return Ok(SUCCESS);
        }
    };

    match state.dispatcher.dispatch(&event).await {
        Ok(outcome) => info!(info_type = event.kind(), ?outcome, "callback handled"),
        Err(e) => error!(info_type = event.kind(), error = %e, "callback processing failed"),
    }
    Ok(SUCCESS)
}
