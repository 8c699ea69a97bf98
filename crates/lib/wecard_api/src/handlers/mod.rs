//! Request handlers.

pub mod health;
pub mod install;
pub mod jssdk;
pub mod members;
pub mod oauth;
pub mod session;
pub mod webhook;

use tracing::error;
use wecard_core::config::SuiteConfig;

use crate::error::AppError;

/// 500 unless every suite credential is configured.
pub(crate) fn ensure_configured(config: &SuiteConfig) -> Result<(), AppError> {
    let missing = config.missing_fields();
    if missing.is_empty() {
        return Ok(());
    }
    error!(missing = ?missing, "suite configuration incomplete");
    Err(AppError::Internal(format!(
        "suite configuration incomplete: {}",
        missing.join(", ")
    )))
}

/// A non-blank query parameter, or 400 naming it.
pub(crate) fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing parameter: {name}")))
}

/// Drops blank values.
pub(crate) fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
