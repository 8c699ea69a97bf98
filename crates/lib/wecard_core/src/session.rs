//! Session token issuance and verification (HS256 JWT).
//!
//! Tokens are stateless; validity depends only on the signature and `exp`.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Tenant;
use crate::permission::{Permission, Role};

/// Session errors. Callers treat every variant as "re-authenticate".
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session token missing")]
    Missing,

    #[error("Session token expired")]
    Expired,

    #[error("Session token invalid")]
    Invalid,

    #[error("Session token encode failed: {0}")]
    Encode(String),
}

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub tenant_id: i64,
    pub corp_id: String,
    pub userid: String,
    pub open_userid: Option<String>,
    pub role: Role,
    pub is_admin: bool,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl SessionClaims {
    /// Claims for `userid` in `tenant`; `iat`/`exp` are stamped by [`SessionIssuer::issue`].
    pub fn new(
        tenant: &Tenant,
        userid: impl Into<String>,
        open_userid: Option<String>,
        permission: &Permission,
    ) -> Self {
        Self {
            tenant_id: tenant.id,
            corp_id: tenant.corp_id.clone(),
            userid: userid.into(),
            open_userid,
            role: permission.role,
            is_admin: permission.is_admin,
            iat: 0,
            exp: 0,
        }
    }
}

/// Mints and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign `claims` with the default TTL.
    pub fn issue(&self, claims: SessionClaims) -> Result<String, SessionError> {
        self.issue_with_ttl(claims, self.ttl)
    }

    /// Sign `claims`, overwriting `iat` and `exp`.
    pub fn issue_with_ttl(
        &self,
        mut claims: SessionClaims,
        ttl: Duration,
    ) -> Result<String, SessionError> {
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        claims.iat = now;
        claims.exp = now.saturating_add(ttl_secs);
        self.sign(&claims)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, SessionError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| SessionError::Encode(e.to_string()))
    }

    /// Check signature and expiry with zero leeway.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::Missing);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;

        decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::Invalid,
            })
    }
}
