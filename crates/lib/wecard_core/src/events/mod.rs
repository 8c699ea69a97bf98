//! Suite callback events.
//!
//! A decrypted callback body is classified by `InfoType` (suite-level pushes)
//! or `Event` (app-level pushes) into a [`SuiteEvent`].

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, EventDispatcher};

use serde::Deserialize;
use thiserror::Error;

use crate::crypto::{self, CryptoError};
use crate::exchanger::ExchangeError;
use crate::store::StoreError;

/// Event handling errors.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event XML: {0}")]
    Xml(String),

    #[error("{info_type} event is missing {field}")]
    Malformed {
        info_type: &'static str,
        field: &'static str,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// External-contact change subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactChange {
    /// `add_external_contact`
    Add,
    /// `add_half_external_contact`
    AddHalf,
    /// `del_external_contact`
    Delete,
    /// `del_follow_user`
    DeleteFollowUser,
    Other(String),
}

impl ContactChange {
    fn parse(raw: &str) -> Self {
        match raw {
            "add_external_contact" => Self::Add,
            "add_half_external_contact" => Self::AddHalf,
            "del_external_contact" => Self::Delete,
            "del_follow_user" => Self::DeleteFollowUser,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this change opens a conversation that can receive a welcome message.
    pub fn is_addition(&self) -> bool {
        matches!(self, Self::Add | Self::AddHalf)
    }
}

/// A classified callback event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuiteEvent {
    SuiteTicket {
        ticket: String,
    },
    CreateAuth {
        auth_code: String,
    },
    ChangeAuth {
        auth_code: String,
    },
    CancelAuth {
        corp_id: String,
    },
    ExternalContact {
        corp_id: String,
        change: ContactChange,
        user_id: Option<String>,
        external_user_id: Option<String>,
        welcome_code: Option<String>,
        state: Option<String>,
    },
    Unknown {
        info_type: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    info_type: Option<String>,
    event: Option<String>,
    to_user_name: Option<String>,
    suite_ticket: Option<String>,
    auth_code: Option<String>,
    auth_corp_id: Option<String>,
    change_type: Option<String>,
    #[serde(rename = "UserID")]
    user_id: Option<String>,
    #[serde(rename = "ExternalUserID")]
    external_user_id: Option<String>,
    welcome_code: Option<String>,
    state: Option<String>,
}

/// Empty or whitespace-only elements count as absent.
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(
    value: Option<String>,
    info_type: &'static str,
    field: &'static str,
) -> Result<String, EventError> {
    present(value).ok_or(EventError::Malformed { info_type, field })
}

impl SuiteEvent {
    /// Classify a decrypted callback body.
    pub fn parse(xml: &str) -> Result<Self, EventError> {
        let raw: RawEvent =
            quick_xml::de::from_str(xml).map_err(|e| EventError::Xml(e.to_string()))?;

        let Some(info_type) = present(raw.info_type).or(present(raw.event)) else {
            return Ok(Self::Unknown {
                info_type: String::new(),
            });
        };

        let event = match info_type.as_str() {
            "suite_ticket" => Self::SuiteTicket {
                ticket: required(raw.suite_ticket, "suite_ticket", "SuiteTicket")?,
            },
            "create_auth" => Self::CreateAuth {
                auth_code: required(raw.auth_code, "create_auth", "AuthCode")?,
            },
            "change_auth" => Self::ChangeAuth {
                auth_code: required(raw.auth_code, "change_auth", "AuthCode")?,
            },
            "cancel_auth" => Self::CancelAuth {
                corp_id: required(raw.auth_corp_id, "cancel_auth", "AuthCorpId")?,
            },
            "change_external_contact" => Self::ExternalContact {
                corp_id: required(
                    present(raw.auth_corp_id).or(raw.to_user_name),
                    "change_external_contact",
                    "AuthCorpId",
                )?,
                change: ContactChange::parse(&required(
                    raw.change_type,
                    "change_external_contact",
                    "ChangeType",
                )?),
                user_id: present(raw.user_id),
                external_user_id: present(raw.external_user_id),
                welcome_code: present(raw.welcome_code),
                state: present(raw.state),
            },
            _ => Self::Unknown { info_type },
        };
        Ok(event)
    }

    /// Decrypt an `<Encrypt>` payload and classify it.
    pub fn open(encrypted: &str, aes_key: &str) -> Result<Self, EventError> {
        let plaintext = crypto::decrypt(encrypted, aes_key)?;
        Self::parse(&plaintext)
    }

    /// Discriminator for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::SuiteTicket { .. } => "suite_ticket",
            Self::CreateAuth { .. } => "create_auth",
            Self::ChangeAuth { .. } => "change_auth",
            Self::CancelAuth { .. } => "cancel_auth",
            Self::ExternalContact { .. } => "change_external_contact",
            Self::Unknown { info_type } => info_type,
        }
    }
}
