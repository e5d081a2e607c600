use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role of an authenticated party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerType {
    Consumer,
    Provider,
}

impl CallerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumer => "consumer",
            Self::Provider => "provider",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "consumer" => Some(Self::Consumer),
            "provider" => Some(Self::Provider),
            _ => None,
        }
    }
}

/// A consumer or provider identity row.
///
/// `jwt_token` is role-dependent: consumers store the SHA-256 hash of their
/// most recent session token (audit only), providers store their signing
/// secret encrypted under the registry master key.
#[derive(Debug, Clone, FromRow)]
pub struct Caller {
    pub caller_id: String,
    pub caller_type: String,
    pub identifier: String,
    pub jwt_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
