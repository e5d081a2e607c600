use std::future::{ready, Ready};

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;
use crate::models::CallerType;
use crate::AppState;

/// Session tokens live for 24 hours.
pub const SESSION_TTL_HOURS: i64 = 24;
/// Execution keys live for 5 minutes.
pub const EXECUTION_KEY_TTL_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to encode token: {0}")]
    Encode(jsonwebtoken::errors::Error),
    #[error("Invalid or expired token")]
    Invalid,
}

/// Claims carried by a 24-hour session token, signed with the master secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Caller id
    pub sub: String,
    pub caller_type: String,
    pub identifier: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a 5-minute execution key, signed with the provider's
/// secret (or the master secret as a fallback). Stateless: the registry
/// never stores or verifies these; providers verify locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionClaims {
    /// Consumer caller id
    pub sub: String,
    pub agent_id: String,
    pub key_id: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies the registry's bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    master_secret: String,
}

impl TokenService {
    pub fn new(master_secret: impl Into<String>) -> Self {
        Self {
            master_secret: master_secret.into(),
        }
    }

    /// Issue a session token for a caller. Returns the token and its expiry.
    pub fn issue_session(
        &self,
        caller_id: &str,
        caller_type: CallerType,
        identifier: &str,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
        let claims = SessionClaims {
            sub: caller_id.to_string(),
            caller_type: caller_type.as_str().to_string(),
            identifier: identifier.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.master_secret.as_bytes()),
        )
        .map_err(TokenError::Encode)?;
        Ok((token, expires_at))
    }

    /// Verify a session token's signature and expiry.
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.master_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| TokenError::Invalid)
    }

    /// Mint an execution key for one consumer/agent pair.
    ///
    /// Signed with `provider_secret` when the provider's secret could be
    /// decrypted; otherwise the master secret keeps minting alive, at the
    /// cost of the provider rejecting the key until it re-registers.
    pub fn mint_execution_key(
        &self,
        consumer_caller_id: &str,
        agent_id: &str,
        provider_secret: Option<&str>,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(EXECUTION_KEY_TTL_SECS);

        let mut key_id = [0u8; 16];
        OsRng.fill_bytes(&mut key_id);

        let claims = ExecutionClaims {
            sub: consumer_caller_id.to_string(),
            agent_id: agent_id.to_string(),
            key_id: hex::encode(key_id),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let signing_secret = provider_secret.unwrap_or(&self.master_secret);
        let key = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(signing_secret.as_bytes()),
        )
        .map_err(TokenError::Encode)?;
        Ok((key, expires_at))
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenService([master secret redacted])")
    }
}

// ============================================================================
// Session extractors
// ============================================================================

/// Verified session attached to a request. The raw bearer string is kept so
/// registration can echo it back to the provider.
#[derive(Debug, Clone)]
pub struct Session {
    pub caller_id: String,
    pub caller_type: CallerType,
    pub identifier: String,
    pub bearer: String,
}

/// Extract Bearer token from the Authorization header
///
/// Expected format: "Bearer <token>"
fn extract_bearer_token(req: &HttpRequest) -> Option<String> {
    let auth_header = req.headers().get("Authorization")?;
    let auth_str = auth_header.to_str().ok()?;

    if auth_str.len() > 7 && auth_str[..7].eq_ignore_ascii_case("Bearer ") {
        Some(auth_str[7..].to_string())
    } else {
        None
    }
}

fn session_from_request(req: &HttpRequest) -> Result<Session, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Internal("application state not configured".to_string()))?;

    let bearer = extract_bearer_token(req).ok_or(AppError::AuthRequired)?;

    let claims = TokenService::new(&state.config.jwt_secret)
        .verify_session(&bearer)
        .map_err(|_| AppError::AuthInvalid("Invalid or expired session token".to_string()))?;

    let caller_type = CallerType::parse(&claims.caller_type)
        .ok_or_else(|| AppError::AuthInvalid("Unknown caller type in token".to_string()))?;

    Ok(Session {
        caller_id: claims.sub,
        caller_type,
        identifier: claims.identifier,
        bearer,
    })
}

impl FromRequest for Session {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(session_from_request(req).map_err(Into::into))
    }
}

/// Session restricted to consumers; other roles get FORBIDDEN.
#[derive(Debug, Clone)]
pub struct ConsumerSession(pub Session);

impl FromRequest for ConsumerSession {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            session_from_request(req)
                .and_then(|session| match session.caller_type {
                    CallerType::Consumer => Ok(Self(session)),
                    CallerType::Provider => Err(AppError::Forbidden(
                        "This operation requires a consumer token".to_string(),
                    )),
                })
                .map_err(Into::into),
        )
    }
}

/// Session restricted to providers; other roles get FORBIDDEN.
#[derive(Debug, Clone)]
pub struct ProviderSession(pub Session);

impl FromRequest for ProviderSession {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            session_from_request(req)
                .and_then(|session| match session.caller_type {
                    CallerType::Provider => Ok(Self(session)),
                    CallerType::Consumer => Err(AppError::Forbidden(
                        "This operation requires a provider token".to_string(),
                    )),
                })
                .map_err(Into::into),
        )
    }
}
