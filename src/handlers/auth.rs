use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::CallerType;
use crate::services::identity::{derive_identifier, IdentityError, IdentityService};
use crate::services::{CryptoService, TokenService};
use crate::AppState;

use super::with_timeout;

/// Request body for POST /auth/token
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub r#type: String,
}

/// Response body for POST /auth/token
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: &'static str,
    pub token_type: &'static str,
}

/// POST /auth/token
///
/// Public: the caller's identity is derived from request headers, not from
/// a bearer token. Providers must supply their signing secret in the
/// x-provider-secret header; it is stored encrypted and rotated on repeat
/// calls.
pub async fn issue_token(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<TokenRequest>,
) -> Result<HttpResponse, AppError> {
    let caller_type = CallerType::parse(&body.r#type).ok_or_else(|| {
        AppError::Validation(format!(
            "Unknown caller type '{}', expected 'consumer' or 'provider'",
            body.r#type
        ))
    })?;

    let provider_secret = match caller_type {
        CallerType::Provider => {
            let secret = req
                .headers()
                .get("x-provider-secret")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    AppError::Validation(
                        "x-provider-secret header is required for provider tokens".to_string(),
                    )
                })?;
            Some(secret)
        }
        CallerType::Consumer => None,
    };

    let identifier = derive_identifier(&req, state.config.trust_proxy);

    with_timeout(state.config.request_timeout_secs, async move {
        let identity = IdentityService::new(state.db.clone());
        let caller = identity
            .ensure_caller(caller_type, &identifier)
            .await
            .map_err(map_identity_error)?;

        let tokens = TokenService::new(&state.config.jwt_secret);
        let (token, expires_at) = tokens
            .issue_session(&caller.caller_id, caller_type, &identifier)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        match provider_secret {
            Some(secret) => {
                let encrypted = CryptoService::new(&state.config.jwt_secret).encrypt_secret(&secret);
                identity
                    .store_provider_secret(&caller.caller_id, &encrypted, expires_at)
                    .await
                    .map_err(map_identity_error)?;
            }
            None => {
                identity
                    .record_consumer_token(&caller.caller_id, &token, expires_at)
                    .await
                    .map_err(map_identity_error)?;
            }
        }

        Ok(HttpResponse::Ok().json(TokenResponse {
            token,
            expires_in: "24h",
            token_type: "Bearer",
        }))
    })
    .await
}

fn map_identity_error(err: IdentityError) -> AppError {
    match err {
        IdentityError::Mismatch => {
            AppError::IdentityMismatch("Client id is already bound to a different origin".into())
        }
        IdentityError::Database(e) => AppError::Database(e),
    }
}

/// Configure auth routes
pub fn configure_auth_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/auth").route("/token", web::post().to(issue_token)));
}
