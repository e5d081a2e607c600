use actix_web::HttpRequest;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;

use crate::models::{Caller, CallerType};

/// Number of digest hex characters kept in a caller id.
const CALLER_ID_HEX_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Client id is already bound to a different origin")]
    Mismatch,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Derive the stable caller identifier for a request.
///
/// Precedence: an `x-client-id` header binds the client id to the client IP
/// as `"{client_id}|{ip}"`; otherwise the first `x-forwarded-for` entry
/// (only when the proxy is trusted); otherwise the socket peer address;
/// otherwise `"unknown"`.
pub fn derive_identifier(req: &HttpRequest, trust_proxy: bool) -> String {
    let ip = client_ip(req, trust_proxy);
    match header_value(req, "x-client-id") {
        Some(client_id) if !client_id.is_empty() => format!("{client_id}|{ip}"),
        _ => ip,
    }
}

fn client_ip(req: &HttpRequest, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = header_value(req, "x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

/// Deterministic caller id for a `(type, identifier)` pair.
pub fn caller_id(caller_type: CallerType, identifier: &str) -> String {
    let digest = Sha256::digest(format!("{}:{identifier}", caller_type.as_str()).as_bytes());
    format!(
        "{}-{}",
        caller_type.as_str(),
        &hex::encode(digest)[..CALLER_ID_HEX_LEN]
    )
}

/// Caller lookup and bookkeeping over the callers table.
#[derive(Debug, Clone)]
pub struct IdentityService {
    pool: PgPool,
}

impl IdentityService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the caller on first sight, or return the existing row.
    ///
    /// When the identifier carries a client-id prefix, any other caller of
    /// the same type holding that prefix under a different identifier means
    /// the client id is being replayed from another origin.
    pub async fn ensure_caller(
        &self,
        caller_type: CallerType,
        identifier: &str,
    ) -> Result<Caller, IdentityError> {
        if identifier.contains('|') {
            let prefix = identifier.split('|').next().unwrap_or_default();
            let clash: Option<String> = sqlx::query_scalar(
                r#"
                SELECT identifier FROM callers
                WHERE caller_type = $1
                  AND split_part(identifier, '|', 1) = $2
                  AND identifier <> $3
                LIMIT 1
                "#,
            )
            .bind(caller_type.as_str())
            .bind(prefix)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

            if clash.is_some() {
                return Err(IdentityError::Mismatch);
            }
        }

        let id = caller_id(caller_type, identifier);
        let now = Utc::now();

        // The unique (caller_type, identifier) constraint makes concurrent
        // first-sight insertions collapse onto one row.
        let caller = sqlx::query_as::<_, Caller>(
            r#"
            INSERT INTO callers (caller_id, caller_type, identifier, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, TRUE, $4, $4)
            ON CONFLICT (caller_type, identifier)
            DO UPDATE SET updated_at = EXCLUDED.updated_at
            RETURNING caller_id, caller_type, identifier, jwt_token, token_expires_at,
                      is_active, created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(caller_type.as_str())
        .bind(identifier)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(caller)
    }

    /// Store the audit hash of a consumer's freshly issued session token.
    pub async fn record_consumer_token(
        &self,
        caller_id: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
        sqlx::query(
            r#"
            UPDATE callers
            SET jwt_token = $1, token_expires_at = $2, updated_at = $3
            WHERE caller_id = $4
            "#,
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(Utc::now())
        .bind(caller_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store (or rotate) a provider's encrypted signing secret.
    pub async fn store_provider_secret(
        &self,
        caller_id: &str,
        encrypted_secret: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            UPDATE callers
            SET jwt_token = $1, token_expires_at = $2, updated_at = $3
            WHERE caller_id = $4
            "#,
        )
        .bind(encrypted_secret)
        .bind(expires_at)
        .bind(Utc::now())
        .bind(caller_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn caller_id_is_deterministic_and_prefixed() {
        let a = caller_id(CallerType::Consumer, "1.2.3.4");
        let b = caller_id(CallerType::Consumer, "1.2.3.4");
        assert_eq!(a, b);
        assert!(a.starts_with("consumer-"));

        let hex_part = a.strip_prefix("consumer-").unwrap();
        assert_eq!(hex_part.len(), 16);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn caller_id_separates_types_and_identifiers() {
        let consumer = caller_id(CallerType::Consumer, "1.2.3.4");
        let provider = caller_id(CallerType::Provider, "1.2.3.4");
        assert_ne!(
            consumer.split('-').nth(1),
            provider.split('-').nth(1),
            "type participates in the digest"
        );
        assert_ne!(
            caller_id(CallerType::Consumer, "1.2.3.4"),
            caller_id(CallerType::Consumer, "1.2.3.5")
        );
    }

    #[test]
    fn identifier_prefers_client_id_with_ip() {
        let req = TestRequest::default()
            .insert_header(("x-client-id", "acme-bot"))
            .insert_header(("x-forwarded-for", "10.0.0.9, 172.16.0.1"))
            .to_http_request();
        assert_eq!(derive_identifier(&req, true), "acme-bot|10.0.0.9");
    }

    #[test]
    fn identifier_uses_first_forwarded_ip() {
        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "10.0.0.9, 172.16.0.1"))
            .to_http_request();
        assert_eq!(derive_identifier(&req, true), "10.0.0.9");
    }

    #[test]
    fn untrusted_proxy_ignores_forwarded_header() {
        let req = TestRequest::default()
            .insert_header(("x-forwarded-for", "10.0.0.9"))
            .peer_addr("192.168.1.20:44000".parse().unwrap())
            .to_http_request();
        assert_eq!(derive_identifier(&req, false), "192.168.1.20");
    }

    #[test]
    fn identifier_falls_back_to_peer_then_unknown() {
        let req = TestRequest::default()
            .peer_addr("192.168.1.20:44000".parse().unwrap())
            .to_http_request();
        assert_eq!(derive_identifier(&req, true), "192.168.1.20");

        let req = TestRequest::default().to_http_request();
        assert_eq!(derive_identifier(&req, true), "unknown");
    }

    #[test]
    fn client_id_binds_to_derived_ip() {
        let req = TestRequest::default()
            .insert_header(("x-client-id", "acme-bot"))
            .peer_addr("192.168.1.20:44000".parse().unwrap())
            .to_http_request();
        assert_eq!(derive_identifier(&req, true), "acme-bot|192.168.1.20");
    }
}
