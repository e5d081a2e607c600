use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use url::Url;

use crate::models::RegisterAgentRequest;

/// Errors that can occur during agent registration
#[derive(Debug, Error)]
pub enum AgentRegistryError {
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Service for validating and upserting agent metadata
#[derive(Debug, Clone)]
pub struct AgentRegistryService {
    pool: PgPool,
    production: bool,
}

impl AgentRegistryService {
    pub fn new(pool: PgPool, production: bool) -> Self {
        Self { pool, production }
    }

    /// Register or overwrite an agent on behalf of a provider.
    ///
    /// Re-registration replaces every advertised field, including the owning
    /// caller; lifecycle state and statistics survive. A zeroed stats row is
    /// created for first-time registrations.
    pub async fn register(
        &self,
        provider_caller_id: &str,
        request: RegisterAgentRequest,
    ) -> Result<String, AgentRegistryError> {
        validate_registration(&request, self.production)?;

        let now = Utc::now();
        let meta = request.meta.unwrap_or_else(|| serde_json::json!({}));

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, endpoint, description, intents, tasks, tags, categories,
                location_scope, languages, version, input_schema, meta, caller_id,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    'active', $15, $15)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                endpoint = EXCLUDED.endpoint,
                description = EXCLUDED.description,
                intents = EXCLUDED.intents,
                tasks = EXCLUDED.tasks,
                tags = EXCLUDED.tags,
                categories = EXCLUDED.categories,
                location_scope = EXCLUDED.location_scope,
                languages = EXCLUDED.languages,
                version = EXCLUDED.version,
                input_schema = EXCLUDED.input_schema,
                meta = EXCLUDED.meta,
                caller_id = EXCLUDED.caller_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&request.id)
        .bind(&request.name)
        .bind(&request.endpoint)
        .bind(&request.description)
        .bind(&request.intents)
        .bind(&request.tasks)
        .bind(&request.tags)
        .bind(&request.categories)
        .bind(&request.location_scope)
        .bind(&request.languages)
        .bind(&request.version)
        .bind(&request.input_schema)
        .bind(&meta)
        .bind(provider_caller_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO agent_stats (agent_id, calls_total, calls_success, avg_latency_ms, avg_rating)
            VALUES ($1, 0, 0, 0, 0)
            ON CONFLICT (agent_id) DO NOTHING
            "#,
        )
        .bind(&request.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(agent_id = %request.id, provider = %provider_caller_id, "agent registered");

        Ok(request.id)
    }
}

/// Validate a registration payload.
fn validate_registration(
    request: &RegisterAgentRequest,
    production: bool,
) -> Result<(), AgentRegistryError> {
    let required_strings = [
        ("id", &request.id),
        ("name", &request.name),
        ("endpoint", &request.endpoint),
        ("description", &request.description),
        ("location_scope", &request.location_scope),
        ("version", &request.version),
    ];
    for (field, value) in required_strings {
        if value.trim().is_empty() {
            return Err(AgentRegistryError::Validation(format!(
                "Field '{field}' must not be empty"
            )));
        }
    }

    let required_lists = [
        ("intents", &request.intents),
        ("categories", &request.categories),
        ("languages", &request.languages),
    ];
    for (field, list) in required_lists {
        if list.is_empty() {
            return Err(AgentRegistryError::Validation(format!(
                "Field '{field}' must have at least one entry"
            )));
        }
    }

    let all_lists = [
        ("intents", &request.intents),
        ("tasks", &request.tasks),
        ("tags", &request.tags),
        ("categories", &request.categories),
        ("languages", &request.languages),
    ];
    for (field, list) in all_lists {
        if list.iter().any(|entry| entry.trim().is_empty()) {
            return Err(AgentRegistryError::Validation(format!(
                "Field '{field}' must not contain empty entries"
            )));
        }
    }

    validate_endpoint(&request.endpoint, production)
}

/// Endpoint must parse as a URL. Production requires HTTPS; development also
/// accepts plaintext loopback endpoints.
fn validate_endpoint(endpoint: &str, production: bool) -> Result<(), AgentRegistryError> {
    let url = Url::parse(endpoint)
        .map_err(|_| AgentRegistryError::Validation("Endpoint is not a valid URL".to_string()))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if !production => match url.host_str() {
            Some("localhost") | Some("127.0.0.1") => Ok(()),
            _ => Err(AgentRegistryError::Validation(
                "Plaintext endpoints are only allowed on localhost".to_string(),
            )),
        },
        "http" => Err(AgentRegistryError::Validation(
            "Endpoint must use https in production".to_string(),
        )),
        other => Err(AgentRegistryError::Validation(format!(
            "Unsupported endpoint scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RegisterAgentRequest {
        RegisterAgentRequest {
            id: "agent:w:br".into(),
            name: "Weather BR".into(),
            endpoint: "https://weather.example.com/execute".into(),
            description: "Weather forecasts".into(),
            intents: vec!["weather.forecast".into()],
            tasks: vec!["forecast".into()],
            tags: vec!["weather".into()],
            categories: vec!["weather".into()],
            location_scope: "Global".into(),
            languages: vec!["en".into()],
            version: "1.0.0".into(),
            input_schema: None,
            meta: None,
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(validate_registration(&valid_request(), true).is_ok());
        assert!(validate_registration(&valid_request(), false).is_ok());
    }

    #[test]
    fn empty_strings_are_rejected() {
        let mut req = valid_request();
        req.name = "  ".into();
        let err = validate_registration(&req, false).unwrap_err();
        assert!(err.to_string().contains("name"));

        let mut req = valid_request();
        req.version = String::new();
        assert!(validate_registration(&req, false).is_err());
    }

    #[test]
    fn required_lists_must_be_non_empty() {
        for mutate in [
            |r: &mut RegisterAgentRequest| r.intents.clear(),
            |r: &mut RegisterAgentRequest| r.categories.clear(),
            |r: &mut RegisterAgentRequest| r.languages.clear(),
        ] {
            let mut req = valid_request();
            mutate(&mut req);
            assert!(validate_registration(&req, false).is_err());
        }
    }

    #[test]
    fn blank_list_entries_are_rejected() {
        let mut req = valid_request();
        req.tags.push("  ".into());
        assert!(validate_registration(&req, false).is_err());
    }

    #[test]
    fn production_requires_https() {
        assert!(validate_endpoint("https://weather.example.com", true).is_ok());
        assert!(validate_endpoint("http://weather.example.com", true).is_err());
        assert!(validate_endpoint("http://localhost:8080", true).is_err());
        assert!(validate_endpoint("http://127.0.0.1:8080", true).is_err());
    }

    #[test]
    fn development_allows_loopback_http() {
        assert!(validate_endpoint("https://weather.example.com", false).is_ok());
        assert!(validate_endpoint("http://localhost:8080/execute", false).is_ok());
        assert!(validate_endpoint("http://127.0.0.1:3001", false).is_ok());
        assert!(validate_endpoint("http://192.168.1.5:8080", false).is_err());
        assert!(validate_endpoint("http://internal.example.com", false).is_err());
    }

    #[test]
    fn junk_endpoints_are_rejected() {
        assert!(validate_endpoint("not a url", false).is_err());
        assert!(validate_endpoint("ftp://example.com", false).is_err());
        assert!(validate_endpoint("", false).is_err());
    }
}
