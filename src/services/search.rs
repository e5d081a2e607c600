//! Ranked agent search.
//!
//! Candidate selection walks a widening pipeline: overlap filter, then
//! intent+language only, then a pg_trgm fuzzy intent lookup, then the full
//! agent table. Banned agents are dropped, survivors are scored in process,
//! pruned, ranked, and each result is returned with a freshly minted
//! execution key.

use std::cmp::Ordering;
use std::collections::HashMap;

use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{Agent, AgentStats, AgentStatus, SearchRequest, SearchResultItem};
use crate::services::crypto::CryptoService;
use crate::services::fraud::{FraudError, FraudService};
use crate::services::scoring::{
    round2, score_agent, ScoreBreakdown, ScoreRequest, GEO_CUTOFF, SCORE_CUTOFF,
};
use crate::services::tokens::{TokenError, TokenService};

/// Result-set ceiling regardless of the requested limit.
const MAX_RESULTS: u32 = 10;
/// Default result count when the request does not set one.
const DEFAULT_RESULTS: u32 = 10;
/// Fuzzy fallback fetches this many rows when no limit was requested.
const FUZZY_DEFAULT_LIMIT: u32 = 50;
/// Minimum pg_trgm similarity for the fuzzy intent fallback.
const FUZZY_SIMILARITY_CUTOFF: f64 = 0.2;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{0}")]
    Validation(String),
    #[error("Failed to mint execution key: {0}")]
    Token(#[from] TokenError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<FraudError> for SearchError {
    fn from(err: FraudError) -> Self {
        match err {
            FraudError::Database(e) => Self::Database(e),
            // Search never submits feedback, so a spam block cannot surface here.
            FraudError::SpamBlocked => Self::Validation("unexpected spam block".to_string()),
        }
    }
}

/// The ranking and search engine.
#[derive(Debug, Clone)]
pub struct SearchService {
    pool: PgPool,
    tokens: TokenService,
    crypto: CryptoService,
    fraud: FraudService,
    search_debug: bool,
}

impl SearchService {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self {
            tokens: TokenService::new(&config.jwt_secret),
            crypto: CryptoService::new(&config.jwt_secret),
            fraud: FraudService::new(pool.clone(), config.is_production()),
            search_debug: config.search_debug,
            pool,
        }
    }

    /// Run one search for an authenticated consumer.
    pub async fn search(
        &self,
        consumer_caller_id: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResultItem>, SearchError> {
        if request.categories.is_empty() {
            return Err(SearchError::Validation(
                "At least one category is required".to_string(),
            ));
        }

        let intents: Option<Vec<String>> = request
            .intent
            .as_ref()
            .filter(|filter| !filter.is_empty())
            .map(|filter| filter.to_vec());
        let language = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let location = request
            .location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let mut candidates = self
            .overlap_query(intents.as_deref(), &request.categories, language)
            .await?;

        if candidates.is_empty() {
            if let Some(requested_intents) = intents.as_deref() {
                candidates = self
                    .intent_language_query(requested_intents, language)
                    .await?;
                if candidates.is_empty() {
                    if let Some(first) = request.intent.as_ref().and_then(|f| f.first()) {
                        candidates = self.fuzzy_intent_query(first, request.limit).await?;
                    }
                }
            }
        }
        if candidates.is_empty() {
            candidates = sqlx::query_as::<_, Agent>("SELECT * FROM agents")
                .fetch_all(&self.pool)
                .await?;
        }

        candidates.retain(|agent| agent.lifecycle() != AgentStatus::Banned);

        let ids: Vec<String> = candidates.iter().map(|a| a.id.clone()).collect();
        let stats_map = self.load_stats(&ids).await?;
        let fraud_map = self.fraud.fraud_percentages(&ids).await?;

        let score_request = ScoreRequest {
            intents: intents.as_deref(),
            categories: &request.categories,
            tags: &request.tags,
            location,
            description: request.description.as_deref(),
        };

        let mut scored: Vec<(Agent, ScoreBreakdown)> = Vec::with_capacity(candidates.len());
        for agent in candidates {
            let stats = stats_map.get(&agent.id);
            let fraud_pct = fraud_map.get(&agent.id).copied().unwrap_or(0.0);
            let breakdown = score_agent(&score_request, &agent, stats, fraud_pct);
            if self.search_debug {
                debug!(
                    agent_id = %agent.id,
                    intent = breakdown.intent,
                    geo = breakdown.geo,
                    success = breakdown.success,
                    description = breakdown.description,
                    category = breakdown.category,
                    rating = breakdown.rating,
                    tag = breakdown.tag,
                    latency = breakdown.latency,
                    fraud = breakdown.fraud,
                    total = breakdown.total,
                    "score breakdown"
                );
            }
            scored.push((agent, breakdown));
        }

        scored.retain(|(agent, breakdown)| passes_filters(breakdown, agent, location.is_some()));
        scored.sort_by(|a, b| {
            b.1.total
                .partial_cmp(&a.1.total)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(effective_limit(request.limit));

        let mut results = Vec::with_capacity(scored.len());
        for (agent, breakdown) in scored {
            let provider_secret = self.provider_secret(&agent).await?;
            let (execution_key, key_expires_at) = self.tokens.mint_execution_key(
                consumer_caller_id,
                &agent.id,
                provider_secret.as_deref(),
            )?;

            results.push(SearchResultItem {
                id: agent.id,
                name: agent.name,
                endpoint: agent.endpoint,
                description: agent.description,
                caller_id: agent.caller_id,
                tags: agent.tags,
                intents: agent.intents,
                tasks: agent.tasks,
                categories: agent.categories,
                location_scope: agent.location_scope,
                score: round2(breakdown.total),
                input_schema: agent.input_schema,
                execution_key,
                key_expires_at,
            });
        }

        Ok(results)
    }

    /// Primary filter: intent overlap (containment for a single intent is
    /// the same array-overlap predicate), category overlap, language
    /// membership.
    async fn overlap_query(
        &self,
        intents: Option<&[String]>,
        categories: &[String],
        language: Option<&str>,
    ) -> Result<Vec<Agent>, SearchError> {
        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT * FROM agents
            WHERE categories && $2
              AND ($1::text[] IS NULL OR intents && $1)
              AND ($3::text IS NULL OR $3 = ANY(languages))
            "#,
        )
        .bind(intents)
        .bind(categories)
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }

    /// First fallback: drop the category constraint.
    async fn intent_language_query(
        &self,
        intents: &[String],
        language: Option<&str>,
    ) -> Result<Vec<Agent>, SearchError> {
        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT * FROM agents
            WHERE intents && $1
              AND ($2::text IS NULL OR $2 = ANY(languages))
            "#,
        )
        .bind(intents)
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }

    /// Second fallback: trigram similarity of the first requested intent
    /// against each agent's joined intent list.
    async fn fuzzy_intent_query(
        &self,
        intent: &str,
        requested_limit: Option<u32>,
    ) -> Result<Vec<Agent>, SearchError> {
        let limit = i64::from(requested_limit.unwrap_or(FUZZY_DEFAULT_LIMIT));
        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT * FROM agents
            WHERE similarity(array_to_string(intents, ','), $1) >= $2
            ORDER BY similarity(array_to_string(intents, ','), $1) DESC
            LIMIT $3
            "#,
        )
        .bind(intent)
        .bind(FUZZY_SIMILARITY_CUTOFF as f32)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }

    async fn load_stats(
        &self,
        agent_ids: &[String],
    ) -> Result<HashMap<String, AgentStats>, SearchError> {
        if agent_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, AgentStats>(
            r#"
            SELECT agent_id, calls_total, calls_success, avg_latency_ms, avg_rating, last_feedback_at
            FROM agent_stats
            WHERE agent_id = ANY($1)
            "#,
        )
        .bind(agent_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|s| (s.agent_id.clone(), s)).collect())
    }

    /// Decrypted provider secret for an agent, or None to fall back to the
    /// master secret (legacy rows, rotated master).
    async fn provider_secret(&self, agent: &Agent) -> Result<Option<String>, SearchError> {
        let ciphertext: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT jwt_token FROM callers
            WHERE caller_id = $1 AND caller_type = 'provider'
            "#,
        )
        .bind(&agent.caller_id)
        .fetch_optional(&self.pool)
        .await?;

        match ciphertext.flatten() {
            Some(stored) => match self.crypto.decrypt_secret(&stored) {
                Ok(secret) => Ok(Some(secret)),
                Err(e) => {
                    warn!(
                        agent_id = %agent.id,
                        error = %e,
                        "provider secret undecryptable, signing execution key with master secret"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

/// Result-count clamp: default 10, never more than 10.
fn effective_limit(requested: Option<u32>) -> usize {
    requested.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS) as usize
}

/// Post-scoring prune. With a requested location, agents must also either
/// clear the geo cutoff or advertise a global scope.
fn passes_filters(breakdown: &ScoreBreakdown, agent: &Agent, location_requested: bool) -> bool {
    if breakdown.total < SCORE_CUTOFF {
        return false;
    }
    if location_requested {
        return breakdown.geo >= GEO_CUTOFF || agent.location_scope.eq_ignore_ascii_case("global");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn agent_with_scope(scope: &str) -> Agent {
        Agent {
            id: "agent:test".into(),
            name: "Test".into(),
            endpoint: "https://example.com".into(),
            description: "d".into(),
            intents: vec!["a.b".into()],
            tasks: vec![],
            tags: vec![],
            categories: vec!["c".into()],
            location_scope: scope.into(),
            languages: vec!["en".into()],
            version: "1".into(),
            input_schema: None,
            meta: serde_json::json!({}),
            caller_id: "provider-x".into(),
            status: "active".into(),
            quarantine_reason: None,
            quarantine_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn breakdown(total: f64, geo: f64) -> ScoreBreakdown {
        ScoreBreakdown {
            intent: 0.0,
            geo,
            success: 0.0,
            description: 0.0,
            category: 0.0,
            rating: 0.0,
            tag: 0.0,
            latency: 0.0,
            fraud: 1.0,
            total,
        }
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(effective_limit(None), 10);
        assert_eq!(effective_limit(Some(3)), 3);
        assert_eq!(effective_limit(Some(25)), 10);
        assert_eq!(effective_limit(Some(0)), 1);
    }

    #[test]
    fn low_scores_are_pruned() {
        let agent = agent_with_scope("Lisbon,Portugal");
        assert!(!passes_filters(&breakdown(0.39, 1.0), &agent, false));
        assert!(passes_filters(&breakdown(0.4, 1.0), &agent, false));
    }

    #[test]
    fn location_filter_requires_geo_or_global() {
        let local = agent_with_scope("Lisbon,Portugal");
        // Floor geo score of 0.2 fails the cutoff when a location was asked.
        assert!(!passes_filters(&breakdown(0.8, 0.2), &local, true));
        assert!(passes_filters(&breakdown(0.8, 0.3), &local, true));
        // But without a requested location the geo factor is not gated.
        assert!(passes_filters(&breakdown(0.8, 0.2), &local, false));

        let global = agent_with_scope("Global");
        assert!(passes_filters(&breakdown(0.8, 0.2), &global, true));
    }
}
