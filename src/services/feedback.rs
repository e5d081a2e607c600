//! Feedback intake pipeline.
//!
//! The sequence is strictly ordered: rate limit, agent load, fraud
//! analysis, feedback insert, stats update. The fraud checks must observe
//! pre-insert counts and the stats update must observe the inserted row,
//! so the steps are never reordered or parallelized.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;

use crate::models::{Agent, AgentStats, FeedbackRequest};
use crate::services::fraud::{FraudError, FraudService};

/// Maximum feedbacks per consumer in the trailing window.
const RATE_LIMIT_MAX: i64 = 60;
/// Length of the rate-limit window in seconds.
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("{0}")]
    Validation(String),
    #[error("Rate limit exceeded: too many feedbacks")]
    RateLimited,
    #[error("Agent not found: {0}")]
    AgentNotFound(String),
    #[error("Too many feedbacks for this agent, try again later")]
    SpamBlocked,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<FraudError> for FeedbackError {
    fn from(err: FraudError) -> Self {
        match err {
            FraudError::SpamBlocked => Self::SpamBlocked,
            FraudError::Database(e) => Self::Database(e),
        }
    }
}

/// Records feedback events and folds them into running statistics.
#[derive(Debug, Clone)]
pub struct FeedbackService {
    pool: PgPool,
    fraud: FraudService,
}

impl FeedbackService {
    pub fn new(pool: PgPool, production: bool) -> Self {
        let fraud = FraudService::new(pool.clone(), production);
        Self { pool, fraud }
    }

    /// Process one feedback submission from an authenticated consumer.
    pub async fn submit(
        &self,
        consumer_id: &str,
        request: &FeedbackRequest,
    ) -> Result<(), FeedbackError> {
        if !(0.0..=1.0).contains(&request.rating) {
            return Err(FeedbackError::Validation(
                "Rating must be between 0 and 1".to_string(),
            ));
        }
        if request.latency_ms < 0.0 || !request.latency_ms.is_finite() {
            return Err(FeedbackError::Validation(
                "Latency must be a non-negative number".to_string(),
            ));
        }

        // Global per-consumer rate limit, counted in the feedback table so
        // it holds across replicas.
        let window_start = Utc::now() - Duration::seconds(RATE_LIMIT_WINDOW_SECS);
        let recent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM feedback WHERE consumer_id = $1 AND created_at > $2",
        )
        .bind(consumer_id)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        if recent >= RATE_LIMIT_MAX {
            return Err(FeedbackError::RateLimited);
        }

        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(&request.agent_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FeedbackError::AgentNotFound(request.agent_id.clone()))?;

        let assessment = self.fraud.analyze(&agent, consumer_id).await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feedback (agent_id, consumer_id, success, latency_ms, rating, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&agent.id)
        .bind(consumer_id)
        .bind(request.success)
        .bind(request.latency_ms)
        .bind(request.rating)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Row lock keeps the running means exact under concurrent feedback.
        let current = sqlx::query_as::<_, AgentStats>(
            r#"
            SELECT agent_id, calls_total, calls_success, avg_latency_ms, avg_rating, last_feedback_at
            FROM agent_stats
            WHERE agent_id = $1
            FOR UPDATE
            "#,
        )
        .bind(&agent.id)
        .fetch_optional(&mut *tx)
        .await?;

        match current {
            Some(stats) => {
                let updated = apply_feedback(
                    &stats,
                    request.success,
                    request.latency_ms,
                    request.rating,
                    assessment.weight,
                    now,
                );
                sqlx::query(
                    r#"
                    UPDATE agent_stats
                    SET calls_total = $1, calls_success = $2, avg_latency_ms = $3,
                        avg_rating = $4, last_feedback_at = $5
                    WHERE agent_id = $6
                    "#,
                )
                .bind(updated.calls_total)
                .bind(updated.calls_success)
                .bind(updated.avg_latency_ms)
                .bind(updated.avg_rating)
                .bind(updated.last_feedback_at)
                .bind(&agent.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO agent_stats
                        (agent_id, calls_total, calls_success, avg_latency_ms, avg_rating, last_feedback_at)
                    VALUES ($1, 1, $2, $3, $4, $5)
                    "#,
                )
                .bind(&agent.id)
                .bind(if request.success { 1_i64 } else { 0 })
                .bind(request.latency_ms)
                .bind(request.rating * assessment.weight)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        debug!(
            agent_id = %agent.id,
            consumer_id,
            weight = assessment.weight,
            self_rating = assessment.self_rating,
            "feedback recorded"
        );

        Ok(())
    }
}

/// Fold one feedback into the running statistics.
///
/// The anti-fraud weight modulates only the rating; the latency mean is
/// intentionally unweighted.
fn apply_feedback(
    stats: &AgentStats,
    success: bool,
    latency_ms: f64,
    rating: f64,
    weight: f64,
    now: DateTime<Utc>,
) -> AgentStats {
    let calls_total = stats.calls_total + 1;
    let calls_success = stats.calls_success + i64::from(success);
    let avg_latency_ms =
        stats.avg_latency_ms + (latency_ms - stats.avg_latency_ms) / calls_total as f64;
    let avg_rating = stats.avg_rating + (rating * weight - stats.avg_rating) / calls_total as f64;

    AgentStats {
        agent_id: stats.agent_id.clone(),
        calls_total,
        calls_success,
        avg_latency_ms,
        avg_rating,
        last_feedback_at: Some(now),
    }
}
