//! Feedback fraud analysis.
//!
//! Runs in the feedback hot path. Every check is a count over recent
//! feedback rows rather than in-memory state, so the verdicts are
//! consistent across handler replicas. Outside production all checks
//! short-circuit to a neutral assessment.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::warn;

use crate::models::{Agent, FraudSeverity, FraudType};

/// Weight multiplier applied when a provider rates its own agent.
const SELF_RATING_WEIGHT: f64 = 0.1;
/// Floor for the combined feedback weight.
const MIN_WEIGHT: f64 = 0.1;
/// A consumer/agent pair is blocked past this many feedbacks per hour.
const SPAM_HOURLY_LIMIT: i64 = 10;
/// Rating-pattern auditing starts at this many total feedbacks.
const RATING_PATTERN_MIN_FEEDBACKS: i64 = 10;
/// Share of extreme (0 or 1) ratings that triggers the pattern audit.
const RATING_PATTERN_EXTREME_SHARE: f64 = 0.8;

#[derive(Debug, Error)]
pub enum FraudError {
    #[error("Too many feedbacks for this agent, try again later")]
    SpamBlocked,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of the fraud analysis for one incoming feedback.
#[derive(Debug, Clone, Copy)]
pub struct FraudAssessment {
    /// Multiplier applied to the rating before it enters the running mean.
    pub weight: f64,
    /// Whether the submitter owns the rated agent.
    pub self_rating: bool,
}

impl FraudAssessment {
    fn neutral() -> Self {
        Self {
            weight: 1.0,
            self_rating: false,
        }
    }
}

/// Diminishing weight for repeat feedback from the same consumer.
pub fn decreasing_weight(prior_feedbacks: i64) -> f64 {
    let n = prior_feedbacks.max(0) as f64;
    (1.0 / (1.0 + (1.0 + n).ln())).max(MIN_WEIGHT)
}

/// Detects and logs abusive feedback patterns.
#[derive(Debug, Clone)]
pub struct FraudService {
    pool: PgPool,
    production: bool,
}

impl FraudService {
    pub fn new(pool: PgPool, production: bool) -> Self {
        Self { pool, production }
    }

    /// Assess one incoming feedback before it is recorded.
    ///
    /// Order matters: self-rating detection, then the hourly spam block,
    /// then the diminishing repeat weight, then the rating-pattern audit
    /// (which never blocks). All counts see only pre-insert rows.
    pub async fn analyze(
        &self,
        agent: &Agent,
        consumer_id: &str,
    ) -> Result<FraudAssessment, FraudError> {
        if !self.production {
            return Ok(FraudAssessment::neutral());
        }

        let mut self_weight = 1.0;
        let self_rating = consumer_id == agent.caller_id;
        if self_rating {
            self.log_detection(
                &agent.id,
                Some(consumer_id),
                FraudType::SelfRating,
                FraudSeverity::High,
                serde_json::json!({ "owner": agent.caller_id }),
            )
            .await?;
            self_weight = SELF_RATING_WEIGHT;
        }

        let hour_ago = Utc::now() - Duration::hours(1);
        let recent_pair_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM feedback
            WHERE agent_id = $1 AND consumer_id = $2 AND created_at > $3
            "#,
        )
        .bind(&agent.id)
        .bind(consumer_id)
        .bind(hour_ago)
        .fetch_one(&self.pool)
        .await?;

        if recent_pair_count >= SPAM_HOURLY_LIMIT {
            self.log_detection(
                &agent.id,
                Some(consumer_id),
                FraudType::Spam,
                FraudSeverity::High,
                serde_json::json!({ "feedbacks_last_hour": recent_pair_count }),
            )
            .await?;
            warn!(agent_id = %agent.id, consumer_id, "spam block triggered");
            return Err(FraudError::SpamBlocked);
        }

        let prior_pair_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM feedback
            WHERE agent_id = $1 AND consumer_id = $2
            "#,
        )
        .bind(&agent.id)
        .bind(consumer_id)
        .fetch_one(&self.pool)
        .await?;
        let repeat_weight = decreasing_weight(prior_pair_count);

        let (total, extreme): (i64, i64) = {
            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total,
                       COUNT(*) FILTER (WHERE rating <= 0 OR rating >= 1) AS extreme
                FROM feedback
                WHERE agent_id = $1
                "#,
            )
            .bind(&agent.id)
            .fetch_one(&self.pool)
            .await?;
            (row.get("total"), row.get("extreme"))
        };
        if total >= RATING_PATTERN_MIN_FEEDBACKS
            && extreme as f64 / total as f64 > RATING_PATTERN_EXTREME_SHARE
        {
            self.log_detection(
                &agent.id,
                None,
                FraudType::RatingPattern,
                FraudSeverity::Medium,
                serde_json::json!({ "total": total, "extreme": extreme }),
            )
            .await?;
        }

        Ok(FraudAssessment {
            weight: self_weight * repeat_weight,
            self_rating,
        })
    }

    /// Append one row to the fraud-detection log.
    pub async fn log_detection(
        &self,
        agent_id: &str,
        consumer_id: Option<&str>,
        fraud_type: FraudType,
        severity: FraudSeverity,
        details: serde_json::Value,
    ) -> Result<(), FraudError> {
        sqlx::query(
            r#"
            INSERT INTO fraud_detections (agent_id, consumer_id, fraud_type, severity, details, detected_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(agent_id)
        .bind(consumer_id)
        .bind(fraud_type.as_str())
        .bind(severity.as_str())
        .bind(details)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fraud log rows over total feedbacks, as a capped percentage.
    /// Always 0 outside production and for agents without feedback.
    pub async fn fraud_percentage(&self, agent_id: &str) -> Result<f64, FraudError> {
        if !self.production {
            return Ok(0.0);
        }
        let feedbacks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        if feedbacks == 0 {
            return Ok(0.0);
        }
        let detections: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fraud_detections WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(percentage(detections, feedbacks))
    }

    /// Share of feedbacks flagged as self-rating, as a capped percentage.
    pub async fn self_rating_percentage(&self, agent_id: &str) -> Result<f64, FraudError> {
        if !self.production {
            return Ok(0.0);
        }
        let feedbacks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        if feedbacks == 0 {
            return Ok(0.0);
        }
        let self_ratings: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fraud_detections WHERE agent_id = $1 AND fraud_type = 'SELF_RATING'",
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(percentage(self_ratings, feedbacks))
    }

    /// Raw detection count for an agent (health report metric).
    pub async fn detection_count(&self, agent_id: &str) -> Result<i64, FraudError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fraud_detections WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Batched fraud percentages for a candidate set. Agents without
    /// detections (or outside production) are simply absent from the map.
    pub async fn fraud_percentages(
        &self,
        agent_ids: &[String],
    ) -> Result<HashMap<String, f64>, FraudError> {
        if !self.production || agent_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut feedback_counts: HashMap<String, i64> = HashMap::new();
        let rows = sqlx::query(
            r#"
            SELECT agent_id, COUNT(*) AS n FROM feedback
            WHERE agent_id = ANY($1)
            GROUP BY agent_id
            "#,
        )
        .bind(agent_ids)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            feedback_counts.insert(row.get("agent_id"), row.get("n"));
        }

        let rows = sqlx::query(
            r#"
            SELECT agent_id, COUNT(*) AS n FROM fraud_detections
            WHERE agent_id = ANY($1)
            GROUP BY agent_id
            "#,
        )
        .bind(agent_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut percentages = HashMap::new();
        for row in rows {
            let agent_id: String = row.get("agent_id");
            let detections: i64 = row.get("n");
            let feedbacks = feedback_counts.get(&agent_id).copied().unwrap_or(0);
            if feedbacks > 0 {
                percentages.insert(agent_id, percentage(detections, feedbacks));
            }
        }
        Ok(percentages)
    }
}

fn percentage(part: i64, whole: i64) -> f64 {
    (part as f64 / whole as f64 * 100.0).min(100.0)
}
