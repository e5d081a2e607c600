//! Quarantine control loop.
//!
//! On-demand health reports plus the periodic auto-review sweep that moves
//! agents between `active`, `quarantine`, and `banned` based on statistical
//! thresholds. Transitions only happen in production; development reads
//! always report low risk and the sweep is a no-op apart from fraud-log
//! retention.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::models::{
    Agent, AgentHealthReport, AgentStats, AgentStatus, HealthMetrics, QuarantineRisk,
};
use crate::services::fraud::{FraudError, FraudService};

/// Fraud-detection rows are kept for this many days.
const FRAUD_LOG_RETENTION_DAYS: i64 = 30;

// Quarantine thresholds (active -> quarantine), any one triggers.
const QUARANTINE_MIN_CALLS_SUCCESS: i64 = 20;
const QUARANTINE_SUCCESS_RATE: f64 = 0.40;
const QUARANTINE_MIN_CALLS_RATING: i64 = 15;
const QUARANTINE_RATING: f64 = 0.3;
const QUARANTINE_MIN_CALLS_LATENCY: i64 = 10;
const QUARANTINE_LATENCY_MS: f64 = 30_000.0;
const QUARANTINE_FRAUD_PCT: f64 = 50.0;

// Ban thresholds (quarantine -> banned), any one triggers.
const BAN_MIN_CALLS_SUCCESS: i64 = 40;
const BAN_SUCCESS_RATE: f64 = 0.20;
const BAN_MIN_CALLS_RATING: i64 = 30;
const BAN_RATING: f64 = 0.15;
const BAN_FRAUD_PCT: f64 = 70.0;
const BAN_SELF_RATING_PCT: f64 = 80.0;

// Reactivation (quarantine -> active) requires all three.
const REACTIVATE_SUCCESS_RATE: f64 = 0.45;
const REACTIVATE_RATING: f64 = 0.35;
const REACTIVATE_FRAUD_PCT: f64 = 40.0;

// Warning bands surfaced in health reports before a threshold fires.
const WARN_MIN_CALLS: i64 = 10;
const WARN_SUCCESS_RATE: f64 = 0.5;
const WARN_RATING: f64 = 0.4;
const WARN_LATENCY_MS: f64 = 20_000.0;
const WARN_FRAUD_PCT: f64 = 30.0;
const WARN_SELF_RATING_PCT: f64 = 50.0;

/// The latency term of the health score saturates at this mean.
const HEALTH_LATENCY_CEILING_MS: f64 = 10_000.0;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<FraudError> for ReviewError {
    fn from(err: FraudError) -> Self {
        match err {
            FraudError::Database(e) => Self::Database(e),
            // Review only reads fraud counters; a spam block cannot occur here.
            FraudError::SpamBlocked => {
                Self::Database(sqlx::Error::Protocol("unexpected spam block".into()))
            }
        }
    }
}

/// Counters returned by one auto-review sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReviewSummary {
    pub quarantined: u32,
    pub reactivated: u32,
    pub banned: u32,
}

/// Point-in-time metrics for one agent, as seen by the state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSnapshot {
    pub calls_total: i64,
    pub success_rate: f64,
    pub avg_rating: f64,
    pub avg_latency_ms: f64,
    pub total_feedbacks: i64,
    pub fraud_detected: i64,
    pub fraud_percentage: f64,
    pub self_rating_percentage: f64,
}

/// Reason the agent would move from active to quarantine, if any.
pub fn quarantine_trigger(s: &HealthSnapshot) -> Option<String> {
    if s.calls_total >= QUARANTINE_MIN_CALLS_SUCCESS && s.success_rate < QUARANTINE_SUCCESS_RATE {
        return Some(format!(
            "Success rate {:.2} below {QUARANTINE_SUCCESS_RATE:.2} over {} calls",
            s.success_rate, s.calls_total
        ));
    }
    if s.calls_total >= QUARANTINE_MIN_CALLS_RATING && s.avg_rating < QUARANTINE_RATING {
        return Some(format!(
            "Average rating {:.2} below {QUARANTINE_RATING:.2}",
            s.avg_rating
        ));
    }
    if s.calls_total >= QUARANTINE_MIN_CALLS_LATENCY && s.avg_latency_ms > QUARANTINE_LATENCY_MS {
        return Some(format!(
            "Average latency {:.0}ms above {QUARANTINE_LATENCY_MS:.0}ms",
            s.avg_latency_ms
        ));
    }
    if s.fraud_percentage > QUARANTINE_FRAUD_PCT {
        return Some(format!(
            "Fraud percentage {:.1}% above {QUARANTINE_FRAUD_PCT:.0}%",
            s.fraud_percentage
        ));
    }
    None
}

/// Reason the agent would move from quarantine to banned, if any.
pub fn ban_trigger(s: &HealthSnapshot) -> Option<String> {
    if s.calls_total >= BAN_MIN_CALLS_SUCCESS && s.success_rate < BAN_SUCCESS_RATE {
        return Some(format!(
            "Success rate {:.2} below {BAN_SUCCESS_RATE:.2} over {} calls",
            s.success_rate, s.calls_total
        ));
    }
    if s.calls_total >= BAN_MIN_CALLS_RATING && s.avg_rating < BAN_RATING {
        return Some(format!(
            "Average rating {:.2} below {BAN_RATING:.2}",
            s.avg_rating
        ));
    }
    if s.fraud_percentage > BAN_FRAUD_PCT {
        return Some(format!(
            "Fraud percentage {:.1}% above {BAN_FRAUD_PCT:.0}%",
            s.fraud_percentage
        ));
    }
    if s.self_rating_percentage > BAN_SELF_RATING_PCT {
        return Some(format!(
            "Self-rating percentage {:.1}% above {BAN_SELF_RATING_PCT:.0}%",
            s.self_rating_percentage
        ));
    }
    None
}

/// Whether a quarantined agent has recovered enough to reactivate.
pub fn reactivation_eligible(s: &HealthSnapshot) -> bool {
    s.success_rate >= REACTIVATE_SUCCESS_RATE
        && s.avg_rating >= REACTIVATE_RATING
        && s.fraud_percentage < REACTIVATE_FRAUD_PCT
}

/// Single 0..1 summary of operational quality.
pub fn health_score(s: &HealthSnapshot) -> f64 {
    let latency_term = 1.0 - (s.avg_latency_ms / HEALTH_LATENCY_CEILING_MS).min(1.0);
    let fraud_term = 1.0 - s.fraud_percentage / 100.0;
    0.4 * s.success_rate + 0.3 * s.avg_rating + 0.1 * latency_term + 0.2 * fraud_term
}

/// Metric warnings surfaced before any threshold fires.
pub fn warnings(s: &HealthSnapshot) -> Vec<String> {
    let mut out = Vec::new();
    if s.calls_total >= WARN_MIN_CALLS && s.success_rate < WARN_SUCCESS_RATE {
        out.push(format!("Success rate is low ({:.2})", s.success_rate));
    }
    if s.calls_total >= WARN_MIN_CALLS && s.avg_rating < WARN_RATING {
        out.push(format!("Average rating is low ({:.2})", s.avg_rating));
    }
    if s.avg_latency_ms > WARN_LATENCY_MS {
        out.push(format!("Average latency is high ({:.0}ms)", s.avg_latency_ms));
    }
    if s.fraud_percentage > WARN_FRAUD_PCT {
        out.push(format!(
            "Fraud percentage is elevated ({:.1}%)",
            s.fraud_percentage
        ));
    }
    if s.self_rating_percentage > WARN_SELF_RATING_PCT {
        out.push(format!(
            "Self-rating percentage is elevated ({:.1}%)",
            s.self_rating_percentage
        ));
    }
    out
}

/// Risk of the agent's current threshold set firing at the next sweep.
pub fn quarantine_risk(
    status: AgentStatus,
    s: &HealthSnapshot,
    production: bool,
) -> QuarantineRisk {
    if !production {
        return QuarantineRisk::Low;
    }
    let would_transition = match status {
        AgentStatus::Active => quarantine_trigger(s).is_some(),
        AgentStatus::Quarantine => ban_trigger(s).is_some(),
        AgentStatus::Banned => false,
    };
    if would_transition {
        QuarantineRisk::High
    } else if !warnings(s).is_empty() {
        QuarantineRisk::Medium
    } else {
        QuarantineRisk::Low
    }
}

/// Health reporting and the periodic status state machine.
#[derive(Debug, Clone)]
pub struct ReviewService {
    pool: PgPool,
    fraud: FraudService,
    production: bool,
}

impl ReviewService {
    pub fn new(pool: PgPool, production: bool) -> Self {
        let fraud = FraudService::new(pool.clone(), production);
        Self {
            pool,
            fraud,
            production,
        }
    }

    /// Build the health report for one agent, or None if it is unknown.
    pub async fn health_report(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentHealthReport>, ReviewError> {
        let Some(agent) = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let snapshot = self.snapshot(&agent.id).await?;

        Ok(Some(AgentHealthReport {
            agent_id: agent.id.clone(),
            status: agent.status.clone(),
            health_score: health_score(&snapshot),
            metrics: HealthMetrics {
                success_rate: snapshot.success_rate,
                avg_rating: snapshot.avg_rating,
                avg_latency_ms: snapshot.avg_latency_ms,
                total_feedbacks: snapshot.total_feedbacks,
                fraud_detected: snapshot.fraud_detected,
                fraud_percentage: snapshot.fraud_percentage,
                self_rating_percentage: snapshot.self_rating_percentage,
            },
            warnings: warnings(&snapshot),
            quarantine_risk: quarantine_risk(agent.lifecycle(), &snapshot, self.production),
            quarantine_reason: agent.quarantine_reason,
            quarantine_at: agent.quarantine_at,
        }))
    }

    /// Scan every agent and apply the state machine. Returns transition
    /// counts. Outside production no status changes are made.
    pub async fn auto_review(&self) -> Result<ReviewSummary, ReviewError> {
        self.prune_fraud_log().await?;

        let mut summary = ReviewSummary::default();
        if !self.production {
            return Ok(summary);
        }

        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents")
            .fetch_all(&self.pool)
            .await?;

        for agent in agents {
            let snapshot = self.snapshot(&agent.id).await?;
            match agent.lifecycle() {
                AgentStatus::Active => {
                    if let Some(reason) = quarantine_trigger(&snapshot) {
                        self.set_status(&agent.id, AgentStatus::Quarantine, Some(&reason))
                            .await?;
                        info!(agent_id = %agent.id, reason = %reason, "agent quarantined");
                        summary.quarantined += 1;
                    }
                }
                AgentStatus::Quarantine => {
                    if let Some(reason) = ban_trigger(&snapshot) {
                        self.set_status(&agent.id, AgentStatus::Banned, Some(&reason))
                            .await?;
                        info!(agent_id = %agent.id, reason = %reason, "agent banned");
                        summary.banned += 1;
                    } else if reactivation_eligible(&snapshot) {
                        self.set_status(&agent.id, AgentStatus::Active, None).await?;
                        info!(agent_id = %agent.id, "agent reactivated");
                        summary.reactivated += 1;
                    }
                }
                AgentStatus::Banned => {}
            }
        }

        Ok(summary)
    }

    async fn snapshot(&self, agent_id: &str) -> Result<HealthSnapshot, ReviewError> {
        let stats = sqlx::query_as::<_, AgentStats>(
            r#"
            SELECT agent_id, calls_total, calls_success, avg_latency_ms, avg_rating, last_feedback_at
            FROM agent_stats
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        let total_feedbacks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM feedback WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_one(&self.pool)
                .await?;

        let fraud_detected = self.fraud.detection_count(agent_id).await?;
        let fraud_percentage = self.fraud.fraud_percentage(agent_id).await?;
        let self_rating_percentage = self.fraud.self_rating_percentage(agent_id).await?;

        let (calls_total, success_rate, avg_rating, avg_latency_ms) = match &stats {
            Some(s) => (s.calls_total, s.success_rate(), s.avg_rating, s.avg_latency_ms),
            None => (0, 0.0, 0.0, 0.0),
        };

        Ok(HealthSnapshot {
            calls_total,
            success_rate,
            avg_rating,
            avg_latency_ms,
            total_feedbacks,
            fraud_detected,
            fraud_percentage,
            self_rating_percentage,
        })
    }

    async fn set_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        reason: Option<&str>,
    ) -> Result<(), ReviewError> {
        let now = Utc::now();
        let quarantine_at = reason.map(|_| now);
        sqlx::query(
            r#"
            UPDATE agents
            SET status = $1, quarantine_reason = $2, quarantine_at = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(quarantine_at)
        .bind(now)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sliding-window retention for the fraud-detection log.
    async fn prune_fraud_log(&self) -> Result<(), ReviewError> {
        let cutoff = Utc::now() - chrono::Duration::days(FRAUD_LOG_RETENTION_DAYS);
        let pruned = sqlx::query("DELETE FROM fraud_detections WHERE detected_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if pruned > 0 {
            info!(pruned, "expired fraud-detection rows deleted");
        }
        Ok(())
    }
}

/// Configuration for the auto-review background job
#[derive(Debug, Clone)]
pub struct ReviewJobConfig {
    /// Interval between sweeps (default: 24 hours)
    pub interval: Duration,
    /// Whether the job is enabled
    pub enabled: bool,
}

impl Default for ReviewJobConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 3600),
            enabled: true,
        }
    }
}

/// Background runner for the auto-review sweep.
///
/// Designed for a single runner: deployments with multiple instances must
/// enable the job on exactly one node.
pub struct ReviewJob {
    pool: PgPool,
    config: ReviewJobConfig,
    production: bool,
}

impl ReviewJob {
    pub fn new(pool: PgPool, config: ReviewJobConfig, production: bool) -> Self {
        Self {
            pool,
            config,
            production,
        }
    }

    /// Start the sweep loop. Returns a shutdown sender that stops the job.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            info!("Auto-review job is disabled");
            return shutdown_tx;
        }

        let pool = self.pool.clone();
        let interval = self.config.interval;
        let production = self.production;

        tokio::spawn(async move {
            info!(interval = ?interval, "Starting auto-review job");

            let mut interval_timer = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a restart loop
            // does not hammer the sweep.
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let service = ReviewService::new(pool.clone(), production);
                        match service.auto_review().await {
                            Ok(summary) => {
                                info!(
                                    quarantined = summary.quarantined,
                                    reactivated = summary.reactivated,
                                    banned = summary.banned,
                                    "auto-review sweep finished"
                                );
                            }
                            Err(e) => {
                                error!(error = %e, "auto-review sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Auto-review job shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}
