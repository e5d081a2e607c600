use chrono::{DateTime, Utc};
use serde::Serialize;

/// Likelihood that the agent's current threshold set fires at the next
/// auto-review sweep. Always `low` outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineRisk {
    Low,
    Medium,
    High,
}

/// Aggregated operational metrics backing a health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    pub success_rate: f64,
    pub avg_rating: f64,
    pub avg_latency_ms: f64,
    pub total_feedbacks: i64,
    pub fraud_detected: i64,
    pub fraud_percentage: f64,
    pub self_rating_percentage: f64,
}

/// On-demand health report for GET /agents/{id}/health
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealthReport {
    pub agent_id: String,
    pub status: String,
    pub health_score: f64,
    pub metrics: HealthMetrics,
    pub warnings: Vec<String>,
    pub quarantine_risk: QuarantineRisk,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_at: Option<DateTime<Utc>>,
}
