use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Immutable feedback event posted by a consumer after an execution.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Feedback {
    pub id: i64,
    pub agent_id: String,
    pub consumer_id: String,
    pub success: bool,
    pub latency_ms: f64,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}

/// Request payload for POST /feedback
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub agent_id: String,
    pub success: bool,
    pub latency_ms: f64,
    pub rating: f64,
}

/// Categories of suspicious feedback behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudType {
    SelfRating,
    Spam,
    RatingPattern,
    LatencyInconsistent,
}

impl FraudType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfRating => "SELF_RATING",
            Self::Spam => "SPAM",
            Self::RatingPattern => "RATING_PATTERN",
            Self::LatencyInconsistent => "LATENCY_INCONSISTENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FraudSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Immutable fraud-detection log entry, retained for 30 days.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FraudDetection {
    pub id: i64,
    pub agent_id: String,
    pub consumer_id: Option<String>,
    pub fraud_type: String,
    pub severity: String,
    pub details: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}
