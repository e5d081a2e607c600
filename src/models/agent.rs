use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a registered agent.
///
/// `quarantine` keeps the agent searchable with a score penalty;
/// `banned` removes it from all search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Quarantine,
    Banned,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Quarantine => "quarantine",
            Self::Banned => "banned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "quarantine" => Some(Self::Quarantine),
            "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

/// Agent entity: an advertised HTTP service owned by a provider caller
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub description: String,
    pub intents: Vec<String>,
    pub tasks: Vec<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub location_scope: String,
    pub languages: Vec<String>,
    pub version: String,
    pub input_schema: Option<serde_json::Value>,
    pub meta: serde_json::Value,
    pub caller_id: String,
    pub status: String,
    pub quarantine_reason: Option<String>,
    pub quarantine_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Parsed status; unknown values read as `active` rather than failing
    /// a whole result set.
    pub fn lifecycle(&self) -> AgentStatus {
        AgentStatus::parse(&self.status).unwrap_or(AgentStatus::Active)
    }
}

/// Running statistics, 1:1 with an agent. Updated only by the feedback
/// pipeline, never reset.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AgentStats {
    pub agent_id: String,
    pub calls_total: i64,
    pub calls_success: i64,
    pub avg_latency_ms: f64,
    pub avg_rating: f64,
    pub last_feedback_at: Option<DateTime<Utc>>,
}

impl AgentStats {
    pub fn success_rate(&self) -> f64 {
        if self.calls_total == 0 {
            0.0
        } else {
            self.calls_success as f64 / self.calls_total as f64
        }
    }
}

/// Request payload for agent registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAgentRequest {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub description: String,
    pub intents: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub location_scope: String,
    pub languages: Vec<String>,
    pub version: String,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Response payload for successful agent registration
#[derive(Debug, Clone, Serialize)]
pub struct RegisterAgentResponse {
    pub id: String,
    pub jwt_token: String,
}
