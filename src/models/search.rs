use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requested intent: a single dotted string or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntentFilter {
    One(String),
    Many(Vec<String>),
}

impl IntentFilter {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(list) => list.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(s) => s.trim().is_empty(),
            Self::Many(list) => list.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// First non-empty intent, used for the fuzzy fallback lookup.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(s) if !s.trim().is_empty() => Some(s),
            Self::One(_) => None,
            Self::Many(list) => list.iter().map(String::as_str).find(|s| !s.trim().is_empty()),
        }
    }
}

/// Request payload for POST /search
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub intent: Option<IntentFilter>,
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// One ranked search result with its freshly minted execution key.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub description: String,
    pub caller_id: String,
    pub tags: Vec<String>,
    pub intents: Vec<String>,
    pub tasks: Vec<String>,
    pub categories: Vec<String>,
    pub location_scope: String,
    pub score: f64,
    pub input_schema: Option<serde_json::Value>,
    pub execution_key: String,
    pub key_expires_at: DateTime<Utc>,
}
