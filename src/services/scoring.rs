//! Ranking score computation.
//!
//! The final score is a weighted sum of nine factors, each in [0, 1]. The
//! weight vector sums to 1.02 and is used as-is; downstream thresholds and
//! the pinned factor values below assume these exact weights.

use std::collections::HashSet;

use crate::models::{Agent, AgentStats, AgentStatus};

pub const W_INTENT: f64 = 0.25;
pub const W_GEO: f64 = 0.20;
pub const W_SUCCESS: f64 = 0.14;
pub const W_DESCRIPTION: f64 = 0.10;
pub const W_CATEGORY: f64 = 0.10;
pub const W_RATING: f64 = 0.09;
pub const W_TAG: f64 = 0.07;
pub const W_LATENCY: f64 = 0.03;
pub const W_FRAUD: f64 = 0.04;

/// Minimum total score for an agent to appear in results.
pub const SCORE_CUTOFF: f64 = 0.4;
/// Minimum geo factor when the request carries a location.
pub const GEO_CUTOFF: f64 = 0.3;
/// Penalty subtracted from the total while an agent is quarantined.
pub const QUARANTINE_PENALTY: f64 = 0.3;

/// Trigram-based intent similarity is discounted against the hierarchical
/// score before taking the better of the two.
const TRIGRAM_DISCOUNT: f64 = 0.85;
/// Weight of the best fuzzy token pair added on top of token-set Jaccard.
const TOKEN_PAIR_BONUS: f64 = 0.3;
/// Fuzzy token matching only considers tokens of at least this length.
const MIN_TOKEN_LEN: usize = 3;
/// The description overlap denominator saturates at this many query tokens.
const MAX_DESCRIPTION_TOKENS: usize = 10;

/// The consumer-supplied side of the score computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreRequest<'a> {
    pub intents: Option<&'a [String]>,
    pub categories: &'a [String],
    pub tags: &'a [String],
    pub location: Option<&'a str>,
    pub description: Option<&'a str>,
}

/// Per-factor breakdown of a computed score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreBreakdown {
    pub intent: f64,
    pub geo: f64,
    pub success: f64,
    pub description: f64,
    pub category: f64,
    pub rating: f64,
    pub tag: f64,
    pub latency: f64,
    pub fraud: f64,
    pub total: f64,
}

/// Compute the full weighted score for one agent.
///
/// `stats` may be absent for freshly registered agents; `fraud_percentage`
/// is 0 outside production.
pub fn score_agent(
    request: &ScoreRequest<'_>,
    agent: &Agent,
    stats: Option<&AgentStats>,
    fraud_percentage: f64,
) -> ScoreBreakdown {
    let intent = match request.intents {
        Some(list) if !list.is_empty() => intent_factor(list, &agent.intents),
        _ => 0.5,
    };
    let geo = geo_score(request.location, &agent.location_scope);
    let (success, rating, latency) = match stats {
        Some(s) if s.calls_total > 0 => (
            s.success_rate(),
            s.avg_rating,
            latency_factor(s.avg_latency_ms),
        ),
        _ => (0.0, 0.0, 0.0),
    };
    let description = description_score(request.description, agent);
    let category = list_similarity(request.categories, &agent.categories);
    let tag = list_similarity(request.tags, &agent.tags);
    let fraud = 1.0 - fraud_percentage / 100.0;

    let mut total = W_INTENT * intent
        + W_GEO * geo
        + W_SUCCESS * success
        + W_DESCRIPTION * description
        + W_CATEGORY * category
        + W_RATING * rating
        + W_TAG * tag
        + W_LATENCY * latency
        + W_FRAUD * fraud;

    if agent.lifecycle() == AgentStatus::Quarantine {
        total = (total - QUARANTINE_PENALTY).max(0.0);
    }

    ScoreBreakdown {
        intent,
        geo,
        success,
        description,
        category,
        rating,
        tag,
        latency,
        fraud,
        total,
    }
}

/// Round for presentation; ranking uses the unrounded total.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// Best intent match over all requested intents: the hierarchical score or
/// the discounted trigram score, whichever is higher.
pub fn intent_factor(requested: &[String], agent_intents: &[String]) -> f64 {
    requested
        .iter()
        .map(|wanted| {
            let hierarchical = agent_intents
                .iter()
                .map(|have| hierarchical_intent_score(wanted, have))
                .fold(0.0, f64::max);
            let trigram = agent_intents
                .iter()
                .map(|have| trigram_intent_score(wanted, have))
                .fold(0.0, f64::max);
            hierarchical.max(TRIGRAM_DISCOUNT * trigram)
        })
        .fold(0.0, f64::max)
}

/// Dotted-path comparison: exact 1.0, same first two segments 0.6, same
/// first segment 0.3, else 0.0.
pub fn hierarchical_intent_score(wanted: &str, have: &str) -> f64 {
    let wanted = wanted.trim().to_lowercase();
    let have = have.trim().to_lowercase();
    if wanted.is_empty() || have.is_empty() {
        return 0.0;
    }
    if wanted == have {
        return 1.0;
    }
    let w: Vec<&str> = wanted.split('.').collect();
    let h: Vec<&str> = have.split('.').collect();
    if w.len() >= 2 && h.len() >= 2 && w[0] == h[0] && w[1] == h[1] {
        0.6
    } else if w[0] == h[0] {
        0.3
    } else {
        0.0
    }
}

/// Fuzzy comparison of two dotted intents: Jaccard over their word tokens,
/// plus a capped bonus for the closest non-identical token pair.
pub fn trigram_intent_score(wanted: &str, have: &str) -> f64 {
    let wanted_tokens = intent_tokens(wanted);
    let have_tokens = intent_tokens(have);
    if wanted_tokens.is_empty() || have_tokens.is_empty() {
        return 0.0;
    }

    let jaccard = jaccard_similarity(&wanted_tokens, &have_tokens);

    let mut best_pair = 0.0_f64;
    for w in &wanted_tokens {
        for h in &have_tokens {
            if w != h {
                best_pair = best_pair.max(trigram_token_similarity(w, h));
            }
        }
    }

    (jaccard + best_pair * TOKEN_PAIR_BONUS).min(1.0)
}

/// Split an intent on `.`/`_`/`-`/whitespace, lowercase, drop short tokens.
fn intent_tokens(intent: &str) -> HashSet<String> {
    intent
        .to_lowercase()
        .split(|c: char| c == '.' || c == '_' || c == '-' || c.is_whitespace())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

/// Character-trigram similarity between two word tokens. Tokens are padded
/// with a leading and trailing space before windowing.
fn trigram_token_similarity(a: &str, b: &str) -> f64 {
    jaccard_similarity(&char_trigrams(a), &char_trigrams(b))
}

fn char_trigrams(token: &str) -> HashSet<String> {
    let padded: Vec<char> = format!(" {token} ").chars().collect();
    padded
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

// ---------------------------------------------------------------------------
// Description
// ---------------------------------------------------------------------------

/// Token overlap of the free-text query against the agent's description,
/// tags, and categories. A request without a description scores a neutral
/// 0.5.
pub fn description_score(request_description: Option<&str>, agent: &Agent) -> f64 {
    let Some(query) = request_description.map(str::trim).filter(|s| !s.is_empty()) else {
        return 0.5;
    };

    let query_tokens = text_tokens(query);
    if query_tokens.is_empty() {
        return 0.0;
    }

    let mut agent_tokens: HashSet<String> = text_tokens(&agent.description).into_iter().collect();
    for tag in &agent.tags {
        agent_tokens.extend(text_tokens(tag));
    }
    for category in &agent.categories {
        agent_tokens.extend(text_tokens(category));
    }

    let overlap = query_tokens
        .iter()
        .filter(|t| agent_tokens.contains(*t))
        .count();
    if overlap == 0 {
        return 0.0;
    }

    let denominator = query_tokens.len().min(MAX_DESCRIPTION_TOKENS);
    (overlap as f64 / denominator as f64).min(1.0)
}

/// Lowercase and split on every run of non-ASCII-alphanumeric characters
/// (accented characters act as separators), dropping short tokens.
fn text_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Category / tag lists
// ---------------------------------------------------------------------------

/// Tokenized overlap between a requested list and an agent list. An empty
/// request matches everything; an empty agent list matches nothing.
pub fn list_similarity(search_list: &[String], agent_list: &[String]) -> f64 {
    if search_list.is_empty() {
        return 1.0;
    }
    if agent_list.is_empty() {
        return 0.0;
    }

    let search_tokens: Vec<String> = search_list.iter().flat_map(|s| text_tokens(s)).collect();
    if search_tokens.is_empty() {
        return 0.5;
    }
    let agent_tokens: Vec<String> = agent_list.iter().flat_map(|s| text_tokens(s)).collect();

    let matches = search_tokens
        .iter()
        .filter(|s| {
            agent_tokens
                .iter()
                .any(|a| a == *s || a.contains(*s) || s.contains(a))
        })
        .count();

    matches as f64 / search_tokens.len() as f64
}

// ---------------------------------------------------------------------------
// Geo
// ---------------------------------------------------------------------------

/// Location match between the requested location and the agent's scope.
///
/// When either side is missing the score is a neutral 0.5, except for an
/// explicit request for `Global`, which scores 1.0. A `Global` agent always
/// scores 0.3 against a concrete requested location. Otherwise both sides
/// split on `,`/`/` and the agent parts read as `[city, state?, …, country]`.
pub fn geo_score(requested: Option<&str>, agent_scope: &str) -> f64 {
    let Some(requested) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
        return 0.5;
    };
    let agent_scope = agent_scope.trim();

    if agent_scope.is_empty() {
        return if requested.eq_ignore_ascii_case("global") {
            1.0
        } else {
            0.5
        };
    }

    if agent_scope.eq_ignore_ascii_case("global") {
        return 0.3;
    }

    let agent_parts = location_parts(agent_scope);
    if agent_parts.is_empty() {
        return 0.5;
    }
    let city = &agent_parts[0];
    let country = &agent_parts[agent_parts.len() - 1];
    let states: &[String] = if agent_parts.len() > 2 {
        &agent_parts[1..agent_parts.len() - 1]
    } else {
        &[]
    };

    let mut best = 0.0_f64;
    for variant in location_parts(requested) {
        let score = if variant == *city {
            1.0
        } else if states
            .iter()
            .any(|s| *s == variant || s.contains(&variant) || variant.contains(s.as_str()))
        {
            0.6
        } else if variant == *country
            || country.contains(&variant)
            || variant.contains(country.as_str())
        {
            0.3
        } else {
            0.2
        };
        best = best.max(score);
    }
    best
}

fn location_parts(location: &str) -> Vec<String> {
    location
        .split(|c: char| c == ',' || c == '/')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Latency
// ---------------------------------------------------------------------------

/// Bucketed latency factor over the running mean.
pub fn latency_factor(avg_latency_ms: f64) -> f64 {
    if avg_latency_ms <= 500.0 {
        1.0
    } else if avg_latency_ms <= 1500.0 {
        0.7
    } else if avg_latency_ms <= 3000.0 {
        0.4
    } else {
        0.2
    }
}
