pub mod agent_registry;
pub mod crypto;
pub mod feedback;
pub mod fraud;
pub mod identity;
pub mod review;
pub mod scoring;
pub mod search;
pub mod tokens;

pub use agent_registry::{AgentRegistryError, AgentRegistryService};
pub use crypto::{CryptoError, CryptoService};
pub use feedback::{FeedbackError, FeedbackService};
pub use fraud::{decreasing_weight, FraudAssessment, FraudError, FraudService};
pub use identity::{caller_id, derive_identifier, IdentityError, IdentityService};
pub use review::{
    ban_trigger, health_score, quarantine_trigger, reactivation_eligible, HealthSnapshot,
    ReviewError, ReviewJob, ReviewJobConfig, ReviewService, ReviewSummary,
};
pub use scoring::{score_agent, ScoreBreakdown, ScoreRequest};
pub use search::{SearchError, SearchService};
pub use tokens::{
    ConsumerSession, ProviderSession, Session, TokenError, TokenService, EXECUTION_KEY_TTL_SECS,
    SESSION_TTL_HOURS,
};
