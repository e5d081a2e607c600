//! agenthub - discovery and trust registry for self-registered HTTP agents
//!
//! Providers register agents; consumers search by intent and receive ranked
//! results with short-lived execution keys; post-execution feedback feeds
//! per-agent statistics and the quarantine state machine.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

pub use config::{Config, Environment};
pub use error::AppError;

pub use models::{
    Agent, AgentHealthReport, AgentStats, AgentStatus, Caller, CallerType, Feedback,
    FeedbackRequest, RegisterAgentRequest, SearchRequest, SearchResultItem,
};

pub use services::{
    AgentRegistryService, CryptoService, FeedbackService, FraudService, IdentityService,
    ReviewJob, ReviewJobConfig, ReviewService, SearchService, TokenService,
};

/// Application state shared across handlers
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Config,
}
