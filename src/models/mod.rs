pub mod agent;
pub mod caller;
pub mod feedback;
pub mod health;
pub mod search;

pub use agent::{Agent, AgentStats, AgentStatus, RegisterAgentRequest, RegisterAgentResponse};
pub use caller::{Caller, CallerType};
pub use feedback::{Feedback, FeedbackRequest, FraudDetection, FraudSeverity, FraudType};
pub use health::{AgentHealthReport, HealthMetrics, QuarantineRisk};
pub use search::{IntentFilter, SearchRequest, SearchResultItem};
