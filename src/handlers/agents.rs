use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::models::{RegisterAgentRequest, RegisterAgentResponse};
use crate::services::{AgentRegistryError, AgentRegistryService, ProviderSession, ReviewService};
use crate::AppState;

use super::with_timeout;

/// POST /register (provider)
///
/// Upserts an agent under the authenticated provider. The response echoes
/// the provider's current bearer so it can store it for auditing.
pub async fn register_agent(
    state: web::Data<AppState>,
    session: ProviderSession,
    body: web::Json<RegisterAgentRequest>,
) -> Result<HttpResponse, AppError> {
    let registry = AgentRegistryService::new(state.db.clone(), state.config.is_production());
    let provider_caller_id = session.0.caller_id.clone();

    let id = with_timeout(
        state.config.request_timeout_secs,
        async move {
            registry
                .register(&provider_caller_id, body.into_inner())
                .await
                .map_err(|e| match e {
                    AgentRegistryError::Validation(msg) => AppError::Validation(msg),
                    AgentRegistryError::Database(e) => AppError::Database(e),
                })
        },
    )
    .await?;

    Ok(HttpResponse::Ok().json(RegisterAgentResponse {
        id,
        jwt_token: session.0.bearer,
    }))
}

/// GET /agents/{id}/health (public)
pub async fn agent_health(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let agent_id = path.into_inner();
    let review = ReviewService::new(state.db.clone(), state.config.is_production());

    let report = with_timeout(state.config.request_timeout_secs, async move {
        review
            .health_report(&agent_id)
            .await
            .map_err(|e| match e {
                crate::services::ReviewError::Database(e) => AppError::Database(e),
            })?
            .ok_or_else(|| AppError::NotFound("Agent not found".to_string()))
    })
    .await?;

    Ok(HttpResponse::Ok().json(report))
}

/// Configure agent routes
pub fn configure_agent_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/register", web::post().to(register_agent))
        .service(web::scope("/agents").route("/{id}/health", web::get().to(agent_health)));
}
