use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::models::FeedbackRequest;
use crate::services::{ConsumerSession, FeedbackError, FeedbackService};
use crate::AppState;

use super::with_timeout;

/// POST /feedback (consumer)
pub async fn submit_feedback(
    state: web::Data<AppState>,
    session: ConsumerSession,
    body: web::Json<FeedbackRequest>,
) -> Result<HttpResponse, AppError> {
    let service = FeedbackService::new(state.db.clone(), state.config.is_production());

    with_timeout(state.config.request_timeout_secs, async move {
        service
            .submit(&session.0.caller_id, &body.into_inner())
            .await
            .map_err(|e| match e {
                FeedbackError::Validation(msg) => AppError::Validation(msg),
                FeedbackError::RateLimited => AppError::RateLimited,
                FeedbackError::AgentNotFound(id) => {
                    AppError::NotFound(format!("Agent not found: {id}"))
                }
                FeedbackError::SpamBlocked => AppError::BlockedSpam(
                    "Too many feedbacks for this agent, try again later".to_string(),
                ),
                FeedbackError::Database(e) => AppError::Database(e),
            })
    })
    .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

/// Configure feedback routes
pub fn configure_feedback_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/feedback", web::post().to(submit_feedback));
}
