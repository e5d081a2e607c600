use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::models::SearchRequest;
use crate::services::{ConsumerSession, SearchError, SearchService};
use crate::AppState;

use super::with_timeout;

/// POST /search (consumer)
///
/// Returns the ranked candidate list, each entry carrying an execution key
/// minted for this consumer.
pub async fn search_agents(
    state: web::Data<AppState>,
    session: ConsumerSession,
    body: web::Json<SearchRequest>,
) -> Result<HttpResponse, AppError> {
    let service = SearchService::new(state.db.clone(), &state.config);

    let results = with_timeout(state.config.request_timeout_secs, async move {
        service
            .search(&session.0.caller_id, &body.into_inner())
            .await
            .map_err(|e| match e {
                SearchError::Validation(msg) => AppError::Validation(msg),
                SearchError::Token(e) => AppError::Internal(e.to_string()),
                SearchError::Database(e) => AppError::Database(e),
            })
    })
    .await?;

    Ok(HttpResponse::Ok().json(results))
}

/// Configure search routes
pub fn configure_search_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/search", web::post().to(search_agents));
}
