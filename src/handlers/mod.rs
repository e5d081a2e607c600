use std::future::Future;
use std::time::Duration;

use actix_web::HttpResponse;
use chrono::Utc;

use crate::error::AppError;

pub mod agents;
pub mod auth;
pub mod feedback;
pub mod search;



pub use agents::configure_agent_routes;
pub use auth::configure_auth_routes;
pub use feedback::configure_feedback_routes;
pub use search::configure_search_routes;

/// GET /health - public liveness probe
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

/// Run handler work under the request-scoped deadline; an elapsed deadline
/// surfaces as TIMEOUT (504) and the underlying transaction rolls back.
pub(crate) async fn with_timeout<T>(
    timeout_secs: u64,
    fut: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    tokio::time::timeout(Duration::from_secs(timeout_secs), fut)
        .await
        .map_err(|_| AppError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn with_timeout_passes_results_through() {
        let ok = with_timeout(5, async { Ok::<_, AppError>(42) }).await;
        assert!(matches!(ok, Ok(42)));

        let err = with_timeout(5, async { Err::<i32, _>(AppError::RateLimited) }).await;
        assert!(matches!(err, Err(AppError::RateLimited)));
    }

    #[actix_rt::test]
    async fn with_timeout_maps_elapsed_deadline() {
        let slow = with_timeout(0, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(slow, Err(AppError::Timeout)));
    }

    #[actix_rt::test]
    async fn health_check_reports_ok() {
        let resp = health_check().await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
    }
}
