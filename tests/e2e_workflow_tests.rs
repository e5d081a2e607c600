//! End-to-End Workflow Integration Tests
//!
//! These tests drive complete journeys through the registry: provider token
//! issuance, agent registration, consumer search with execution keys,
//! feedback with stats updates, and the public health report.
//! Run with: `cargo test --test e2e_workflow_tests -- --ignored`

use actix_web::{test, web, App};
use serde_json::json;
use sqlx::PgPool;

use agenthub::config::{Config, Environment};
use agenthub::{handlers, AppState};

const TEST_SECRET: &str = "integration-test-master-secret!!";

// ============================================================================
// Test Helpers
// ============================================================================

/// Helper to create a test database pool
async fn try_create_test_pool() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => return None,
    };

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .ok()
}

fn test_config() -> Config {
    Config {
        environment: Environment::Development,
        jwt_secret: TEST_SECRET.to_string(),
        database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
        database_max_connections: 5,
        host: "127.0.0.1".to_string(),
        port: 3000,
        trust_proxy: true,
        search_debug: false,
        request_timeout_secs: 10,
        auto_review_enabled: false,
        auto_review_interval_hours: 24,
    }
}

fn unique_run() -> String {
    format!("{:016x}", rand::random::<u64>())
}

macro_rules! registry_app {
    ($pool:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState {
                    db: $pool.clone(),
                    config: test_config(),
                }))
                .route("/health", web::get().to(handlers::health_check))
                .configure(handlers::configure_auth_routes)
                .configure(handlers::configure_agent_routes)
                .configure(handlers::configure_search_routes)
                .configure(handlers::configure_feedback_routes),
        )
        .await
    };
}

async fn cleanup_run(pool: &PgPool, run: &str) {
    // Caller deletes cascade through agents, stats, feedback, fraud log.
    let _ = sqlx::query("DELETE FROM callers WHERE identifier LIKE $1")
        .bind(format!("%{run}%"))
        .execute(pool)
        .await;
}

// ============================================================================
// Journey: provider registers, consumer searches, feedback folds into stats
// ============================================================================

#[ignore]
#[actix_rt::test]
async fn register_search_feedback_health_journey() {
    let Some(pool) = try_create_test_pool().await else {
        eprintln!("Skipping test: database not available");
        return;
    };

    let run = unique_run();
    let agent_id = format!("e2e:weather:{run}");
    let app = registry_app!(pool);

    // Provider obtains a session token, supplying its signing secret.
    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("x-client-id", format!("e2e-provider-{run}")))
        .insert_header(("x-forwarded-for", "203.0.113.10"))
        .insert_header(("x-provider-secret", "e2e-provider-signing-secret"))
        .set_json(json!({ "type": "provider" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let provider_token = body["token"].as_str().unwrap().to_string();
    assert_eq!(body["expires_in"], "24h");

    // Provider registers an agent.
    let req = test::TestRequest::post()
        .uri("/register")
        .insert_header(("Authorization", format!("Bearer {provider_token}")))
        .set_json(json!({
            "id": agent_id.as_str(),
            "name": "E2E Weather",
            "endpoint": "https://weather.example.com/execute",
            "description": "Weather forecasts for testing",
            "intents": ["weather.forecast"],
            "tasks": ["forecast"],
            "tags": ["weather"],
            "categories": ["weather"],
            "location_scope": "Global",
            "languages": ["en"],
            "version": "1.0.0",
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["id"], agent_id.as_str());
    assert_eq!(body["jwt_token"], provider_token.as_str());

    // A stats row exists with zeros.
    let calls_total: i64 =
        sqlx::query_scalar("SELECT calls_total FROM agent_stats WHERE agent_id = $1")
            .bind(&agent_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(calls_total, 0);

    // Consumer obtains a session token.
    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("x-client-id", format!("e2e-consumer-{run}")))
        .insert_header(("x-forwarded-for", "203.0.113.11"))
        .set_json(json!({ "type": "consumer" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let consumer_token = body["token"].as_str().unwrap().to_string();

    // Consumer searches by intent and category.
    let req = test::TestRequest::post()
        .uri("/search")
        .insert_header(("Authorization", format!("Bearer {consumer_token}")))
        .set_json(json!({ "intent": "weather.forecast", "categories": ["weather"] }))
        .to_request();
    let results: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let hit = results
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == agent_id.as_str())
        .expect("registered agent is searchable")
        .clone();

    assert_eq!(hit["score"].as_f64().unwrap(), 0.61);
    let execution_key = hit["execution_key"].as_str().unwrap();
    assert!(!execution_key.is_empty());
    // Three dot-separated JWT segments.
    assert_eq!(execution_key.split('.').count(), 3);

    // Key expiry is at most five minutes out.
    let expires_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(hit["key_expires_at"].clone()).unwrap();
    let ttl = expires_at - chrono::Utc::now();
    assert!(ttl <= chrono::Duration::seconds(300));
    assert!(ttl > chrono::Duration::seconds(0));

    // Three perfect feedbacks.
    for _ in 0..3 {
        let req = test::TestRequest::post()
            .uri("/feedback")
            .insert_header(("Authorization", format!("Bearer {consumer_token}")))
            .set_json(json!({
                "agent_id": agent_id.as_str(),
                "success": true,
                "latency_ms": 100.0,
                "rating": 1.0,
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
    }

    // Stats reflect the running means.
    let row: (i64, i64, f64, f64) = sqlx::query_as(
        "SELECT calls_total, calls_success, avg_latency_ms, avg_rating
         FROM agent_stats WHERE agent_id = $1",
    )
    .bind(&agent_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.0, 3);
    assert_eq!(row.1, 3);
    assert!((row.2 - 100.0).abs() < 1e-9);
    assert!((row.3 - 1.0).abs() < 1e-9);

    // Searching again now ranks the agent higher.
    let req = test::TestRequest::post()
        .uri("/search")
        .insert_header(("Authorization", format!("Bearer {consumer_token}")))
        .set_json(json!({ "intent": "weather.forecast", "categories": ["weather"] }))
        .to_request();
    let results: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let hit = results
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == agent_id.as_str())
        .unwrap();
    assert_eq!(hit["score"].as_f64().unwrap(), 0.87);

    // Public health report.
    let req = test::TestRequest::get()
        .uri(&format!("/agents/{agent_id}/health"))
        .to_request();
    let report: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["agent_id"], agent_id.as_str());
    assert_eq!(report["status"], "active");
    assert_eq!(report["metrics"]["total_feedbacks"], 3);
    assert_eq!(report["quarantine_risk"], "low");
    assert!(report["health_score"].as_f64().unwrap() > 0.9);

    cleanup_run(&pool, &run).await;
}

// ============================================================================
// Journey: re-registration overwrites metadata but keeps stats
// ============================================================================

#[ignore]
#[actix_rt::test]
async fn reregistration_overwrites_fields_and_keeps_stats() {
    let Some(pool) = try_create_test_pool().await else {
        eprintln!("Skipping test: database not available");
        return;
    };

    let run = unique_run();
    let agent_id = format!("e2e:rereg:{run}");
    let app = registry_app!(pool);

    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("x-client-id", format!("e2e-rereg-{run}")))
        .insert_header(("x-forwarded-for", "203.0.113.12"))
        .insert_header(("x-provider-secret", "rereg-secret"))
        .set_json(json!({ "type": "provider" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let provider_token = body["token"].as_str().unwrap().to_string();

    let register = |description: &str| {
        json!({
            "id": agent_id.as_str(),
            "name": "Re-registered",
            "endpoint": "https://rereg.example.com/execute",
            "description": description,
            "intents": ["travel.flight.search"],
            "categories": ["travel"],
            "location_scope": "Lisbon,Portugal",
            "languages": ["en", "pt"],
            "version": "2.0.0",
        })
    };

    for description in ["first description", "second description"] {
        let req = test::TestRequest::post()
            .uri("/register")
            .insert_header(("Authorization", format!("Bearer {provider_token}")))
            .set_json(register(description))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    let (description, status, calls_total): (String, String, i64) = sqlx::query_as(
        r#"
        SELECT a.description, a.status, s.calls_total
        FROM agents a JOIN agent_stats s ON s.agent_id = a.id
        WHERE a.id = $1
        "#,
    )
    .bind(&agent_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(description, "second description");
    assert_eq!(status, "active");
    assert_eq!(calls_total, 0);

    cleanup_run(&pool, &run).await;
}

// ============================================================================
// Journey: invalid registrations and role mismatches are rejected
// ============================================================================

#[ignore]
#[actix_rt::test]
async fn validation_and_role_errors() {
    let Some(pool) = try_create_test_pool().await else {
        eprintln!("Skipping test: database not available");
        return;
    };

    let run = unique_run();
    let app = registry_app!(pool);

    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("x-client-id", format!("e2e-errors-{run}")))
        .insert_header(("x-forwarded-for", "203.0.113.13"))
        .insert_header(("x-provider-secret", "errors-secret"))
        .set_json(json!({ "type": "provider" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let provider_token = body["token"].as_str().unwrap().to_string();

    // Registration without a single intent fails validation.
    let req = test::TestRequest::post()
        .uri("/register")
        .insert_header(("Authorization", format!("Bearer {provider_token}")))
        .set_json(json!({
            "id": format!("e2e:bad:{run}"),
            "name": "Bad",
            "endpoint": "https://bad.example.com",
            "description": "no intents",
            "intents": [],
            "categories": ["misc"],
            "location_scope": "Global",
            "languages": ["en"],
            "version": "1.0.0",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

    // A provider token cannot search.
    let req = test::TestRequest::post()
        .uri("/search")
        .insert_header(("Authorization", format!("Bearer {provider_token}")))
        .set_json(json!({ "categories": ["misc"] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::FORBIDDEN);

    // Registration without any token is unauthorized.
    let req = test::TestRequest::post()
        .uri("/register")
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);

    // Feedback for a nonexistent agent is a 404.
    let req = test::TestRequest::post()
        .uri("/auth/token")
        .insert_header(("x-client-id", format!("e2e-errors-consumer-{run}")))
        .insert_header(("x-forwarded-for", "203.0.113.14"))
        .set_json(json!({ "type": "consumer" }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let consumer_token = body["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/feedback")
        .insert_header(("Authorization", format!("Bearer {consumer_token}")))
        .set_json(json!({
            "agent_id": format!("e2e:ghost:{run}"),
            "success": true,
            "latency_ms": 10.0,
            "rating": 0.5,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

    // Unknown agent health is a 404.
    let req = test::TestRequest::get()
        .uri(&format!("/agents/e2e:ghost:{run}/health"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

    cleanup_run(&pool, &run).await;
}

// ============================================================================
// Journey: liveness probe
// ============================================================================

#[ignore]
#[actix_rt::test]
async fn health_endpoint_is_public() {
    let Some(pool) = try_create_test_pool().await else {
        eprintln!("Skipping test: database not available");
        return;
    };

    let app = registry_app!(pool);
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}
