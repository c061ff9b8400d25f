//! # Health Check Endpoint
//!
//! Liveness probe for load balancers and deployment checks. Reports the
//! realtime session occupancy alongside the status so a dashboard can see
//! capacity at a glance.

use actix_web::{web, HttpResponse, Result};
use serde_json::json;
use tracing::debug;

use crate::state::AppState;

/// GET /api/health
///
/// Always returns 200 while the process is serving requests.
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let active = state.registry.size();
    debug!("health check: {} sessions active", active);

    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "activeSessions": active,
        "maxSessions": state.registry.max_sessions(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_session_occupancy() {
        let state = AppState::for_tests(AppConfig::default());
        state.registry.admit("probe-session");

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeSessions"], 1);
        assert_eq!(body["maxSessions"], 2);
        // The payload shape is fixed; monitors key on exactly these fields.
        assert_eq!(body.as_object().unwrap().len(), 3);
    }
}
