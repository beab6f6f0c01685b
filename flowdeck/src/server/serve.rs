//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::EngineError;
use crate::server::handlers::*;
use crate::server::state::ServerState;

/// Build the router with all routes and middleware
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route("/projects", get(list_projects_handler))
        .route("/projects/{slug}", get(project_handler))
        .route("/projects/{slug}/health", get(project_health_handler))
        .route("/projects/{slug}/deployments", get(project_deployments_handler))
        .route("/projects/{slug}/rollback-points", get(rollback_points_handler))
        .route("/projects/{slug}/deploy", post(deploy_handler))
        .route("/projects/{slug}/rollback", post(rollback_handler))
        .route("/projects/{slug}/stop", post(stop_handler))
        .route("/projects/{slug}/start", post(start_handler))
        .route("/projects/{slug}/restart", post(restart_handler))
        .route("/projects/{slug}/cleanup", post(cleanup_handler))
        // Deployments
        .route("/deployments/{id}", get(deployment_handler))
        .route("/deployments/{id}/logs", get(deployment_logs_handler))
        .route("/deployments/{id}/cancel", post(cancel_handler))
        // Scripts
        .route("/scripts", get(list_scripts_handler).post(create_script_handler))
        .route("/scripts/variables", get(variables_handler))
        .route("/scripts/templates", get(templates_handler))
        .route("/scripts/templates/{key}", post(generate_from_template_handler))
        // State and middleware
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::ServerError(format!("cannot bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| EngineError::ServerError(e.to_string()))
    });

    Ok(handle)
}
