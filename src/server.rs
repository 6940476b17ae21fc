use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::data::{AssignmentRecord, TimetableRequest};
use crate::error::TimetableError;
use crate::solver::{self, CancelFlag, SolveSettings};

#[derive(Debug, Clone)]
pub struct AppState {
    settings: SolveSettings,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "UP" })
}

/// Raises the request's cancel flag when the handler future is dropped,
/// which is what happens when the client goes away mid-search.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn generate_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TimetableRequest>, JsonRejection>,
) -> Result<Json<Vec<AssignmentRecord>>, TimetableError> {
    let Json(request) = payload.map_err(|e| TimetableError::validation(e.body_text()))?;
    info!(
        "Received timetable request: {} staff, {} break periods",
        request.staff.len(),
        request.break_periods.len()
    );

    let cancel = CancelFlag::new();
    let _guard = CancelOnDrop(cancel.clone());
    let settings = state.settings;
    let outcome =
        tokio::task::spawn_blocking(move || solver::solve(&request, &settings, &cancel)).await;

    match outcome {
        Ok(Ok(records)) => Ok(Json(records)),
        Ok(Err(e)) => {
            if let TimetableError::Internal(detail) = &e {
                error!("Timetable generation failed: {detail}");
            }
            Err(e)
        }
        Err(join_error) => {
            error!("Solver task did not complete: {join_error}");
            Err(TimetableError::Internal(join_error.to_string()))
        }
    }
}

pub fn router(settings: SolveSettings) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/generate-timetable", post(generate_handler))
        .with_state(Arc::new(AppState { settings }))
        .layer(cors)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
}

pub async fn run_server(config: &Config) -> std::io::Result<()> {
    let app = router(config.solve_settings());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
