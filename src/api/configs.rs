use axum::http::StatusCode;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::core::bridge::Orchestration;
use crate::services::orchestrator::TaskOrchestrator;
use crate::services::settings::{self, AgentSettings};

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<i64>,
}

pub fn router() -> Router {
    Router::new()
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/orchestrator/status", get(orchestrator_status))
}

async fn get_config() -> Json<AgentSettings> {
    Json(settings::current())
}

async fn update_config(
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let current = settings::current();
    let next = AgentSettings {
        api_key: update.api_key,
        base_url: update.base_url,
        model: update.model,
        temperature: update.temperature.unwrap_or(current.temperature),
        max_tokens: update.max_tokens.unwrap_or(current.max_tokens),
    };
    match settings::update(next) {
        Ok(()) => {
            info!("[CONFIG] settings updated");
            Ok(Json(json!({"message": "Configuration saved successfully"})))
        }
        Err(err) => {
            warn!("[CONFIG] settings update failed: {}", err);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err})),
            ))
        }
    }
}

async fn orchestrator_status() -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match TaskOrchestrator::from_settings(&settings::current()) {
        Ok(orchestrator) => Ok(Json(json!({
            "num_agents": orchestrator.num_agents(),
            "aggregation_strategy": orchestrator.aggregation_strategy(),
            "task_timeout": orchestrator.task_timeout().as_secs(),
        }))),
        Err(err) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": err.to_string()})),
        )),
    }
}
