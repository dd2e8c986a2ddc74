use std::time::Instant;

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task;
use uuid::Uuid;

use crate::core::bridge::{self, BridgeConfig};
use crate::services::orchestrator::TaskOrchestrator;
use crate::services::settings;
use crate::utils::log_helpers::{log_stream_begin, log_stream_complete};
use crate::utils::sse::sse_channel;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
    use_orchestrator: Option<bool>,
}

pub fn router() -> Router {
    Router::new().route("/api/stream", post(stream_chat))
}

async fn stream_chat(
    Json(req): Json<ChatRequest>,
) -> Result<
    axum::response::Sse<
        impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
    >,
    (StatusCode, Json<Value>),
> {
    let message = req.message.unwrap_or_default();
    if message.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message must not be empty"})),
        ));
    }
    let use_orchestrator = req.use_orchestrator.unwrap_or(false);

    let request_id = Uuid::new_v4().to_string();
    log_stream_begin(&request_id, message.len(), use_orchestrator);

    let (sse, sender) = sse_channel();
    task::spawn(async move {
        let started = Instant::now();
        if use_orchestrator {
            bridge::run_orchestrated_with(
                sender,
                BridgeConfig::orchestrated(),
                || TaskOrchestrator::from_settings(&settings::current()),
                message,
            )
            .await;
        } else {
            bridge::run_single_with(sender, BridgeConfig::single(), move |sink| {
                let agent =
                    crate::services::agent::OpenRouterAgent::from_settings(&settings::current())?;
                agent.run(&message, Some(&sink))
            })
            .await;
        }
        log_stream_complete(&request_id, started.elapsed().as_secs_f64());
    });

    Ok(sse)
}
