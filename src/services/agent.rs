use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::core::error::AgentError;
use crate::core::relay::{ToolEvent, ToolEventSink};
use crate::services::settings::AgentSettings;
use crate::services::tools;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const LOG_TRUNCATE: usize = 300;

/// Blocking chat-completions client against an OpenRouter-compatible API,
/// with a bounded function-calling tool loop. Construct and run it on a
/// worker thread only; the client blocks.
pub struct OpenRouterAgent {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: i64,
    max_iterations: u32,
}

impl OpenRouterAgent {
    pub fn from_settings(settings: &AgentSettings) -> Result<Self, AgentError> {
        if settings.api_key.trim().is_empty() {
            return Err(AgentError::Init(
                "OpenRouter API key is not configured".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Init(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_iterations: Config::get().agent_max_iterations,
        })
    }

    /// Runs one conversation turn to completion. Every tool invocation is
    /// mirrored into `sink` as a start/complete pair while it happens.
    pub fn run(&self, message: &str, sink: Option<&ToolEventSink>) -> Result<String, AgentError> {
        let mut messages = vec![
            json!({
                "role": "system",
                "content": "You are a helpful assistant. Use the available tools when they \
                            help answer the question, then reply concisely."
            }),
            json!({"role": "user", "content": message}),
        ];

        for iteration in 0..self.max_iterations {
            let reply = self.chat_completion(&messages, Some(tools::tool_schemas()))?;

            let tool_calls = reply
                .get("tool_calls")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if tool_calls.is_empty() {
                let content = reply
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if content.is_empty() {
                    return Err(AgentError::Execution(
                        "model returned an empty completion".to_string(),
                    ));
                }
                info!(
                    "[AGENT] completed after {} iteration(s), {} chars",
                    iteration + 1,
                    content.len()
                );
                return Ok(content);
            }

            messages.push(reply.clone());
            for call in &tool_calls {
                let (id, name, args) = parse_tool_call(call);
                if let Some(sink) = sink {
                    sink.record(ToolEvent::start(&name, args.clone()));
                }
                let output = match tools::execute(&name, &args) {
                    Ok(output) => output,
                    Err(err) => {
                        warn!("[AGENT] tool {} failed: {}", name, err);
                        format!("Tool error: {err}")
                    }
                };
                if let Some(sink) = sink {
                    sink.record(ToolEvent::complete(&name, args));
                }
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": output,
                }));
            }
        }

        Err(AgentError::Execution(format!(
            "tool loop exceeded {} iterations",
            self.max_iterations
        )))
    }

    /// One completion without tools, used for decomposition and synthesis
    /// prompts.
    pub fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        let messages = vec![json!({"role": "user", "content": prompt})];
        let reply = self.chat_completion(&messages, None)?;
        let content = reply
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return Err(AgentError::Execution(
                "model returned an empty completion".to_string(),
            ));
        }
        Ok(content)
    }

    fn chat_completion(
        &self,
        messages: &[Value],
        tool_schemas: Option<Vec<Value>>,
    ) -> Result<Value, AgentError> {
        let payload = build_payload(
            &self.model,
            messages,
            tool_schemas,
            self.temperature,
            self.max_tokens,
        );
        let url = format!("{}/chat/completions", self.base_url);
        info!("[AGENT] request: model={}, url={}", self.model, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|e| AgentError::Execution(format!("request to OpenRouter failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AgentError::Execution(format!(
                "OpenRouter returned status {}: {}",
                status,
                truncate(&body, LOG_TRUNCATE)
            )));
        }

        let body: Value = response
            .json()
            .map_err(|e| AgentError::Execution(format!("invalid JSON from OpenRouter: {e}")))?;
        body.get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .cloned()
            .ok_or_else(|| {
                AgentError::Execution("OpenRouter response carried no completion".to_string())
            })
    }
}

fn build_payload(
    model: &str,
    messages: &[Value],
    tool_schemas: Option<Vec<Value>>,
    temperature: f64,
    max_tokens: i64,
) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "max_tokens": max_tokens,
    });
    if let Some(schemas) = tool_schemas {
        if !schemas.is_empty() {
            payload["tools"] = Value::Array(schemas);
            payload["tool_choice"] = Value::String("auto".to_string());
        }
    }
    payload
}

/// Extracts `(id, name, args)` from one tool call; malformed argument JSON
/// degrades to an empty object so a bad call cannot abort the run.
fn parse_tool_call(call: &Value) -> (String, String, Value) {
    let id = call
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let name = call
        .get("function")
        .and_then(|f| f.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let args = call
        .get("function")
        .and_then(|f| f.get("arguments"))
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| json!({}));
    (id, name, args)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
