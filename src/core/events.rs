use serde::Serialize;
use serde_json::Value;

/// One protocol event on the client-facing stream. Serializes to the wire
/// shape `{"type": ..., "data": ...}`; unit variants carry no `data` key.
/// `Done` never serializes as JSON, it becomes the `[DONE]` sentinel frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(String),
    ClearStatus,
    Progress(ProgressUpdate),
    ToolUsage(ToolUsageHint),
    ClearToolUsage,
    Content(String),
    Error(String),
    Done,
}

/// Progress payload as the frontend expects it: `agent_id` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub agent_id: usize,
    pub status: String,
    pub total_agents: usize,
}

/// Display hint derived from a tool invocation. At most one of
/// `query`/`expression`/`filename` is set; the hint has no control-flow
/// effect, the raw `tool_args` travel alongside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUsageHint {
    pub event: String,
    pub tool_name: String,
    pub tool_args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ToolUsageHint {
    pub fn tool_start(tool_name: &str, tool_args: &Value) -> Self {
        let arg = |key: &str| {
            tool_args
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let query = arg("query");
        let expression = if query.is_none() { arg("expression") } else { None };
        let filename = if query.is_none() && expression.is_none() {
            arg("path")
        } else {
            None
        };
        Self {
            event: "tool_start".to_string(),
            tool_name: tool_name.to_string(),
            tool_args: tool_args.clone(),
            query,
            expression,
            filename,
        }
    }
}

impl StreamEvent {
    pub fn progress(worker_index: usize, label: &str, total_workers: usize) -> Self {
        StreamEvent::Progress(ProgressUpdate {
            agent_id: worker_index + 1,
            status: label.to_string(),
            total_agents: total_workers,
        })
    }

    /// The `data:` payload of the SSE record for this event. The transport
    /// wraps it as `"data: " + payload + "\n\n"`.
    pub fn to_sse_data(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamEvent::Done => Ok("[DONE]".to_string()),
            other => serde_json::to_string(other),
        }
    }
}

/// Splits a payload into word chunks for paced delivery. Each chunk keeps
/// the whitespace run that followed the word, so concatenating all chunks
/// reproduces the payload byte for byte.
pub fn chunk_words(payload: &str) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in payload.chars() {
        let at_boundary = !ch.is_whitespace()
            && current.ends_with(|c: char| c.is_whitespace())
            && current.contains(|c: char| !c.is_whitespace());
        if at_boundary {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
