use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::bridge::Orchestration;
use crate::core::error::AgentError;
use crate::core::progress::{ProgressTable, COMPLETED, FAILED, RUNNING, TIMEOUT};
use crate::core::relay::ToolEventSink;
use crate::services::agent::OpenRouterAgent;
use crate::services::settings::AgentSettings;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s*(.+)$").expect("numbered-line regex"));

/// Fans a task out to one worker thread per subtask and aggregates the
/// results. Construction is cheap and never touches the network; agents
/// are built lazily on the threads that use them.
pub struct TaskOrchestrator {
    settings: AgentSettings,
    num_agents: usize,
    aggregation_strategy: String,
    task_timeout: Duration,
    progress: ProgressTable,
    subtasks: Mutex<Option<Vec<String>>>,
}

impl TaskOrchestrator {
    pub fn from_settings(settings: &AgentSettings) -> Result<Self, AgentError> {
        if settings.api_key.trim().is_empty() {
            return Err(AgentError::Init(
                "OpenRouter API key is not configured".to_string(),
            ));
        }
        let cfg = Config::get();
        if cfg.num_agents == 0 {
            return Err(AgentError::Init("NUM_AGENTS must be at least 1".to_string()));
        }
        Ok(Self {
            settings: settings.clone(),
            num_agents: cfg.num_agents,
            aggregation_strategy: cfg.aggregation_strategy.clone(),
            task_timeout: Duration::from_secs(cfg.task_timeout_seconds),
            progress: ProgressTable::new(),
            subtasks: Mutex::new(None),
        })
    }

    pub fn aggregation_strategy(&self) -> &str {
        &self.aggregation_strategy
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    fn decompose_with_model(&self, message: &str, num_agents: usize) -> Result<Vec<String>, AgentError> {
        let agent = OpenRouterAgent::from_settings(&self.settings)
            .map_err(|e| AgentError::Decomposition(e.to_string()))?;
        let prompt = format!(
            "Split the following task into exactly {num_agents} independent subtasks that can \
             be worked on in parallel. Respond with a JSON array of {num_agents} strings and \
             nothing else.\n\nTask: {message}"
        );
        let reply = agent
            .complete(&prompt)
            .map_err(|e| AgentError::Decomposition(e.to_string()))?;
        Ok(parse_subtask_list(&reply, message, num_agents))
    }

    fn aggregate(&self, message: &str, results: &[SubtaskResult]) -> Result<String, AgentError> {
        if results.iter().all(|r| r.output.is_err()) {
            let first = results
                .iter()
                .find_map(|r| r.output.as_ref().err())
                .cloned()
                .unwrap_or_else(|| "no subtask produced a result".to_string());
            return Err(AgentError::Execution(format!(
                "all subtasks failed: {first}"
            )));
        }

        if self.aggregation_strategy == "synthesis" {
            match self.synthesize(message, results) {
                Ok(answer) => return Ok(answer),
                Err(err) => {
                    warn!(
                        "[ORCHESTRATOR] synthesis failed, falling back to concatenation: {}",
                        err
                    );
                }
            }
        }
        Ok(concatenate_results(results))
    }

    fn synthesize(&self, message: &str, results: &[SubtaskResult]) -> Result<String, AgentError> {
        let agent = OpenRouterAgent::from_settings(&self.settings)?;
        let mut prompt = format!(
            "Several agents worked on parts of this task:\n\n{message}\n\nTheir results:\n"
        );
        for result in results {
            match &result.output {
                Ok(output) => {
                    prompt.push_str(&format!(
                        "\n--- Subtask {}: {}\n{}\n",
                        result.index + 1,
                        result.subtask,
                        output
                    ));
                }
                Err(err) => {
                    prompt.push_str(&format!(
                        "\n--- Subtask {}: {} (failed: {})\n",
                        result.index + 1,
                        result.subtask,
                        err
                    ));
                }
            }
        }
        prompt.push_str("\nCombine these into one coherent answer to the original task.");
        agent.complete(&prompt)
    }
}

impl Orchestration for TaskOrchestrator {
    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn decompose(&self, message: &str, num_agents: usize) -> Result<Vec<String>, AgentError> {
        let subtasks = self.decompose_with_model(message, num_agents)?;
        info!("[ORCHESTRATOR] decomposed into {} subtasks", subtasks.len());
        *self.subtasks.lock() = Some(subtasks.clone());
        Ok(subtasks)
    }

    fn run(&self, message: &str, sink: &ToolEventSink) -> Result<String, AgentError> {
        let subtasks = match self.subtasks.lock().take() {
            Some(cached) => cached,
            None => self.decompose_with_model(message, self.num_agents)?,
        };

        let settings = self.settings.clone();
        let results = fan_out(
            &subtasks,
            self.task_timeout,
            &self.progress,
            move |_index, subtask, sink| {
                let agent = OpenRouterAgent::from_settings(&settings)?;
                agent.run(subtask, Some(sink))
            },
            sink,
        );
        self.aggregate(message, &results)
    }

    fn progress(&self) -> ProgressTable {
        self.progress.clone()
    }
}

#[derive(Debug)]
pub struct SubtaskResult {
    pub index: usize,
    pub subtask: String,
    pub output: Result<String, String>,
}

/// Runs one OS thread per subtask, collecting results over a channel with
/// a shared wall-clock budget. Threads update the progress table: RUNNING
/// when they start, COMPLETED/FAILED when they finish; anything
/// unheard-from when the budget runs out is marked TIMEOUT and left behind.
pub fn fan_out<F>(
    subtasks: &[String],
    task_timeout: Duration,
    progress: &ProgressTable,
    work: F,
    sink: &ToolEventSink,
) -> Vec<SubtaskResult>
where
    F: Fn(usize, &str, &ToolEventSink) -> Result<String, AgentError> + Clone + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<(usize, Result<String, String>)>();
    for (index, subtask) in subtasks.iter().enumerate() {
        let tx = tx.clone();
        let work = work.clone();
        let sink = sink.clone();
        let subtask = subtask.clone();
        let progress = progress.clone();
        thread::spawn(move || {
            progress.set(index, RUNNING);
            let output = work(index, &subtask, &sink).map_err(|e| e.to_string());
            progress.set(index, if output.is_ok() { COMPLETED } else { FAILED });
            // Receiver may be gone after a timeout; the result is discarded.
            let _ = tx.send((index, output));
        });
    }
    drop(tx);

    let mut results: Vec<SubtaskResult> = subtasks
        .iter()
        .enumerate()
        .map(|(index, subtask)| SubtaskResult {
            index,
            subtask: subtask.clone(),
            output: Err("subtask timed out".to_string()),
        })
        .collect();

    let deadline = Instant::now() + task_timeout;
    let mut received = 0;
    while received < subtasks.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((index, output)) => {
                results[index].output = output;
                received += 1;
            }
            Err(_) => {
                warn!(
                    "[ORCHESTRATOR] task timeout after {:?}, {} of {} subtasks finished",
                    task_timeout,
                    received,
                    subtasks.len()
                );
                for result in &mut results {
                    if matches!(&result.output, Err(e) if e == "subtask timed out") {
                        progress.set(result.index, TIMEOUT);
                    }
                }
                break;
            }
        }
    }
    results
}

/// Parses the model's decomposition reply. Accepts a JSON array first, a
/// numbered list second, and degrades to the whole message as a single
/// subtask when neither is recognizable.
pub fn parse_subtask_list(reply: &str, message: &str, num_agents: usize) -> Vec<String> {
    if let Some(start) = reply.find('[') {
        if let Some(end) = reply.rfind(']') {
            if start < end {
                if let Ok(items) = serde_json::from_str::<Vec<String>>(&reply[start..=end]) {
                    let items: Vec<String> = items
                        .into_iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .take(num_agents)
                        .collect();
                    if !items.is_empty() {
                        return items;
                    }
                }
            }
        }
    }

    let numbered: Vec<String> = NUMBERED_LINE
        .captures_iter(reply)
        .map(|cap| cap[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .take(num_agents)
        .collect();
    if !numbered.is_empty() {
        return numbered;
    }

    vec![message.to_string()]
}

pub fn concatenate_results(results: &[SubtaskResult]) -> String {
    let mut combined = String::new();
    for result in results {
        match &result.output {
            Ok(output) => {
                combined.push_str(&format!(
                    "### Subtask {}: {}\n\n{}\n\n",
                    result.index + 1,
                    result.subtask,
                    output
                ));
            }
            Err(err) => {
                combined.push_str(&format!(
                    "### Subtask {}: {}\n\n(failed: {})\n\n",
                    result.index + 1,
                    result.subtask,
                    err
                ));
            }
        }
    }
    combined.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{concatenate_results, fan_out, parse_subtask_list, SubtaskResult};
    use crate::core::error::AgentError;
    use crate::core::progress::{ProgressTable, COMPLETED, FAILED, TIMEOUT};
    use crate::core::relay::{ToolEvent, ToolEventRelay};

    #[test]
    fn parses_a_json_array_reply() {
        let reply = "Here you go:\n[\"research\", \"draft\", \"review\"]";
        assert_eq!(
            parse_subtask_list(reply, "task", 3),
            vec!["research", "draft", "review"]
        );
    }

    #[test]
    fn falls_back_to_numbered_lists() {
        let reply = "1. gather sources\n2) write summary\n3. fact-check";
        assert_eq!(
            parse_subtask_list(reply, "task", 3),
            vec!["gather sources", "write summary", "fact-check"]
        );
    }

    #[test]
    fn caps_subtasks_at_the_agent_count() {
        let reply = "[\"a\", \"b\", \"c\", \"d\"]";
        assert_eq!(parse_subtask_list(reply, "task", 2), vec!["a", "b"]);
    }

    #[test]
    fn unparseable_reply_degrades_to_the_whole_message() {
        assert_eq!(
            parse_subtask_list("I cannot split this.", "original task", 3),
            vec!["original task"]
        );
    }

    #[test]
    fn fan_out_collects_all_results_and_labels() {
        let subtasks = vec!["a".to_string(), "b".to_string()];
        let progress = ProgressTable::new();
        progress.seed(2);
        let relay = ToolEventRelay::new();

        let results = fan_out(
            &subtasks,
            Duration::from_secs(5),
            &progress,
            |index, subtask, sink| {
                sink.record(ToolEvent::start("calculate", serde_json::json!({})));
                if index == 0 {
                    Ok(format!("done {subtask}"))
                } else {
                    Err(AgentError::Execution("broken".to_string()))
                }
            },
            &relay.sink(),
        );

        assert_eq!(results[0].output.as_deref(), Ok("done a"));
        assert_eq!(results[1].output.as_deref().unwrap_err(), "broken");
        assert_eq!(progress.get(0).as_deref(), Some(COMPLETED));
        assert_eq!(progress.get(1).as_deref(), Some(FAILED));
    }

    #[test]
    fn fan_out_marks_stragglers_as_timed_out() {
        let subtasks = vec!["fast".to_string(), "slow".to_string()];
        let progress = ProgressTable::new();
        progress.seed(2);
        let relay = ToolEventRelay::new();

        let results = fan_out(
            &subtasks,
            Duration::from_millis(100),
            &progress,
            |index, _subtask, _sink| {
                if index == 1 {
                    std::thread::sleep(Duration::from_millis(600));
                }
                Ok("ok".to_string())
            },
            &relay.sink(),
        );

        assert!(results[0].output.is_ok());
        assert!(results[1].output.is_err());
        assert_eq!(progress.get(1).as_deref(), Some(TIMEOUT));
    }

    #[test]
    fn concatenation_labels_each_subtask() {
        let results = vec![
            SubtaskResult {
                index: 0,
                subtask: "draft".to_string(),
                output: Ok("text".to_string()),
            },
            SubtaskResult {
                index: 1,
                subtask: "review".to_string(),
                output: Err("oops".to_string()),
            },
        ];
        let combined = concatenate_results(&results);
        assert!(combined.contains("### Subtask 1: draft"));
        assert!(combined.contains("text"));
        assert!(combined.contains("(failed: oops)"));
    }
}
