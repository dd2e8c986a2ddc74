use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::error::AgentError;
use crate::core::events::{chunk_words, StreamEvent, ToolUsageHint};
use crate::core::progress::{ProgressTable, QUEUED};
use crate::core::relay::{ToolEventKind, ToolEventRelay, ToolEventSink};
use crate::core::worker::WorkerCell;
use crate::utils::sse::StreamSender;

/// Deadline and pacing knobs for one bridge run. Single-agent and
/// orchestrated requests use different sets of the same knobs.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub deadline: Duration,
    pub tick: Duration,
    pub word_delay: Duration,
}

impl BridgeConfig {
    pub fn single() -> Self {
        let cfg = Config::get();
        Self {
            deadline: Duration::from_secs(cfg.agent_timeout_seconds),
            tick: Duration::from_millis(cfg.agent_tick_ms),
            word_delay: Duration::from_millis(cfg.agent_word_delay_ms),
        }
    }

    pub fn orchestrated() -> Self {
        let cfg = Config::get();
        Self {
            deadline: Duration::from_secs(cfg.orchestrator_timeout_seconds),
            tick: Duration::from_millis(cfg.orchestrator_tick_ms),
            word_delay: Duration::from_millis(cfg.orchestrator_word_delay_ms),
        }
    }

    fn timeout_message(&self) -> String {
        let secs = self.deadline.as_secs();
        if secs >= 60 && secs % 60 == 0 {
            format!("Request timeout after {} minutes", secs / 60)
        } else {
            format!("Request timeout after {} seconds", secs)
        }
    }
}

/// Contract the orchestrated mode consumes. Internals stay opaque to the
/// bridge; it only seeds/reads the progress table and launches the run.
pub trait Orchestration: Send + Sync + 'static {
    fn num_agents(&self) -> usize;
    fn decompose(&self, message: &str, num_agents: usize) -> Result<Vec<String>, AgentError>;
    fn run(&self, message: &str, sink: &ToolEventSink) -> Result<String, AgentError>;
    fn progress(&self) -> ProgressTable;
}

/// Drives one request end-to-end: observe the worker on a fixed tick,
/// relay tool events and progress, enforce the deadline, then deliver the
/// result word by word or surface the failure. Non-reentrant; one instance
/// per request.
pub struct StreamBridge {
    sender: StreamSender,
    cfg: BridgeConfig,
}

impl StreamBridge {
    pub fn new(sender: StreamSender, cfg: BridgeConfig) -> Self {
        Self { sender, cfg }
    }

    /// Runs the blocking `work` on a worker cell and streams everything it
    /// produces. A `Some` progress table switches on orchestrated-mode
    /// behavior (progress snapshots per tick, delivery phase statuses).
    pub async fn run<F>(self, mut relay: ToolEventRelay, progress: Option<ProgressTable>, work: F)
    where
        F: FnOnce() -> Result<String, AgentError> + Send + 'static,
    {
        let cell = WorkerCell::spawn(work);
        let started = Instant::now();

        while !cell.is_finished() && started.elapsed() < self.cfg.deadline {
            self.relay_tool_events(&mut relay);
            if let Some(table) = &progress {
                self.emit_progress_snapshot(table);
            }
            sleep(self.cfg.tick).await;
        }

        if !cell.is_finished() {
            warn!(
                "[BRIDGE] deadline reached after {:?}, abandoning worker",
                started.elapsed()
            );
            self.sender.send(StreamEvent::Error(self.cfg.timeout_message()));
            self.sender.send(StreamEvent::Done);
            return;
        }

        // Final flush for events recorded between the last tick and completion.
        self.relay_tool_events(&mut relay);
        self.sender.send(StreamEvent::ClearStatus);

        match cell.take_result().await {
            Err(err) => {
                warn!("[BRIDGE] worker failed: {}", err);
                self.sender.send(StreamEvent::Error(err.to_string()));
            }
            Ok(payload) => {
                info!(
                    "[BRIDGE] worker finished in {:?}, payload {} chars",
                    started.elapsed(),
                    payload.len()
                );
                if progress.is_some() {
                    self.announce_delivery_phases().await;
                }
                self.deliver(&payload).await;
            }
        }
        self.sender.send(StreamEvent::Done);
    }

    fn relay_tool_events(&self, relay: &mut ToolEventRelay) {
        for event in relay.drain() {
            match event.kind {
                ToolEventKind::Start => {
                    if !event.tool_args.is_object() {
                        warn!(
                            "[BRIDGE] tool event for {} carried non-object args: {}",
                            event.tool_name, event.tool_args
                        );
                    }
                    info!("[BRIDGE] tool started: {}", event.tool_name);
                    let hint = ToolUsageHint::tool_start(&event.tool_name, &event.tool_args);
                    self.sender.send(StreamEvent::ToolUsage(hint));
                }
                ToolEventKind::Complete => {
                    info!("[BRIDGE] tool completed: {}", event.tool_name);
                    self.sender.send(StreamEvent::ClearToolUsage);
                }
            }
        }
    }

    fn emit_progress_snapshot(&self, table: &ProgressTable) {
        let total = table.len();
        for (index, label) in table.snapshot() {
            self.sender.send(StreamEvent::progress(index, &label, total));
        }
    }

    async fn announce_delivery_phases(&self) {
        self.sender.send(StreamEvent::Status(
            "All agents completed! Consolidating results...".to_string(),
        ));
        sleep(Duration::from_millis(500)).await;
        self.sender.send(StreamEvent::ClearStatus);
        self.sender.send(StreamEvent::Status(
            "Delivering consolidated results...".to_string(),
        ));
        sleep(Duration::from_millis(300)).await;
        self.sender.send(StreamEvent::ClearStatus);
    }

    async fn deliver(&self, payload: &str) {
        let chunks = chunk_words(payload);
        info!("[BRIDGE] streaming {} chunks", chunks.len());
        for chunk in chunks {
            self.sender.send(StreamEvent::Content(chunk));
            sleep(self.cfg.word_delay).await;
        }
    }
}

/// Single-agent request: one status, then the bridge observes the blocking
/// `work` call. The closure receives the sink it should instrument the
/// collaborator with and runs entirely on the worker cell, so collaborator
/// construction failures flow through the normal failure path.
pub async fn run_single_with<F>(sender: StreamSender, cfg: BridgeConfig, work: F)
where
    F: FnOnce(ToolEventSink) -> Result<String, AgentError> + Send + 'static,
{
    sender.send(StreamEvent::Status("Processing...".to_string()));
    let relay = ToolEventRelay::new();
    let sink = relay.sink();
    StreamBridge::new(sender, cfg)
        .run(relay, None, move || work(sink))
        .await;
}

/// Orchestrated request: init and decomposition happen before any worker
/// starts, so their failures terminate the stream without progress events.
pub async fn run_orchestrated_with<O, I>(
    sender: StreamSender,
    cfg: BridgeConfig,
    init: I,
    message: String,
) where
    O: Orchestration,
    I: FnOnce() -> Result<O, AgentError>,
{
    sender.send(StreamEvent::Status(
        "Initializing multi-agent orchestrator...".to_string(),
    ));
    let orchestration = match init() {
        Ok(o) => Arc::new(o),
        Err(err) => {
            warn!("[BRIDGE] orchestrator init failed: {}", err);
            sender.send(StreamEvent::Error(err.to_string()));
            sender.send(StreamEvent::Done);
            return;
        }
    };

    sender.send(StreamEvent::Status("Decomposing task...".to_string()));
    let num_agents = orchestration.num_agents();
    let decomposed = {
        let orchestration = Arc::clone(&orchestration);
        let message = message.clone();
        task::spawn_blocking(move || orchestration.decompose(&message, num_agents)).await
    };
    let subtasks = match decomposed {
        Ok(Ok(subtasks)) => subtasks,
        Ok(Err(err)) => {
            warn!("[BRIDGE] decomposition failed: {}", err);
            sender.send(StreamEvent::Error(err.to_string()));
            sender.send(StreamEvent::Done);
            return;
        }
        Err(join_err) => {
            warn!("[BRIDGE] decomposition aborted: {}", join_err);
            sender.send(StreamEvent::Error(
                AgentError::Decomposition("decomposition worker panicked".to_string()).to_string(),
            ));
            sender.send(StreamEvent::Done);
            return;
        }
    };
    sender.send(StreamEvent::Status(format!(
        "Task decomposed into {} subtasks",
        subtasks.len()
    )));

    let progress = orchestration.progress();
    progress.seed(num_agents);
    for index in 0..num_agents {
        sender.send(StreamEvent::progress(index, QUEUED, num_agents));
    }

    let relay = ToolEventRelay::new();
    let sink = relay.sink();
    let worker = {
        let orchestration = Arc::clone(&orchestration);
        move || orchestration.run(&message, &sink)
    };
    StreamBridge::new(sender, cfg)
        .run(relay, Some(progress), worker)
        .await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::{run_orchestrated_with, run_single_with, BridgeConfig, Orchestration};
    use crate::core::error::AgentError;
    use crate::core::events::StreamEvent;
    use crate::core::progress::ProgressTable;
    use crate::core::relay::{ToolEvent, ToolEventSink};
    use crate::utils::sse::{channel, StreamSender};

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            deadline: Duration::from_secs(5),
            tick: Duration::from_millis(10),
            word_delay: Duration::from_millis(1),
        }
    }

    async fn collect(mut rx: UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn content_of(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    struct FakeOrchestration {
        num_agents: usize,
        decompose_error: Option<String>,
        result: Result<String, String>,
        progress: ProgressTable,
        emit_tool_events: bool,
    }

    impl FakeOrchestration {
        fn succeeding(num_agents: usize, result: &str) -> Self {
            Self {
                num_agents,
                decompose_error: None,
                result: Ok(result.to_string()),
                progress: ProgressTable::new(),
                emit_tool_events: false,
            }
        }
    }

    impl Orchestration for FakeOrchestration {
        fn num_agents(&self) -> usize {
            self.num_agents
        }

        fn decompose(&self, message: &str, num_agents: usize) -> Result<Vec<String>, AgentError> {
            if let Some(err) = &self.decompose_error {
                return Err(AgentError::Decomposition(err.clone()));
            }
            Ok((0..num_agents)
                .map(|i| format!("{} (part {})", message, i + 1))
                .collect())
        }

        fn run(&self, _message: &str, sink: &ToolEventSink) -> Result<String, AgentError> {
            if self.emit_tool_events {
                sink.record(ToolEvent::start("search_web", json!({"query": "q"})));
                sink.record(ToolEvent::complete("search_web", json!({"query": "q"})));
            }
            for index in 0..self.num_agents {
                self.progress.set(index, "COMPLETED");
            }
            self.result
                .clone()
                .map_err(AgentError::Execution)
        }

        fn progress(&self) -> ProgressTable {
            self.progress.clone()
        }
    }

    #[tokio::test]
    async fn single_agent_success_matches_the_canonical_sequence() {
        let (sender, rx) = channel();
        run_single_with(sender, fast_config(), |_sink| {
            Ok("The answer is 4".to_string())
        })
        .await;

        let events = collect(rx).await;
        assert_eq!(events[0], StreamEvent::Status("Processing...".to_string()));
        assert_eq!(events[1], StreamEvent::ClearStatus);
        assert_eq!(events[2], StreamEvent::Content("The ".to_string()));
        assert_eq!(events[3], StreamEvent::Content("answer ".to_string()));
        assert_eq!(events[4], StreamEvent::Content("is ".to_string()));
        assert_eq!(events[5], StreamEvent::Content("4".to_string()));
        assert_eq!(events[6], StreamEvent::Done);
        assert_eq!(events.len(), 7);
    }

    #[tokio::test]
    async fn content_concatenation_round_trips_the_payload() {
        let payload = "spacing  is\npreserved exactly ";
        let (sender, rx) = channel();
        let owned = payload.to_string();
        run_single_with(sender, fast_config(), move |_sink| Ok(owned)).await;

        let events = collect(rx).await;
        assert_eq!(content_of(&events), payload);
    }

    #[tokio::test]
    async fn worker_failure_ends_with_error_then_done() {
        let (sender, rx) = channel();
        run_single_with(sender, fast_config(), |_sink| {
            Err(AgentError::Execution("model unavailable".to_string()))
        })
        .await;

        let events = collect(rx).await;
        let n = events.len();
        assert_eq!(events[n - 2], StreamEvent::Error("model unavailable".to_string()));
        assert_eq!(events[n - 1], StreamEvent::Done);
        assert!(content_of(&events).is_empty());
    }

    #[tokio::test]
    async fn worker_panic_is_surfaced_not_propagated() {
        let (sender, rx) = channel();
        run_single_with(sender, fast_config(), |_sink| -> Result<String, AgentError> {
            panic!("collaborator bug")
        })
        .await;

        let events = collect(rx).await;
        assert!(matches!(events.last(), Some(StreamEvent::Done)));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Error(msg) if msg.contains("panicked"))));
    }

    #[tokio::test]
    async fn deadline_expiry_emits_timeout_and_no_content() {
        let cfg = BridgeConfig {
            deadline: Duration::from_millis(60),
            tick: Duration::from_millis(10),
            word_delay: Duration::from_millis(1),
        };
        let (sender, rx) = channel();
        run_single_with(sender, cfg, |_sink| {
            std::thread::sleep(Duration::from_millis(400));
            Ok("too late".to_string())
        })
        .await;

        let events = collect(rx).await;
        let n = events.len();
        assert!(
            matches!(&events[n - 2], StreamEvent::Error(msg) if msg.starts_with("Request timeout after"))
        );
        assert_eq!(events[n - 1], StreamEvent::Done);
        assert!(content_of(&events).is_empty());
    }

    #[tokio::test]
    async fn tool_events_are_relayed_once_in_order() {
        let (sender, rx) = channel();
        run_single_with(sender, fast_config(), |sink| {
            sink.record(ToolEvent::start("calculate", json!({"expression": "2+2"})));
            std::thread::sleep(Duration::from_millis(40));
            sink.record(ToolEvent::complete("calculate", json!({"expression": "2+2"})));
            Ok("4".to_string())
        })
        .await;

        let events = collect(rx).await;
        let tool_usages: Vec<&StreamEvent> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolUsage(_)))
            .collect();
        let clears = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ClearToolUsage))
            .count();
        assert_eq!(tool_usages.len(), 1);
        assert_eq!(clears, 1);
        match tool_usages[0] {
            StreamEvent::ToolUsage(hint) => {
                assert_eq!(hint.tool_name, "calculate");
                assert_eq!(hint.expression.as_deref(), Some("2+2"));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn trailing_tool_events_are_flushed_after_completion() {
        let (sender, rx) = channel();
        run_single_with(sender, fast_config(), |sink| {
            // Recorded right before returning: only the final drain sees it.
            sink.record(ToolEvent::start("read_file", json!({"path": "a.txt"})));
            Ok("ok".to_string())
        })
        .await;

        let events = collect(rx).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolUsage(h) if h.filename.as_deref() == Some("a.txt"))));
    }

    #[tokio::test]
    async fn orchestrated_init_failure_is_terminal() {
        let (sender, rx) = channel();
        run_orchestrated_with::<FakeOrchestration, _>(
            sender,
            fast_config(),
            || Err(AgentError::Init("missing api key".to_string())),
            "task".to_string(),
        )
        .await;

        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Status("Initializing multi-agent orchestrator...".to_string()),
                StreamEvent::Error("Initialization error: missing api key".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn decomposition_failure_emits_no_progress() {
        let (sender, rx) = channel();
        run_orchestrated_with(
            sender,
            fast_config(),
            || {
                Ok(FakeOrchestration {
                    decompose_error: Some("model returned garbage".to_string()),
                    ..FakeOrchestration::succeeding(3, "")
                })
            },
            "task".to_string(),
        )
        .await;

        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Status("Initializing multi-agent orchestrator...".to_string()),
                StreamEvent::Status("Decomposing task...".to_string()),
                StreamEvent::Error("Decomposition error: model returned garbage".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn orchestrated_success_streams_progress_and_result() {
        let (sender, rx) = channel();
        run_orchestrated_with(
            sender,
            fast_config(),
            || Ok(FakeOrchestration::succeeding(3, "combined answer")),
            "task".to_string(),
        )
        .await;

        let events = collect(rx).await;
        assert_eq!(content_of(&events), "combined answer");
        assert!(matches!(events.last(), Some(StreamEvent::Done)));

        // Every progress event stays in range and the total never changes.
        let mut seen_progress = 0;
        for event in &events {
            if let StreamEvent::Progress(update) = event {
                seen_progress += 1;
                assert!(update.agent_id >= 1 && update.agent_id <= 3);
                assert_eq!(update.total_agents, 3);
            }
        }
        // At least the three seeded QUEUED events.
        assert!(seen_progress >= 3);

        // Delivery phases are announced before content in orchestrated mode.
        let consolidating = events.iter().position(|e| {
            matches!(e, StreamEvent::Status(s) if s.contains("Consolidating results"))
        });
        let first_content = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Content(_)));
        assert!(consolidating.unwrap() < first_content.unwrap());
    }

    #[tokio::test]
    async fn exactly_one_terminal_marker_and_it_is_last() {
        for result in [Ok("fine".to_string()), Err("broken".to_string())] {
            let (sender, rx) = channel();
            run_single_with(sender, fast_config(), move |_sink| {
                result.map_err(AgentError::Execution)
            })
            .await;
            let events = collect(rx).await;
            let dones = events
                .iter()
                .filter(|e| matches!(e, StreamEvent::Done))
                .count();
            assert_eq!(dones, 1);
            assert!(matches!(events.last(), Some(StreamEvent::Done)));
        }
    }

    #[tokio::test]
    async fn closed_receiver_does_not_panic_the_bridge() {
        let (sender, rx) = channel();
        drop(rx);
        run_single_with(sender, fast_config(), |_sink| Ok("unheard".to_string())).await;
    }

    #[test]
    fn timeout_message_is_humanized() {
        let minutes = BridgeConfig {
            deadline: Duration::from_secs(120),
            tick: Duration::from_millis(500),
            word_delay: Duration::from_millis(30),
        };
        assert_eq!(minutes.timeout_message(), "Request timeout after 2 minutes");
        let seconds = BridgeConfig {
            deadline: Duration::from_secs(45),
            tick: Duration::from_millis(500),
            word_delay: Duration::from_millis(30),
        };
        assert_eq!(seconds.timeout_message(), "Request timeout after 45 seconds");
    }

    #[tokio::test]
    async fn progress_snapshots_reflect_collaborator_updates() {
        let progress = ProgressTable::new();
        let orchestration = FakeOrchestration {
            progress: progress.clone(),
            ..FakeOrchestration::succeeding(2, "done")
        };
        let (sender, rx) = channel();
        run_orchestrated_with(sender, fast_config(), || Ok(orchestration), "t".to_string()).await;

        let events = collect(rx).await;
        assert!(events.iter().any(
            |e| matches!(e, StreamEvent::Progress(u) if u.status == "COMPLETED" || u.status == "QUEUED")
        ));
    }

    #[tokio::test]
    async fn channel_sender_is_cloneable_across_tasks() {
        let (sender, mut rx) = channel();
        let clone: StreamSender = sender.clone();
        let arc = Arc::new(clone);
        arc.send(StreamEvent::Done);
        drop(sender);
        drop(arc);
        assert_eq!(rx.recv().await, Some(StreamEvent::Done));
        assert_eq!(rx.recv().await, None);
    }
}
