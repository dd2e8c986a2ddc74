use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEventKind {
    Start,
    Complete,
}

/// One side-channel notification recorded by the worker while it runs.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub kind: ToolEventKind,
    pub tool_name: String,
    pub tool_args: Value,
}

impl ToolEvent {
    pub fn start(tool_name: &str, tool_args: Value) -> Self {
        Self {
            kind: ToolEventKind::Start,
            tool_name: tool_name.to_string(),
            tool_args,
        }
    }

    pub fn complete(tool_name: &str, tool_args: Value) -> Self {
        Self {
            kind: ToolEventKind::Complete,
            tool_name: tool_name.to_string(),
            tool_args,
        }
    }
}

/// Producer handle given to the collaborator. Clones share one log, so a
/// collaborator may hand copies to as many internal workers as it wants.
#[derive(Clone)]
pub struct ToolEventSink {
    log: Arc<Mutex<Vec<ToolEvent>>>,
}

impl ToolEventSink {
    pub fn record(&self, event: ToolEvent) {
        self.log.lock().push(event);
    }
}

/// Append-only tool-event log plus the observer-held cursor. The relay is
/// the single consumer: `drain` hands each event out exactly once, in
/// append order.
pub struct ToolEventRelay {
    log: Arc<Mutex<Vec<ToolEvent>>>,
    cursor: usize,
}

impl ToolEventRelay {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            cursor: 0,
        }
    }

    pub fn sink(&self) -> ToolEventSink {
        ToolEventSink {
            log: Arc::clone(&self.log),
        }
    }

    /// Returns every event appended since the previous drain and advances
    /// the cursor past them. Empty when nothing new arrived.
    pub fn drain(&mut self) -> Vec<ToolEvent> {
        let log = self.log.lock();
        let fresh: Vec<ToolEvent> = log[self.cursor..].to_vec();
        self.cursor = log.len();
        fresh
    }
}

impl Default for ToolEventRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ToolEvent, ToolEventKind, ToolEventRelay};

    #[test]
    fn drain_returns_events_in_append_order() {
        let mut relay = ToolEventRelay::new();
        let sink = relay.sink();
        sink.record(ToolEvent::start("search_web", json!({"query": "a"})));
        sink.record(ToolEvent::complete("search_web", json!({"query": "a"})));

        let drained = relay.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, ToolEventKind::Start);
        assert_eq!(drained[1].kind, ToolEventKind::Complete);
    }

    #[test]
    fn drain_is_idempotent_without_new_events() {
        let mut relay = ToolEventRelay::new();
        let sink = relay.sink();
        sink.record(ToolEvent::start("calculate", json!({"expression": "2+2"})));

        assert_eq!(relay.drain().len(), 1);
        assert!(relay.drain().is_empty());
        assert!(relay.drain().is_empty());
    }

    #[test]
    fn each_event_is_delivered_exactly_once_across_drains() {
        let mut relay = ToolEventRelay::new();
        let sink = relay.sink();
        let mut total = 0;
        for round in 0..5 {
            for i in 0..round {
                sink.record(ToolEvent::start("t", json!({"i": i})));
            }
            total += relay.drain().len();
        }
        assert_eq!(total, 0 + 1 + 2 + 3 + 4);
    }

    #[test]
    fn sink_clones_share_one_log() {
        let mut relay = ToolEventRelay::new();
        let sink = relay.sink();
        let handle = std::thread::spawn({
            let sink = sink.clone();
            move || sink.record(ToolEvent::start("search_web", json!({})))
        });
        handle.join().unwrap();
        sink.record(ToolEvent::complete("search_web", json!({})));
        assert_eq!(relay.drain().len(), 2);
    }
}
