use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, warn};

use crate::core::events::StreamEvent;

/// Typed producer half of the stream. The bridge pushes `StreamEvent`s;
/// framing happens on the consumer side so tests can observe events
/// before serialization.
#[derive(Clone)]
pub struct StreamSender {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamSender {
    pub fn send(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            warn!("[SSE] client went away, event dropped");
        }
    }
}

/// Bare typed channel for driving the bridge in tests.
pub fn channel() -> (StreamSender, UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamSender { tx }, rx)
}

/// The axum SSE response plus the sender feeding it. Each event becomes a
/// `data: <json>` record; `Done` becomes the `[DONE]` sentinel. A
/// serialization failure is the one bridge-fatal condition and is surfaced
/// as an error record.
pub fn sse_channel() -> (
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
    StreamSender,
) {
    let (sender, rx) = channel();
    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(frame(&event)));
    let sse = Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    );
    (sse, sender)
}

fn frame(event: &StreamEvent) -> Event {
    match event.to_sse_data() {
        Ok(data) => Event::default().data(data),
        Err(err) => {
            error!("[SSE] failed to serialize event: {}", err);
            Event::default().data(r#"{"type":"error","data":"event serialization failed"}"#)
        }
    }
}
