//! Forwards tracing events to operators as `log` events.
//!
//! [`ForwardLayer`] queues every event it sees; [`spawn_log_forwarder`] delivers the queue through
//! an [`EventSink`] until cancelled, then drains what is left.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::control::{EventSink, Reply, Status, Target};

pub const LOG_EVENT: &str = "log";

/// A queued log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub status: Status,
    /// `target: message`, followed by any structured fields.
    pub message: String,
    pub timestamp: i64,
}

impl LogEvent {
    pub fn into_reply(self) -> Reply {
        Reply {
            event: LOG_EVENT.to_string(),
            status: self.status,
            message: self.message,
            data: json!({ "timestamp": self.timestamp }),
        }
    }
}

fn status_for(level: &Level) -> Status {
    match *level {
        Level::ERROR => Status::Error,
        Level::WARN => Status::Warning,
        _ => Status::Success,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Queues events for the forwarder; level filtering is left to the subscriber.
pub struct ForwardLayer {
    tx: UnboundedSender<LogEvent>,
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // The forwarder's own diagnostics would feed back into the queue.
        if metadata.target().starts_with(module_path!()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let entry = LogEvent {
            status: status_for(metadata.level()),
            message: format!("{}: {}{}", metadata.target(), visitor.message, visitor.fields),
            timestamp: Utc::now().timestamp(),
        };
        // Receiver gone means the forwarder has stopped; drop the line.
        let _ = self.tx.send(entry);
    }
}

pub fn log_channel() -> (ForwardLayer, UnboundedReceiver<LogEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ForwardLayer { tx }, rx)
}

async fn forward(sink: &dyn EventSink, entry: LogEvent) {
    if let Err(e) = sink.emit(Target::Broadcast, &entry.into_reply()).await {
        debug!(error = %e, "Dropped log event");
    }
}

/// Delivers queued log events until `cancel` fires, then drains the queue and stops.
pub fn spawn_log_forwarder(
    mut rx: UnboundedReceiver<LogEvent>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                entry = rx.recv() => match entry {
                    Some(entry) => forward(sink.as_ref(), entry).await,
                    None => return,
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Ok(entry) = rx.try_recv() {
            forward(sink.as_ref(), entry).await;
            drained += 1;
        }
        debug!(drained, "Log forwarder stopped");
    })
}
