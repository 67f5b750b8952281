//! Pipeline event bus: job lifecycle and stage-transition events broadcast to
//! pluggable sinks.
//!
//! Events are observability only; nothing in the state machine depends on a
//! sink consuming them, and emission failures are ignored by producers. The
//! default sink forwards to `tracing`; tests attach a [`CollectorSink`].

use std::io::Result as IoResult;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{ContentType, StageKind};

/// Structured pipeline events, one per observable lifecycle moment.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    JobCreated {
        job_id: Uuid,
        document_id: Uuid,
        content_type: ContentType,
    },
    StageStarted {
        job_id: Uuid,
        stage: StageKind,
    },
    StageCompleted {
        job_id: Uuid,
        stage: StageKind,
        elapsed_ms: u64,
    },
    RetryScheduled {
        job_id: Uuid,
        stage: StageKind,
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
    },
    JobProcessed {
        job_id: Uuid,
        chunk_count: usize,
        no_content: bool,
    },
    JobFailed {
        job_id: Uuid,
        stage: StageKind,
        message: String,
    },
    JobCancelled {
        job_id: Uuid,
    },
}

impl PipelineEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            PipelineEvent::JobCreated { job_id, .. }
            | PipelineEvent::StageStarted { job_id, .. }
            | PipelineEvent::StageCompleted { job_id, .. }
            | PipelineEvent::RetryScheduled { job_id, .. }
            | PipelineEvent::JobProcessed { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. }
            | PipelineEvent::JobCancelled { job_id } => *job_id,
        }
    }

    /// Normalized JSON shape for downstream consumers.
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Abstraction over an output target that consumes full events.
pub trait EventSink: Send + Sync {
    fn handle(&mut self, event: &PipelineEvent) -> IoResult<()>;
}

/// Default sink: forwards events to the `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&mut self, event: &PipelineEvent) -> IoResult<()> {
        match event {
            PipelineEvent::RetryScheduled {
                job_id,
                stage,
                attempt,
                max_retries,
                delay_ms,
            } => warn!(
                %job_id, %stage, attempt, max_retries, delay_ms,
                "stage retry scheduled"
            ),
            PipelineEvent::JobFailed {
                job_id,
                stage,
                message,
            } => warn!(%job_id, %stage, %message, "job failed"),
            other => info!(job_id = %other.job_id(), event = ?other, "pipeline event"),
        }
        Ok(())
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct CollectorSink {
    entries: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl EventSink for CollectorSink {
    fn handle(&mut self, event: &PipelineEvent) -> IoResult<()> {
        self.entries.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Forwards events into a dedicated channel, backing [`EventStream`].
struct ChannelSink {
    sender: flume::Sender<PipelineEvent>,
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &PipelineEvent) -> IoResult<()> {
        // A dropped subscriber is not an error for the bus.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// A live subscription to the bus. Each subscriber sees every event emitted
/// after it subscribed.
pub struct EventStream {
    receiver: flume::Receiver<PipelineEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.receiver.recv_async().await.ok()
    }

    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.receiver.try_recv().ok()
    }

    pub async fn next_timeout(&mut self, duration: Duration) -> Option<PipelineEvent> {
        timeout(duration, self.recv()).await.ok().flatten()
    }

    /// Adapt the subscription into a `futures` stream for combinator use.
    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> {
        stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }
}

/// Receives events from producers and broadcasts them to every sink.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    channel: (flume::Sender<PipelineEvent>, flume::Receiver<PipelineEvent>),
    listener: Arc<Mutex<Option<ListenerState>>>,
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(TracingSink)
    }
}

impl EventBus {
    pub fn with_sink<S: EventSink + 'static>(sink: S) -> Self {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            channel: flume::unbounded(),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn add_sink<S: EventSink + 'static>(&self, sink: S) {
        self.sinks.lock().unwrap().push(Box::new(sink));
    }

    /// Attach a subscriber that receives every event broadcast from now on.
    pub fn subscribe(&self) -> EventStream {
        let (sender, receiver) = flume::unbounded();
        self.add_sink(ChannelSink { sender });
        EventStream { receiver }
    }

    /// Sender handle for producers (the orchestrator holds one).
    pub fn sender(&self) -> flume::Sender<PipelineEvent> {
        self.channel.0.clone()
    }

    /// Spawn the broadcast task. Idempotent.
    pub fn listen(&self) {
        let mut guard = self.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return;
        }

        let receiver = self.channel.1.clone();
        let sinks = self.sinks.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => {
                            let mut sinks = sinks.lock().unwrap();
                            for sink in sinks.iter_mut() {
                                if let Err(e) = sink.handle(&event) {
                                    warn!(error = %e, "event sink error");
                                }
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the broadcast task after draining whatever was already queued.
    pub async fn stop(&self) {
        let state = {
            let mut guard = self.listener.lock().expect("listener poisoned");
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(state) = guard.take() {
                let _ = state.shutdown_tx.send(());
                state.handle.abort();
            }
        }
    }
}
