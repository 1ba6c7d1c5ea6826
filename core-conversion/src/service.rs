//! # Conversion Service
//!
//! Per-kind facade over a persistent conversion worker.
//!
//! ## Overview
//!
//! A `ConversionService` owns at most one worker thread at a time and
//! multiplexes any number of concurrent `convert()` calls through it:
//! - Each call gets a UUID v4 correlation id and a pending-job record
//! - A dispatcher task routes worker replies to the matching job
//! - Progress regressions are dropped, so callers observe a non-decreasing stream
//! - A job without a terminal reply inside the job timeout is rejected
//! - Terminal results are published on the `EventBus`
//!
//! ## Worker lifecycle
//!
//! The worker starts lazily on the first call that needs it. If the engine
//! cannot be constructed, every later call fails with the same error. A worker
//! crash rejects every job that was pending on it; the next call starts a fresh
//! worker. `terminate()` stops the worker for good.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_conversion::{ConversionKind, ConversionService};
//!
//! let audio = ConversionService::new(ConversionKind::Audio, factory, config, events);
//! let output = audio.convert(Some(recording), "mp3", None).await?;
//! println!("{} -> {} bytes", output.original_size, output.converted_size);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bridge_traits::media::TranscodeEngineFactory;
use bytes::Bytes;
use core_runtime::config::ConversionConfig;
use core_runtime::events::{ConversionEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ConversionError, Result};
use crate::protocol::{
    ConversionKind, ConversionOutput, WorkerMessage, WorkerRequest, WorkerResponse,
};
use crate::worker::{spawn_worker, WorkerHandle};

/// Progress update delivered to a `convert()` caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionProgress {
    pub job_id: String,
    pub percent: u8,
    pub phase: String,
}

/// Per-job progress callback
pub type ProgressCallback = Arc<dyn Fn(ConversionProgress) + Send + Sync>;

enum Reply {
    Converted(ConversionOutput),
    Pong,
}

struct PendingJob {
    generation: u64,
    last_percent: u8,
    on_progress: Option<ProgressCallback>,
    reply: oneshot::Sender<Result<Reply>>,
    created_at: Instant,
}

enum WorkerState {
    Idle,
    Running {
        handle: WorkerHandle,
        generation: u64,
        dispatcher: JoinHandle<()>,
    },
    /// Engine construction failed; sticky
    Failed(String),
}

struct Inner {
    kind: ConversionKind,
    factory: TranscodeEngineFactory,
    config: ConversionConfig,
    events: EventBus,
    state: tokio::sync::Mutex<WorkerState>,
    pending: Mutex<HashMap<String, PendingJob>>,
    destroyed: AtomicBool,
    generations: AtomicU64,
    /// Generation of the live worker, 0 when none
    running: AtomicU64,
}

/// Conversion service for one media kind.
#[derive(Clone)]
pub struct ConversionService {
    inner: Arc<Inner>,
}

impl ConversionService {
    pub fn new(
        kind: ConversionKind,
        factory: TranscodeEngineFactory,
        config: ConversionConfig,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                factory,
                config,
                events,
                state: tokio::sync::Mutex::new(WorkerState::Idle),
                pending: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
                generations: AtomicU64::new(0),
                running: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> ConversionKind {
        self.inner.kind
    }

    /// Number of jobs awaiting a terminal reply
    pub fn pending_jobs(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Whether a worker thread is currently running
    pub async fn is_running(&self) -> bool {
        matches!(*self.inner.state.lock().await, WorkerState::Running { .. })
    }

    /// Converts `payload` to `format` on the worker.
    ///
    /// A `None` payload fails immediately without touching the worker. An empty
    /// payload completes with zero sizes.
    #[instrument(skip(self, payload, on_progress), fields(kind = %self.inner.kind))]
    pub async fn convert(
        &self,
        payload: Option<Bytes>,
        format: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ConversionOutput> {
        self.ensure_alive()?;
        let payload = payload
            .ok_or_else(|| ConversionError::MissingPayload(self.inner.kind.label().to_string()))?;

        let job_id = Uuid::new_v4().to_string();
        let request = WorkerRequest::convert(self.inner.kind, job_id.clone(), payload, format);

        self.inner.publish(ConversionEvent::Started {
            job_id: job_id.clone(),
            kind: self.inner.kind.to_string(),
            format: format.to_string(),
        });

        match self.dispatch(job_id, request, on_progress).await? {
            Reply::Converted(output) => Ok(output),
            Reply::Pong => Err(ConversionError::UnexpectedReply("pong".to_string())),
        }
    }

    /// Health check: round-trips a ping through the worker.
    #[instrument(skip(self), fields(kind = %self.inner.kind))]
    pub async fn ping(&self) -> Result<()> {
        self.ensure_alive()?;
        let id = Uuid::new_v4().to_string();
        let request = WorkerRequest::ping(id.clone());

        match self.dispatch(id, request, None).await? {
            Reply::Pong => Ok(()),
            Reply::Converted(_) => Err(ConversionError::UnexpectedReply(
                "conversion-complete".to_string(),
            )),
        }
    }

    /// Stops the worker and rejects every pending job.
    ///
    /// The worker thread exits after the message it is processing, and its
    /// replies are discarded. Later calls fail with `ServiceDestroyed`.
    #[instrument(skip(self), fields(kind = %self.inner.kind))]
    pub async fn terminate(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let previous = std::mem::replace(&mut *self.inner.state.lock().await, WorkerState::Idle);
        self.inner.running.store(0, Ordering::SeqCst);
        if let WorkerState::Running { dispatcher, .. } = previous {
            dispatcher.abort();
        }

        let jobs: Vec<(String, PendingJob)> = self.inner.pending.lock().drain().collect();
        for (job_id, job) in jobs {
            self.inner.publish(ConversionEvent::Failed {
                job_id,
                kind: self.inner.kind.to_string(),
                message: ConversionError::ServiceDestroyed.to_string(),
            });
            let _ = job.reply.send(Err(ConversionError::ServiceDestroyed));
        }

        info!("Conversion service terminated");
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(ConversionError::ServiceDestroyed);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        id: String,
        request: WorkerRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Reply> {
        // One deadline covers worker start-up, queueing and the reply
        let timeout = self.inner.config.job_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        let (sender, generation) = match tokio::time::timeout_at(deadline, self.ensure_worker()).await {
            Ok(Ok(worker)) => worker,
            Ok(Err(e)) => {
                self.inner.fail_unregistered(&id, &e);
                return Err(e);
            }
            Err(_) => {
                let error = ConversionError::Timeout(timeout);
                warn!(job_id = %id, "Conversion worker did not start before the job deadline");
                self.inner.fail_unregistered(&id, &error);
                return Err(error);
            }
        };

        self.submit(id, request, on_progress, sender, generation, deadline)
            .await
    }

    /// Registers the job against `generation` and waits for its reply until
    /// `deadline`.
    async fn submit(
        &self,
        id: String,
        request: WorkerRequest,
        on_progress: Option<ProgressCallback>,
        sender: mpsc::Sender<WorkerRequest>,
        generation: u64,
        deadline: tokio::time::Instant,
    ) -> Result<Reply> {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            id.clone(),
            PendingJob {
                generation,
                last_percent: 0,
                on_progress,
                reply: reply_tx,
                created_at: Instant::now(),
            },
        );

        // A crash between lookup and insert escapes the crash sweep
        if self.inner.running.load(Ordering::SeqCst) != generation {
            self.inner.reject_stale(&id);
            return reply_rx.await.unwrap_or(Err(ConversionError::ServiceDestroyed));
        }

        match tokio::time::timeout_at(deadline, sender.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => self.inner.reject_stale(&id),
            Err(_) => return self.on_deadline(id, reply_rx).await,
        }

        match tokio::time::timeout_at(deadline, &mut reply_rx).await {
            Ok(reply) => reply.unwrap_or(Err(ConversionError::ServiceDestroyed)),
            Err(_) => self.on_deadline(id, reply_rx).await,
        }
    }

    async fn on_deadline(
        &self,
        id: String,
        reply_rx: oneshot::Receiver<Result<Reply>>,
    ) -> Result<Reply> {
        let removed = self.inner.pending.lock().remove(&id);
        match removed {
            Some(job) => {
                let timeout = self.inner.config.job_timeout;
                warn!(
                    job_id = %id,
                    elapsed_ms = job.created_at.elapsed().as_millis() as u64,
                    "Conversion job timed out"
                );
                let error = ConversionError::Timeout(timeout);
                self.inner.publish(ConversionEvent::Failed {
                    job_id: id,
                    kind: self.inner.kind.to_string(),
                    message: error.to_string(),
                });
                Err(error)
            }
            // Resolved concurrently with the deadline
            None => reply_rx.await.unwrap_or(Err(ConversionError::ServiceDestroyed)),
        }
    }

    async fn ensure_worker(&self) -> Result<(mpsc::Sender<WorkerRequest>, u64)> {
        let mut state = self.inner.state.lock().await;
        self.ensure_alive()?;

        match &*state {
            WorkerState::Running {
                handle, generation, ..
            } => return Ok((handle.requests.clone(), *generation)),
            WorkerState::Failed(message) => {
                return Err(ConversionError::WorkerInit(message.clone()))
            }
            WorkerState::Idle => {}
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let spawned = spawn_worker(
            self.inner.kind,
            Arc::clone(&self.inner.factory),
            self.inner.config.channel_capacity,
        )
        .await;

        match spawned {
            Ok((handle, responses)) => {
                let sender = handle.requests.clone();
                let dispatcher = tokio::spawn(route_responses(
                    Arc::downgrade(&self.inner),
                    generation,
                    responses,
                ));
                *state = WorkerState::Running {
                    handle,
                    generation,
                    dispatcher,
                };
                self.inner.running.store(generation, Ordering::SeqCst);
                debug!(generation, "Conversion worker ready");
                Ok((sender, generation))
            }
            Err(ConversionError::WorkerInit(message)) => {
                warn!(error = %message, "Conversion worker failed to start");
                *state = WorkerState::Failed(message.clone());
                Err(ConversionError::WorkerInit(message))
            }
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionService")
            .field("kind", &self.inner.kind)
            .field("pending_jobs", &self.pending_jobs())
            .field("destroyed", &self.inner.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Inner {
    fn publish(&self, event: ConversionEvent) {
        let _ = self.events.emit(CoreEvent::Conversion(event));
    }

    /// Failure before the job ever reached the pending table
    fn fail_unregistered(&self, id: &str, error: &ConversionError) {
        self.publish(ConversionEvent::Failed {
            job_id: id.to_string(),
            kind: self.kind.to_string(),
            message: error.to_string(),
        });
    }

    /// Rejects a job whose worker stopped before the request reached it
    fn reject_stale(&self, id: &str) {
        if let Some(job) = self.pending.lock().remove(id) {
            let error = if self.destroyed.load(Ordering::SeqCst) {
                ConversionError::ServiceDestroyed
            } else {
                ConversionError::WorkerCrashed("worker stopped".to_string())
            };
            self.publish(ConversionEvent::Failed {
                job_id: id.to_string(),
                kind: self.kind.to_string(),
                message: error.to_string(),
            });
            let _ = job.reply.send(Err(error));
        }
    }

    fn on_response(&self, response: WorkerResponse) {
        match response {
            WorkerResponse::Progress {
                id,
                progress,
                phase,
            } => self.on_progress(id, progress, phase),
            WorkerResponse::ConversionComplete { id, data } => {
                let Some(job) = self.pending.lock().remove(&id) else {
                    debug!(job_id = %id, "Ignoring completion for unknown job");
                    return;
                };
                debug!(
                    job_id = %id,
                    elapsed_ms = job.created_at.elapsed().as_millis() as u64,
                    converted_size = data.converted_size,
                    "Conversion complete"
                );
                self.publish(ConversionEvent::Completed {
                    job_id: id,
                    kind: self.kind.to_string(),
                    original_size: data.original_size,
                    converted_size: data.converted_size,
                });
                let _ = job.reply.send(Ok(Reply::Converted(data)));
            }
            WorkerResponse::Error { id, error } => {
                let Some(job) = self.pending.lock().remove(&id) else {
                    debug!(job_id = %id, "Ignoring error for unknown job");
                    return;
                };
                self.publish(ConversionEvent::Failed {
                    job_id: id,
                    kind: self.kind.to_string(),
                    message: error.clone(),
                });
                let _ = job.reply.send(Err(ConversionError::Failed(error)));
            }
            WorkerResponse::Pong { id } => {
                if let Some(job) = self.pending.lock().remove(&id) {
                    let _ = job.reply.send(Ok(Reply::Pong));
                }
            }
        }
    }

    fn on_progress(&self, id: String, percent: u8, phase: String) {
        let callback = {
            let mut pending = self.pending.lock();
            let Some(job) = pending.get_mut(&id) else {
                return;
            };
            if percent < job.last_percent {
                return;
            }
            job.last_percent = percent;
            job.on_progress.clone()
        };

        if let Some(callback) = callback {
            callback(ConversionProgress {
                job_id: id.clone(),
                percent,
                phase: phase.clone(),
            });
        }

        self.publish(ConversionEvent::Progress {
            job_id: id,
            kind: self.kind.to_string(),
            percent,
            phase,
        });
    }

    /// Rejects every job pending on `generation` and marks the worker idle so the
    /// next call starts a new one.
    async fn on_crash(&self, generation: u64, message: String) {
        {
            let mut state = self.state.lock().await;
            if matches!(&*state, WorkerState::Running { generation: current, .. } if *current == generation)
            {
                *state = WorkerState::Idle;
            }
            let _ = self
                .running
                .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
        }

        let rejected: Vec<PendingJob> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, job)| job.generation == generation)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        warn!(
            kind = %self.kind,
            error = %message,
            rejected_jobs = rejected.len(),
            "Conversion worker crashed"
        );

        self.publish(ConversionEvent::WorkerCrashed {
            kind: self.kind.to_string(),
            message: message.clone(),
            rejected_jobs: rejected.len(),
        });

        for job in rejected {
            let _ = job
                .reply
                .send(Err(ConversionError::WorkerCrashed(message.clone())));
        }
    }
}

async fn route_responses(
    inner: Weak<Inner>,
    generation: u64,
    mut responses: mpsc::UnboundedReceiver<WorkerMessage>,
) {
    while let Some(message) = responses.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match message {
            WorkerMessage::Response(response) => inner.on_response(response),
            WorkerMessage::Fatal(message) => {
                inner.on_crash(generation, message).await;
                return;
            }
        }
    }

    // Channel closed without a fatal message: the thread is gone
    if let Some(inner) = inner.upgrade() {
        if !inner.destroyed.load(Ordering::SeqCst) {
            inner
                .on_crash(generation, "worker exited unexpectedly".to_string())
                .await;
        }
    }
}
