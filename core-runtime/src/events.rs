//! # Event Bus System
//!
//! Provides an event-driven architecture for the media core using
//! `tokio::sync::broadcast`. Services publish typed events; the UI, the passive
//! notifier and tests subscribe independently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐
//! │ Conversion (a/v) ├──────────>│           │   subscribe   ┌──────────────┐
//! └──────────────────┘           │           ├──────────────>│ Active screen│
//! ┌──────────────────┐   emit    │ EventBus  │               └──────────────┘
//! │ Upload manager   ├──────────>│ (broadcast│   subscribe   ┌──────────────┐
//! └──────────────────┘           │  channel) ├──────────────>│   Notifier   │
//! ┌──────────────────┐   emit    │           │               └──────────────┘
//! │ Combined store   ├──────────>│           │
//! └──────────────────┘           └───────────┘
//! ```
//!
//! A conversion result is always published here, whether or not the screen
//! that started it is still mounted. Screens are ordinary subscribers that may
//! come and go.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{ConversionEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Conversion(ConversionEvent::Failed {
//!         job_id: "job-1".to_string(),
//!         kind: "audio".to_string(),
//!         message: "Conversion timed out".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Conversion(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: all senders were dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Background conversion events
    Conversion(ConversionEvent),
    /// Upload saga events
    Upload(UploadEvent),
    /// Combined inventory events
    Inventory(InventoryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Conversion(e) => e.description(),
            CoreEvent::Upload(e) => e.description(),
            CoreEvent::Inventory(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Conversion(ConversionEvent::Failed { .. })
            | CoreEvent::Conversion(ConversionEvent::WorkerCrashed { .. })
            | CoreEvent::Upload(UploadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Upload(UploadEvent::ThumbnailSkipped { .. })
            | CoreEvent::Inventory(InventoryEvent::RemoteUnavailable { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Conversion(ConversionEvent::Completed { .. })
            | CoreEvent::Upload(UploadEvent::Completed { .. })
            | CoreEvent::Inventory(InventoryEvent::Refreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Conversion Events
// ============================================================================

/// Events emitted by the per-kind conversion worker services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConversionEvent {
    /// A job was accepted and sent to the worker.
    Started {
        job_id: String,
        /// Media kind of the owning service ("audio" or "video").
        kind: String,
        /// Target format requested.
        format: String,
    },
    /// Worker reported progress for a job.
    Progress {
        job_id: String,
        kind: String,
        /// Non-decreasing percentage (0-100).
        percent: u8,
        phase: String,
    },
    /// Job finished and converted bytes are available.
    Completed {
        job_id: String,
        kind: String,
        original_size: u64,
        converted_size: u64,
    },
    /// Job failed, timed out or was rejected by shutdown.
    Failed {
        job_id: String,
        kind: String,
        message: String,
    },
    /// The worker itself died; every pending job was rejected.
    WorkerCrashed {
        kind: String,
        message: String,
        rejected_jobs: usize,
    },
}

impl ConversionEvent {
    fn description(&self) -> &str {
        match self {
            ConversionEvent::Started { .. } => "Conversion started",
            ConversionEvent::Progress { .. } => "Conversion in progress",
            ConversionEvent::Completed { .. } => "Conversion completed",
            ConversionEvent::Failed { .. } => "Conversion failed",
            ConversionEvent::WorkerCrashed { .. } => "Conversion worker crashed",
        }
    }

    /// Media kind of the service that emitted the event.
    pub fn kind(&self) -> &str {
        match self {
            ConversionEvent::Started { kind, .. }
            | ConversionEvent::Progress { kind, .. }
            | ConversionEvent::Completed { kind, .. }
            | ConversionEvent::Failed { kind, .. }
            | ConversionEvent::WorkerCrashed { kind, .. } => kind,
        }
    }

    /// Whether this event ends a job (or all jobs, for a crash).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversionEvent::Completed { .. }
                | ConversionEvent::Failed { .. }
                | ConversionEvent::WorkerCrashed { .. }
        )
    }
}

// ============================================================================
// Upload Events
// ============================================================================

/// Events emitted while moving a local file to the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum UploadEvent {
    Started {
        file_name: String,
    },
    /// Composite progress across primary asset and thumbnail.
    Progress {
        file_name: String,
        /// Overall progress (0-100).
        percent: u8,
    },
    Completed {
        file_name: String,
        remote_path: String,
    },
    /// Primary asset landed but the thumbnail could not be processed or uploaded.
    ThumbnailSkipped {
        file_name: String,
        message: String,
    },
    Failed {
        file_name: String,
        message: String,
        /// Whether re-invoking the upload may succeed.
        retryable: bool,
    },
}

impl UploadEvent {
    fn description(&self) -> &str {
        match self {
            UploadEvent::Started { .. } => "Upload started",
            UploadEvent::Progress { .. } => "Upload in progress",
            UploadEvent::Completed { .. } => "Upload completed",
            UploadEvent::ThumbnailSkipped { .. } => "Thumbnail upload skipped",
            UploadEvent::Failed { .. } => "Upload failed",
        }
    }
}

// ============================================================================
// Inventory Events
// ============================================================================

/// Events emitted by the combined file store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum InventoryEvent {
    /// A refresh produced a new merged view.
    Refreshed {
        /// Media entries in the merged view.
        total: usize,
        local: usize,
        remote: usize,
        /// Local entries deleted because a remote copy exists.
        superseded: usize,
        /// True when the remote inventory could not be fetched.
        degraded: bool,
    },
    /// A local entry was garbage-collected in favour of its remote copy.
    LocalSuperseded {
        name: String,
    },
    /// The remote inventory failed; the view is local-only.
    RemoteUnavailable {
        message: String,
    },
}

impl InventoryEvent {
    fn description(&self) -> &str {
        match self {
            InventoryEvent::Refreshed { .. } => "Inventory refreshed",
            InventoryEvent::LocalSuperseded { .. } => "Local copy superseded by remote",
            InventoryEvent::RemoteUnavailable { .. } => "Remote inventory unavailable",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers that fall behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Publishers normally ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let uploads = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Upload(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
