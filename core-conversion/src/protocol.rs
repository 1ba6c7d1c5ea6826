//! Typed messages exchanged with a conversion worker.
//!
//! Requests flow service → worker over a bounded channel; responses flow back
//! over an unbounded channel and are routed by correlation id.

use bytes::Bytes;
use std::fmt;

/// Media kind handled by one conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    Audio,
    Video,
}

impl ConversionKind {
    /// Lowercase name used in events and thread names
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionKind::Audio => "audio",
            ConversionKind::Video => "video",
        }
    }

    /// Capitalized name used in user-facing text
    pub fn label(&self) -> &'static str {
        match self {
            ConversionKind::Audio => "Audio",
            ConversionKind::Video => "Video",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "audio" => Some(ConversionKind::Audio),
            "video" => Some(ConversionKind::Video),
            _ => None,
        }
    }

    /// Request type understood by this kind's worker
    pub fn request_type(&self) -> RequestType {
        match self {
            ConversionKind::Audio => RequestType::ConvertAudio,
            ConversionKind::Video => RequestType::ConvertVideo,
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestType {
    ConvertAudio,
    ConvertVideo,
    Ping,
    /// Anything else; answered with an "Unknown message type" error
    Other(String),
}

impl RequestType {
    pub fn as_str(&self) -> &str {
        match self {
            RequestType::ConvertAudio => "convert-audio",
            RequestType::ConvertVideo => "convert-video",
            RequestType::Ping => "ping",
            RequestType::Other(other) => other,
        }
    }
}

impl From<&str> for RequestType {
    fn from(value: &str) -> Self {
        match value {
            "convert-audio" => RequestType::ConvertAudio,
            "convert-video" => RequestType::ConvertVideo,
            "ping" => RequestType::Ping,
            other => RequestType::Other(other.to_string()),
        }
    }
}

/// Conversion input
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    pub payload: Option<Bytes>,
    pub format: Option<String>,
}

/// Message sent to a worker
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub request_type: RequestType,
    pub id: String,
    pub data: Option<RequestData>,
}

impl WorkerRequest {
    pub fn convert(kind: ConversionKind, id: impl Into<String>, payload: Bytes, format: &str) -> Self {
        Self {
            request_type: kind.request_type(),
            id: id.into(),
            data: Some(RequestData {
                payload: Some(payload),
                format: Some(format.to_string()),
            }),
        }
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Ping,
            id: id.into(),
            data: None,
        }
    }
}

/// Result of a successful conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutput {
    pub converted_data: Bytes,
    pub original_size: u64,
    pub converted_size: u64,
}

/// Message sent back by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResponse {
    Progress {
        id: String,
        progress: u8,
        phase: String,
    },
    ConversionComplete {
        id: String,
        data: ConversionOutput,
    },
    Error {
        id: String,
        error: String,
    },
    Pong {
        id: String,
    },
}

impl WorkerResponse {
    pub fn id(&self) -> &str {
        match self {
            WorkerResponse::Progress { id, .. }
            | WorkerResponse::ConversionComplete { id, .. }
            | WorkerResponse::Error { id, .. }
            | WorkerResponse::Pong { id } => id,
        }
    }

    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerResponse::Progress { .. } => "progress",
            WorkerResponse::ConversionComplete { .. } => "conversion-complete",
            WorkerResponse::Error { .. } => "error",
            WorkerResponse::Pong { .. } => "pong",
        }
    }
}

/// Everything that can come out of a worker thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Response(WorkerResponse),
    /// The worker died; no further messages follow
    Fatal(String),
}
