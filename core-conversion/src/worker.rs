//! Dedicated conversion worker thread.
//!
//! One OS thread owns one [`TranscodeEngine`] and processes requests serially.
//! The engine is built on the thread itself, so it only needs to be `Send`.
//! A panic while handling a message is reported as [`WorkerMessage::Fatal`] and
//! ends the thread.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use bridge_traits::media::{TranscodeEngine, TranscodeEngineFactory};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{ConversionError, Result};
use crate::protocol::{
    ConversionKind, ConversionOutput, RequestType, WorkerMessage, WorkerRequest, WorkerResponse,
};

/// Sending half of a running worker. Dropping it stops the thread once the
/// current message is done.
pub(crate) struct WorkerHandle {
    pub(crate) requests: mpsc::Sender<WorkerRequest>,
}

/// Starts a worker thread and waits for its engine to be constructed.
pub(crate) async fn spawn_worker(
    kind: ConversionKind,
    factory: TranscodeEngineFactory,
    capacity: usize,
) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<WorkerMessage>)> {
    let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();

    thread::Builder::new()
        .name(format!("{}-converter", kind))
        .spawn(move || {
            let built = catch_unwind(AssertUnwindSafe(|| factory()));
            let engine = match built {
                Ok(Ok(engine)) => engine,
                Ok(Err(e)) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                Err(panic) => {
                    let _ = ready_tx.send(Err(panic_message(panic.as_ref())));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            run(kind, engine, request_rx, response_tx);
        })
        .map_err(|e| ConversionError::WorkerInit(e.to_string()))?;

    match ready_rx.await {
        Ok(Ok(())) => Ok((
            WorkerHandle {
                requests: request_tx,
            },
            response_rx,
        )),
        Ok(Err(message)) => Err(ConversionError::WorkerInit(message)),
        Err(_) => Err(ConversionError::WorkerInit(
            "worker exited during startup".to_string(),
        )),
    }
}

fn run(
    kind: ConversionKind,
    mut engine: Box<dyn TranscodeEngine>,
    mut requests: mpsc::Receiver<WorkerRequest>,
    responses: mpsc::UnboundedSender<WorkerMessage>,
) {
    debug!(kind = %kind, "Conversion worker started");

    while let Some(request) = requests.blocking_recv() {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handle_request(kind, engine.as_mut(), request, &responses)
        }));

        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!(kind = %kind, error = %message, "Conversion worker crashed");
            let _ = responses.send(WorkerMessage::Fatal(message));
            return;
        }
    }

    debug!(kind = %kind, "Conversion worker stopped");
}

fn handle_request(
    kind: ConversionKind,
    engine: &mut dyn TranscodeEngine,
    request: WorkerRequest,
    responses: &mpsc::UnboundedSender<WorkerMessage>,
) {
    let reply = |response: WorkerResponse| {
        let _ = responses.send(WorkerMessage::Response(response));
    };
    let id = request.id;

    match request.request_type {
        RequestType::Ping => reply(WorkerResponse::Pong { id }),
        ref convert if *convert == kind.request_type() => {
            let data = request.data.unwrap_or_default();
            let Some(payload) = data.payload else {
                reply(WorkerResponse::Error {
                    id,
                    error: format!("{} data is required", kind.label()),
                });
                return;
            };
            let format = data.format.unwrap_or_else(|| default_format(kind).to_string());

            if payload.is_empty() {
                reply(WorkerResponse::ConversionComplete {
                    id,
                    data: ConversionOutput {
                        converted_data: Bytes::new(),
                        original_size: 0,
                        converted_size: 0,
                    },
                });
                return;
            }

            let mut on_progress = |progress: u8, phase: &str| {
                reply(WorkerResponse::Progress {
                    id: id.clone(),
                    progress: progress.min(100),
                    phase: phase.to_string(),
                });
            };

            match engine.transcode(&payload, &format, &mut on_progress) {
                Ok(converted) => {
                    let converted_size = converted.len() as u64;
                    reply(WorkerResponse::ConversionComplete {
                        id,
                        data: ConversionOutput {
                            converted_data: Bytes::from(converted),
                            original_size: payload.len() as u64,
                            converted_size,
                        },
                    });
                }
                Err(e) => {
                    warn!(kind = %kind, job_id = %id, error = %e, "Transcode failed");
                    reply(WorkerResponse::Error {
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }
        other => reply(WorkerResponse::Error {
            id,
            error: format!("Unknown message type: {}", other.as_str()),
        }),
    }
}

fn default_format(kind: ConversionKind) -> &'static str {
    match kind {
        ConversionKind::Audio => "mp3",
        ConversionKind::Video => "mp4",
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
