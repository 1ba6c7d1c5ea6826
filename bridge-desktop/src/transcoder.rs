//! Transcoding engine backed by an `ffmpeg` child process

use bridge_traits::{
    error::{BridgeError, Result},
    media::{TranscodeEngine, TranscodeEngineFactory},
};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Pipes media through `ffmpeg` over stdin/stdout.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl FfmpegTranscoder {
    /// Locate `ffmpeg` on `PATH` and verify it runs.
    pub fn new() -> Result<Self> {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Result<Self> {
        let binary = binary.into();
        let status = Command::new(&binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("ffmpeg not found ({}): {}", binary.display(), e))
            })?;

        if !status.success() {
            return Err(BridgeError::NotAvailable(format!(
                "ffmpeg -version exited with {}",
                status
            )));
        }

        Ok(Self { binary })
    }

    /// Factory that builds a fresh engine on each worker thread.
    pub fn factory() -> TranscodeEngineFactory {
        Arc::new(|| {
            let engine: Box<dyn TranscodeEngine> = Box::new(FfmpegTranscoder::new()?);
            Ok(engine)
        })
    }
}

impl TranscodeEngine for FfmpegTranscoder {
    fn transcode(
        &mut self,
        input: &[u8],
        format: &str,
        progress: &mut dyn FnMut(u8, &str),
    ) -> Result<Vec<u8>> {
        if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BridgeError::OperationFailed(format!(
                "Unsupported target format: {:?}",
                format
            )));
        }

        progress(5, "Starting encoder");

        let mut child = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-f"])
            .arg(format)
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let Some(mut stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BridgeError::OperationFailed("ffmpeg stdin unavailable".to_string()));
        };
        let input = input.to_vec();
        // stdin is fed from a helper thread; stdout and stderr are drained
        // together by `wait_with_output`
        let writer = thread::spawn(move || stdin.write_all(&input));

        progress(20, "Transcoding");

        let finished = child.wait_with_output();
        let joined = writer.join();
        let output = finished?;
        let status = output.status;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let output = output.stdout;

        match joined {
            Ok(Ok(())) => {}
            // ffmpeg may close stdin early once it has what it needs
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(BridgeError::Io(e)),
            Err(_) => {
                return Err(BridgeError::OperationFailed(
                    "ffmpeg stdin writer panicked".to_string(),
                ))
            }
        }

        if !status.success() {
            warn!(%status, stderr = %stderr.trim(), "ffmpeg failed");
            return Err(BridgeError::OperationFailed(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        progress(100, "Finalizing");
        debug!(format, output_size = output.len(), "ffmpeg transcode finished");
        Ok(output)
    }
}
