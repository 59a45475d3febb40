//! Subprocess execution for build attempts.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BuildAttempt, BuildConfig, BuildError, KILLED_EXIT_CODE, OUTPUT_MARKER, TIMEOUT_EXIT_CODE};
use crate::checkout::Checkout;

/// Grace period for draining pipes after the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
    /// Reading stopped before end of stream
    incomplete: bool,
}

impl Captured {
    fn into_text(self, max_bytes: usize) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            push_marker(&mut text, &format!("output truncated at {} bytes", max_bytes));
        }
        if self.incomplete {
            push_marker(
                &mut text,
                &format!("output capture stopped {:?} after exit; pipe held open", IO_CAPTURE_TIMEOUT),
            );
        }
        text
    }
}

fn push_marker(text: &mut String, message: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&format!("{} {}\n", OUTPUT_MARKER, message));
}

/// A stream being read in the background into a buffer the runner can
/// still take from if the reader never finishes.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Capture {
    fn spawn<R>(reader: R, max_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(read_bounded(reader, max_bytes, buffer.clone()));
        Self { buffer, task }
    }

    fn take(&self) -> Captured {
        self.buffer.lock().map(|mut c| std::mem::take(&mut *c)).unwrap_or_default()
    }
}

/// Runs the build for a checkout
#[derive(Debug, Clone)]
pub struct BuildRunner {
    config: BuildConfig,
}

impl BuildRunner {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run one build attempt.
    ///
    /// The subprocess is killed on timeout or cancellation. A timeout is
    /// recorded as an attempt with [`TIMEOUT_EXIT_CODE`]; cancellation is an
    /// error because the run is being abandoned.
    pub async fn run(
        &self,
        checkout: &Checkout,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<BuildAttempt, BuildError> {
        if !checkout.exists() {
            return Err(BuildError::CheckoutMissing(checkout.root().to_path_buf()));
        }
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let (program, args) = self.config.command.resolve(checkout.root());
        let described = self.config.command.describe(checkout.root());
        info!("Build attempt {} in {}: {}", index, checkout.root().display(), described);

        let started_at = Utc::now();
        let start = Instant::now();

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(checkout.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    BuildError::ToolNotInvocable {
                        command: described.clone(),
                        reason: e.to_string(),
                    }
                }
                _ => BuildError::Io(e),
            })?;

        let max = self.config.max_output_bytes;
        let stdout_capture = child.stdout.take().map(|out| Capture::spawn(out, max));
        let stderr_capture = child.stderr.take().map(|err| Capture::spawn(err, max));

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            () = tokio::time::sleep(self.config.timeout) => Outcome::TimedOut,
            () = cancel.cancelled() => Outcome::Cancelled,
        };

        let exit_code = match outcome {
            Outcome::Exited(status) => status.code().unwrap_or(KILLED_EXIT_CODE),
            Outcome::TimedOut => {
                warn!("Build attempt {} timed out after {:?}; killing", index, self.config.timeout);
                kill(&mut child).await;
                TIMEOUT_EXIT_CODE
            }
            Outcome::Cancelled => {
                info!("Build attempt {} cancelled; killing", index);
                kill(&mut child).await;
                return Err(BuildError::Cancelled);
            }
        };

        let (stdout, stderr) = tokio::join!(collect(stdout_capture, "stdout"), collect(stderr_capture, "stderr"));
        let stdout = stdout?.into_text(max);
        let mut stderr = stderr?.into_text(max);
        let duration_ms = start.elapsed().as_millis() as u64;

        if exit_code == TIMEOUT_EXIT_CODE {
            push_marker(
                &mut stderr,
                &format!("build timed out after {}ms", self.config.timeout.as_millis()),
            );
        }

        debug!(
            "Build attempt {} finished: exit {} in {}ms ({} bytes stdout, {} bytes stderr)",
            index,
            exit_code,
            duration_ms,
            stdout.len(),
            stderr.len()
        );

        Ok(BuildAttempt {
            index,
            exit_code,
            stdout,
            stderr,
            duration_ms,
            failure_signature: None,
            started_at,
        })
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill build process: {}", e);
    }
}

/// Append up to `max_bytes` to `buffer`, draining and discarding the rest.
async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
    buffer: Arc<Mutex<Captured>>,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let Ok(mut captured) = buffer.lock() else {
            return Ok(());
        };
        let remaining = max_bytes.saturating_sub(captured.bytes.len());
        if n > remaining {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..n.min(remaining)]);
    }
}

/// Wait briefly for a stream to reach end of file, keeping whatever was read.
async fn collect(capture: Option<Capture>, stream: &str) -> Result<Captured, BuildError> {
    let Some(mut capture) = capture else {
        return Ok(Captured::default());
    };

    match tokio::time::timeout(IO_CAPTURE_TIMEOUT, &mut capture.task).await {
        Ok(Ok(Ok(()))) => Ok(capture.take()),
        Ok(Ok(Err(e))) => Err(BuildError::Io(e)),
        Ok(Err(e)) => {
            warn!("{} capture task failed: {}", stream, e);
            Ok(capture.take())
        }
        Err(_) => {
            // A grandchild such as a Gradle daemon may still hold the pipe open
            warn!("{} capture did not finish within {:?}; keeping partial output", stream, IO_CAPTURE_TIMEOUT);
            capture.task.abort();
            let mut captured = capture.take();
            captured.incomplete = true;
            Ok(captured)
        }
    }
}
