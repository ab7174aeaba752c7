//! Handle to one running transcoder process.
//!
//! Spawning a process starts four background tasks:
//! - a writer that owns stdin and drains queued chunks into it
//! - two log pumps for stdout and stderr
//! - an exit watcher that owns the child, signals it on request and
//!   reports an [`ExitNotice`] to the owner
//!
//! The handle itself only keeps the sending side of the input queue and the
//! watcher's stop trigger, so writes never block the caller and no signal
//! is ever sent to a PID that was already reaped.

use std::process::Stdio;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use relay_core::SessionId;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use super::output::OutputLineDecoder;
use super::{ExitNotice, ExitOutcome, TranscoderConfig, TranscoderError};

/// A live transcoder process for one session.
#[derive(Debug)]
pub struct ProcessHandle {
    session_id: SessionId,
    instance: u64,
    pid: Option<u32>,
    destination: String,
    started_at: DateTime<Utc>,
    input: mpsc::UnboundedSender<Bytes>,
    /// Asks the exit watcher to send SIGTERM
    terminate: oneshot::Sender<()>,
    chunks_forwarded: u64,
    bytes_forwarded: u64,
}

impl ProcessHandle {
    /// Starts a transcoder for `session_id`.
    ///
    /// `exits` receives exactly one [`ExitNotice`] once the process ends,
    /// whatever the reason.
    ///
    /// # Errors
    ///
    /// - `TranscoderError::Spawn` if the program cannot be started
    /// - `TranscoderError::MissingPipe` if stdin could not be captured
    pub fn spawn(
        config: &TranscoderConfig,
        session_id: SessionId,
        instance: u64,
        exits: mpsc::UnboundedSender<ExitNotice>,
    ) -> Result<Self, TranscoderError> {
        let destination = config.destination_for(&session_id);

        let mut child = Command::new(config.program())
            .args(config.args_for(&destination))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TranscoderError::Spawn {
                program: config.program().to_string(),
                source,
            })?;

        let pid = child.id();

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.start_kill();
                return Err(TranscoderError::MissingPipe("stdin"));
            }
        };

        let (input, input_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_input(session_id.clone(), stdin, input_rx));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(log_output(session_id.clone(), "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_output(session_id.clone(), "stderr", stderr));
        }

        let (terminate, terminate_rx) = oneshot::channel();
        tokio::spawn(watch_exit(
            session_id.clone(),
            instance,
            child,
            terminate_rx,
            exits,
        ));

        info!(
            session_id = %session_id,
            instance,
            pid = ?pid,
            destination = %destination,
            "Transcoder process started"
        );

        Ok(Self {
            session_id,
            instance,
            pid,
            destination,
            started_at: Utc::now(),
            input,
            terminate,
            chunks_forwarded: 0,
            bytes_forwarded: 0,
        })
    }

    /// Queues a chunk for the process's stdin.
    ///
    /// # Errors
    ///
    /// `TranscoderError::InputClosed` if the writer has stopped, which
    /// happens after stdin broke (the process died or closed its input).
    pub fn write(&mut self, chunk: Bytes) -> Result<(), TranscoderError> {
        let len = chunk.len() as u64;

        self.input
            .send(chunk)
            .map_err(|_| TranscoderError::InputClosed {
                session_id: self.session_id.clone(),
            })?;

        self.chunks_forwarded += 1;
        self.bytes_forwarded += len;
        Ok(())
    }

    /// Closes stdin and asks the process to terminate.
    ///
    /// Returns immediately; the exit is reported later via the exit notice.
    pub fn stop(self) {
        let Self {
            session_id,
            instance,
            pid,
            input,
            terminate,
            ..
        } = self;

        // Writer flushes what is queued, then closes stdin.
        drop(input);

        // The watcher is gone once the process has been reaped.
        if terminate.send(()).is_err() {
            debug!(session_id = %session_id, instance, "Transcoder already exited");
        }

        info!(session_id = %session_id, instance, pid = ?pid, "Transcoder stop requested");
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn chunks_forwarded(&self) -> u64 {
        self.chunks_forwarded
    }

    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }

    /// True while the writer task still accepts chunks.
    pub fn is_input_open(&self) -> bool {
        !self.input.is_closed()
    }
}

/// Drains queued chunks into stdin until the handle drops its sender.
async fn write_input(
    session_id: SessionId,
    mut stdin: ChildStdin,
    mut chunks: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(chunk) = chunks.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            error!(
                session_id = %session_id,
                error = %e,
                "Error writing to transcoder stdin"
            );
            // Dropping the receiver makes every later write fail fast.
            return;
        }
    }

    if let Err(e) = stdin.shutdown().await {
        debug!(session_id = %session_id, error = %e, "Failed to close transcoder stdin");
    }
    debug!(session_id = %session_id, "Transcoder input closed");
}

/// Logs each line of diagnostic output until the pipe closes.
///
/// Progress lines ending in `\r` are logged as they arrive.
async fn log_output<R>(session_id: SessionId, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, OutputLineDecoder::new());

    while let Some(line) = lines.next().await {
        match line {
            Ok(text) => info!(session_id = %session_id, stream, "{text}"),
            Err(e) => {
                debug!(session_id = %session_id, stream, error = %e, "Transcoder output read failed");
                break;
            }
        }
    }
}

/// Waits for the process and reports how it ended.
///
/// Owns the child so a stop request can only signal a process that has
/// not been reaped yet.
async fn watch_exit(
    session_id: SessionId,
    instance: u64,
    mut child: Child,
    mut terminate: oneshot::Receiver<()>,
    exits: mpsc::UnboundedSender<ExitNotice>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        signal = &mut terminate => {
            // A dropped handle without stop() leaves the process to end on EOF.
            if signal.is_ok() {
                request_termination(&session_id, child.id());
            }
            child.wait().await
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome::from(status),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to wait on transcoder");
            ExitOutcome::Unknown
        }
    };

    info!(session_id = %session_id, instance, outcome = %outcome, "Transcoder exited");

    // The manager may already be gone during shutdown.
    let _ = exits.send(ExitNotice {
        session_id,
        instance,
        outcome,
    });
}

/// Sends SIGTERM to a live child. `None` means it was already reaped.
#[cfg(unix)]
fn request_termination(session_id: &SessionId, pid: Option<u32>) {
    let Some(pid) = pid else {
        debug!(session_id = %session_id, "Transcoder already reaped, nothing to signal");
        return;
    };
    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        warn!(session_id = %session_id, pid, "PID out of range, cannot signal transcoder");
        return;
    };

    // SAFETY: kill(2) only reads its integer arguments.
    let result = unsafe { libc::kill(raw_pid, libc::SIGTERM) };
    if result != 0 {
        debug!(
            session_id = %session_id,
            pid,
            error = %std::io::Error::last_os_error(),
            "SIGTERM not delivered"
        );
    }
}

#[cfg(not(unix))]
fn request_termination(session_id: &SessionId, pid: Option<u32>) {
    warn!(
        session_id = %session_id,
        pid = ?pid,
        "Graceful termination is only supported on Unix; relying on end of input"
    );
}
