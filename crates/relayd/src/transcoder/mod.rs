//! External transcoder processes.
//!
//! One ffmpeg process runs per active session. It reads the browser's raw
//! media bytes on stdin and publishes FLV to `<base URL>/<session id>`.
//! The process itself is opaque to the relay: we only feed its input, log
//! its output, and notice when it exits.

mod output;
mod process;

pub use output::{OutputLineDecoder, MAX_OUTPUT_LINE};
pub use process::ProcessHandle;

use std::fmt;
use std::process::ExitStatus;

use relay_core::SessionId;
use thiserror::Error;

/// Program used when `FFMPEG_PATH` is not set.
pub const DEFAULT_PROGRAM: &str = "ffmpeg";

/// Token in an argument template replaced by the publish destination.
pub const DESTINATION_PLACEHOLDER: &str = "{destination}";

/// Low-latency H.264/AAC over FLV, reading from stdin.
pub const FFMPEG_ARGS: &[&str] = &[
    "-i",
    "-",
    "-c:v",
    "libx264",
    "-preset",
    "ultrafast",
    "-tune",
    "zerolatency",
    "-r",
    "25",
    "-g",
    "50",
    "-keyint_min",
    "25",
    "-crf",
    "25",
    "-pix_fmt",
    "yuv420p",
    "-sc_threshold",
    "0",
    "-profile:v",
    "main",
    "-level",
    "3.1",
    "-c:a",
    "aac",
    "-b:a",
    "128k",
    "-ar",
    "32000",
    "-f",
    "flv",
    DESTINATION_PLACEHOLDER,
];

/// How to launch a transcoder and where it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderConfig {
    program: String,
    args: Vec<String>,
    base_url: String,
}

impl TranscoderConfig {
    /// ffmpeg with the fixed low-latency argument list.
    pub fn ffmpeg(program: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::new(
            program,
            FFMPEG_ARGS.iter().map(|s| (*s).to_string()).collect(),
            base_url,
        )
    }

    /// Arbitrary program and argument template.
    ///
    /// Any occurrence of [`DESTINATION_PLACEHOLDER`] inside an argument is
    /// replaced with the session's publish URL at spawn time.
    pub fn new(program: impl Into<String>, args: Vec<String>, base_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            base_url: base_url.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Publish URL for a session: `<base>/<session id>`.
    pub fn destination_for(&self, session_id: &SessionId) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), session_id)
    }

    /// Argument list with the destination substituted.
    pub fn args_for(&self, destination: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(DESTINATION_PLACEHOLDER, destination))
            .collect()
    }
}

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited normally with a status code
    Code(i32),
    /// Killed by a signal (Unix)
    Signal(i32),
    /// Waiting on the process failed; treated as exited
    Unknown,
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Delivered to the session manager when a transcoder process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitNotice {
    pub session_id: SessionId,
    /// Instance number of the handle that owned the process
    pub instance: u64,
    pub outcome: ExitOutcome,
}

/// Errors raised by transcoder operations.
#[derive(Debug, Error)]
pub enum TranscoderError {
    #[error("failed to start transcoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder started without a {0} pipe")]
    MissingPipe(&'static str),

    #[error("transcoder input for {session_id} is closed")]
    InputClosed { session_id: SessionId },
}
