//! Subprocess-monitoring worker
//!
//! [`ProcessWorker`] runs an external program to completion from inside the
//! forked child. Output is streamed line by line to an optional callback,
//! followed by a final [`ProcessEvent::Exited`]. Once the program exits,
//! `execute()` returns and the supervisor lets the child exit normally.
//!
//! The async runtime is created inside `execute()`, i.e. after the fork, so
//! no runtime threads are ever duplicated by `fork()`.

use crate::{CoreError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

/// Pre-built description of an external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Program to run (looked up in `PATH` when not absolute)
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables, added to the inherited environment
    pub environment: BTreeMap<String, String>,
    /// Working directory; inherited when `None`
    pub working_directory: Option<PathBuf>,
}

impl ProcessSpec {
    /// Describe `program` with `args`, inheriting environment and working directory
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Self::default()
        }
    }
}

/// Output stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Progress reported to a [`ProcessWorker`] callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of output, without the trailing newline
    Output {
        /// Stream the line came from
        stream: OutputStream,
        /// Line content
        line: String,
    },
    /// The process exited
    Exited {
        /// Exit code, if it exited normally
        code: Option<i32>,
        /// Terminating signal, if it was killed
        signal: Option<i32>,
    },
}

/// Completion callback invoked from inside the child process
pub type ProcessCallback = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

/// Runs a subprocess synchronously within the child
#[derive(Clone)]
pub struct ProcessWorker {
    spec: ProcessSpec,
    callback: Option<ProcessCallback>,
}

impl fmt::Debug for ProcessWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessWorker")
            .field("spec", &self.spec)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl ProcessWorker {
    /// Create a worker without a callback
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            spec,
            callback: None,
        }
    }

    /// Builder-style variant of [`ProcessWorker::set_callback`]
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.set_callback(callback);
        self
    }

    /// Set the callback invoked with output lines and the final exit status
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Process description
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Whether a callback is configured
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Run the process to completion and return its exit status
    ///
    /// Without a callback the process inherits stdout/stderr; with one, both
    /// are piped and forwarded line by line.
    pub fn execute(&self) -> Result<ExitStatus> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                CoreError::InitializationError(format!("Failed to build async runtime: {}", e))
            })?;
        runtime.block_on(self.run())
    }

    async fn run(&self) -> Result<ExitStatus> {
        let spec = &self.spec;
        debug!("Running process: {} {:?}", spec.program, spec.args);

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.envs(&spec.environment);
        command.stdin(Stdio::null());
        if let Some(dir) = &spec.working_directory {
            command.current_dir(dir);
        }
        if self.callback.is_some() {
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| {
            error!("Failed to spawn process '{}': {}", spec.program, e);
            CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", spec.program, e))
        })?;

        let callback = self.callback.as_ref();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, (), ()) = tokio::join!(
            child.wait(),
            forward_lines(stdout, OutputStream::Stdout, callback),
            forward_lines(stderr, OutputStream::Stderr, callback),
        );
        let status = status.map_err(|e| {
            CoreError::Wait(format!("Failed to wait for '{}': {}", spec.program, e))
        })?;

        debug!("Process '{}' finished with {}", spec.program, status);
        if let Some(cb) = callback {
            cb(&ProcessEvent::Exited {
                code: status.code(),
                signal: status.signal(),
            });
        }
        Ok(status)
    }
}

/// Forward each line of `reader` to the callback until end of file
///
/// Lines are split on raw bytes and decoded lossily, so output that is not
/// UTF-8 still arrives. The pipe is drained to the end even after a read
/// error, otherwise the subprocess would die of SIGPIPE on its next write.
async fn forward_lines<R>(reader: Option<R>, stream: OutputStream, callback: Option<&ProcessCallback>)
where
    R: AsyncRead + Unpin,
{
    let (Some(reader), Some(cb)) = (reader, callback) else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return,
            Ok(_) => cb(&ProcessEvent::Output {
                stream,
                line: decode_line(&buf),
            }),
            Err(e) => {
                warn!("Failed to read {:?} of subprocess: {}; discarding the rest", stream, e);
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                return;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
