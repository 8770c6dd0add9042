//! Image-replacing worker

use crate::process::unix;
use crate::CoreError;

/// Replaces the child process image with an executable
///
/// Holds an executable path and its argument list. The path is passed as
/// `argv[0]`; it is not searched in `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecWorker {
    path: String,
    args: Vec<String>,
}

impl ExecWorker {
    /// Create a worker for `path` with `args` (not including `argv[0]`)
    pub fn new(path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }

    /// Executable path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Arguments passed after `argv[0]`
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Replace the current process image
    ///
    /// On success this call does not return: the process becomes the target
    /// program and its exit code is whatever that program produces. The
    /// returned value is always the reason the replacement failed.
    pub fn execute(&self) -> CoreError {
        unix::exec_image(&self.path, &self.args)
    }
}
