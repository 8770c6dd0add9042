//! Process management primitives for the forkpool core library
//!
//! This module wraps the operating-system calls the supervisor is built on:
//! forking, non-blocking and blocking reaping, signal delivery, process image
//! replacement, and installation of the supervisor's signal handlers.
//!
//! ## Platform Support
//!
//! - **Unix**: Full support via `fork(2)`, `waitpid(2)`, `kill(2)` and `sigaction(2)`
//! - **Other platforms**: not supported; constructing a process controller fails
//!   with [`CoreError::UnsupportedEnvironment`](crate::CoreError::UnsupportedEnvironment)

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
