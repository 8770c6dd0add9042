//! Schema definitions for forkpool
//!
//! This crate contains the configuration data structures shared by the
//! `forkpool-core` library and the `forkpoold` daemon. All types here
//! implement JSON Schema generation for external consumption, and use
//! camelCase keys on the wire.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a configured worker launches its unit of work inside the child process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WorkerKind {
    /// Replace the child's process image with the program (never returns)
    #[default]
    Exec,
    /// Run the program as a monitored subprocess, then let the child exit
    Process,
}

/// A single unit of work as written in the daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Launch mechanism
    #[serde(default)]
    pub kind: WorkerKind,
    /// Program to run (absolute path for `exec`, PATH lookup for `process`)
    pub program: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables (`process` workers only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Working directory (`process` workers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl WorkerSpec {
    /// Build an `exec` worker spec from a program and its arguments
    pub fn exec(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: WorkerKind::Exec,
            program: program.into(),
            args,
            environment: BTreeMap::new(),
            working_directory: None,
        }
    }
}

/// Log verbosity accepted by the daemon
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose
    Trace,
    /// Per-step spawn/reap detail
    Debug,
    /// Lifecycle transitions
    #[default]
    Info,
    /// Recoverable problems
    Warn,
    /// Failures only
    Error,
}

impl LogLevel {
    /// The directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration structure for the daemon
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Maximum number of live worker processes
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    /// Poll interval of the control loop in milliseconds
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    /// Re-run a single worker forever instead of draining a queue
    #[serde(default)]
    pub perpetual: bool,
    /// Log level for the daemon
    #[serde(default)]
    pub log_level: LogLevel,
    /// Work queue, spawned in order
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_children: default_max_children(),
            sleep_ms: default_sleep_ms(),
            perpetual: false,
            log_level: LogLevel::default(),
            workers: Vec::new(),
        }
    }
}

fn default_max_children() -> usize {
    1
}

fn default_sleep_ms() -> u64 {
    1000
}
