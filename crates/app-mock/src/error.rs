//! Error types for probe handling.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Errors that can occur while answering a single request.
///
/// None of these are fatal to the server. The dispatcher logs them and
/// drops the connection without writing a status line.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Upstream readiness/health endpoint could not be reached
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Introspection utility could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Introspection utility exited unsuccessfully
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// Shared memory usage report has no `/dev/shm` tmpfs line
    #[error("no tmpfs entry for /dev/shm in usage report: {0:?}")]
    ShmReport(String),

    /// `/proc/self/cgroup` line is not `id:controllers:path`
    #[error("malformed cgroup entry: {0:?}")]
    MalformedCgroup(String),

    /// File or directory could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signal could not be delivered to this process
    #[error("failed to signal own process: {0}")]
    Signal(#[from] nix::errno::Errno),

    /// Blocking filesystem task panicked or was cancelled
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// No handler exists for this method and path
    #[error("no handler for {method} {path}")]
    Unrouted { method: String, path: String },
}
