//! Mock workload for orchestrator lifecycle tests.
//!
//! This crate provides:
//! - Synthetic liveness (`/ping`) and delegated readiness/health probes
//! - Host introspection endpoints (shared memory size, IPC namespace, cgroups)
//! - A remote self-termination command (`DELETE /suicide`)
//! - Static file serving from the working directory for everything else
//!
//! Requests are served strictly one at a time, in the order connections
//! are accepted.

pub mod config;
pub mod error;
pub mod inspect;
pub mod listing;
pub mod routes;
pub mod server;
pub mod telemetry;
pub mod upstream;

pub use config::{MockConfig, UNKNOWN_TASK_ID};
pub use error::ProbeError;
pub use inspect::{CgroupReader, CgroupSnapshot, HostInspector, SystemInspector};
pub use routes::Route;
pub use server::{bind_listener, install_shutdown_handler, ProbeServer};
pub use upstream::{UpstreamClient, UpstreamReply};
