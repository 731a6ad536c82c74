//! Startup configuration for the mock workload.
//!
//! Fixed at startup and immutable afterwards. The four positional arguments
//! mirror how test fixtures launch the mock:
//! `app-mock <PORT> <APP_ID> <VERSION> <UPSTREAM_BASE_URL>`.

use clap::Args;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Task id reported when `MESOS_TASK_ID` is not set.
pub const UNKNOWN_TASK_ID: &str = "<UNKNOWN>";

/// Process-wide configuration.
#[derive(Debug, Clone, Args)]
pub struct MockConfig {
    /// TCP port to listen on
    #[arg(value_name = "PORT")]
    pub listen_port: u16,

    /// Identifier of the simulated application, echoed in ping replies
    #[arg(value_name = "APP_ID")]
    pub app_id: String,

    /// Simulated application version (only logged)
    #[arg(value_name = "VERSION")]
    pub app_version: String,

    /// Base URL of the orchestrator API queried for readiness and health
    #[arg(value_name = "UPSTREAM_BASE_URL", value_parser = parse_base_url)]
    pub upstream_base_url: String,

    /// Task identifier of this instance
    #[arg(long, env = "MESOS_TASK_ID", default_value = UNKNOWN_TASK_ID)]
    pub task_id: String,

    /// Directory served for paths without a dedicated handler
    #[arg(long, default_value = ".")]
    pub static_root: PathBuf,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,
}

impl MockConfig {
    /// Build a configuration with the default task id, static root and
    /// bind address.
    pub fn new(
        listen_port: u16,
        app_id: impl Into<String>,
        app_version: impl Into<String>,
        upstream_base_url: &str,
    ) -> Self {
        Self {
            listen_port,
            app_id: app_id.into(),
            app_version: app_version.into(),
            upstream_base_url: upstream_base_url.trim_end_matches('/').to_string(),
            task_id: UNKNOWN_TASK_ID.to_string(),
            static_root: PathBuf::from("."),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    #[must_use]
    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    #[must_use]
    pub fn with_bind(mut self, bind: IpAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Socket address the server listens on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.listen_port)
    }

    /// Upstream endpoint reporting this task's readiness.
    pub fn ready_url(&self) -> String {
        format!("{}/{}/ready", self.upstream_base_url, self.task_id)
    }

    /// Upstream endpoint reporting application health.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.upstream_base_url)
    }
}

fn parse_base_url(raw: &str) -> Result<String, String> {
    reqwest::Url::parse(raw).map_err(|e| format!("invalid upstream base URL {raw:?}: {e}"))?;
    Ok(raw.trim_end_matches('/').to_string())
}
