//! app-mock: a workload that answers orchestrator probes.
//!
//! ```text
//! app-mock <PORT> <APP_ID> <VERSION> <UPSTREAM_BASE_URL>
//! ```
//!
//! `MESOS_TASK_ID` supplies the task id used for readiness queries.

use anyhow::{Context, Result};
use app_mock::inspect::port_holder_report;
use app_mock::telemetry::{self, LogFormat};
use app_mock::{bind_listener, install_shutdown_handler, MockConfig, ProbeServer, SystemInspector};
use clap::Parser;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "app-mock")]
#[command(about = "Mock workload answering liveness, readiness and health probes")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: MockConfig,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);
    debug!(args = ?std::env::args().collect::<Vec<_>>(), "command line");

    match run(cli.config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: MockConfig) -> Result<()> {
    let addr = config.listen_addr();
    info!(
        "AppMock[{} {}]: {} has taken the stage at port {}. Will query {} for health and readiness status.",
        config.app_id, config.app_version, config.task_id, config.listen_port, config.upstream_base_url
    );

    let server = ProbeServer::new(config, Arc::new(SystemInspector))
        .context("Failed to build upstream client")?;
    install_shutdown_handler(server.shutdown_token()).context("Failed to install signal handlers")?;

    let listener = match bind_listener(addr) {
        Ok(listener) => listener,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            error!("Failed to bind to port {}. Trying to find the blocking process:", addr.port());
            match port_holder_report(addr.port()).await {
                Ok(report) => error!("{report}"),
                Err(lookup) => error!("Could not look up the blocking process: {lookup}"),
            }
            return Err(e).with_context(|| format!("Failed to bind {addr}"));
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to bind {addr}")),
    };

    info!("Listening on {}", listener.local_addr().unwrap_or(addr));
    server.serve(listener).await;
    Ok(())
}
