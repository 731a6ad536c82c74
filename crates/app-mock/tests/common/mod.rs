//! Shared helpers for probe server integration tests.

#![allow(dead_code)]

use app_mock::{bind_listener, CgroupReader, HostInspector, MockConfig, ProbeError, ProbeServer};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upstream that refuses connections (nothing listens on the discard port).
pub const UNREACHABLE_UPSTREAM: &str = "http://127.0.0.1:9";

/// `HostInspector` returning fixed output and counting termination requests.
#[derive(Default)]
pub struct CannedInspector {
    pub shm_report: String,
    pub ipc_inode: String,
    pub terminations: AtomicUsize,
}

impl CannedInspector {
    pub fn new(shm_report: &str, ipc_inode: &str) -> Self {
        Self {
            shm_report: shm_report.to_string(),
            ipc_inode: ipc_inode.to_string(),
            terminations: AtomicUsize::new(0),
        }
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostInspector for CannedInspector {
    async fn shm_usage_report(&self) -> Result<String, ProbeError> {
        Ok(self.shm_report.clone())
    }

    async fn ipc_namespace_inode(&self) -> Result<String, ProbeError> {
        Ok(self.ipc_inode.clone())
    }

    fn terminate_self(&self) -> Result<(), ProbeError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A probe server running on a random local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub host: Arc<CannedInspector>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Config bound to loopback on an ephemeral port.
pub fn local_config(app_id: &str, upstream: &str) -> MockConfig {
    MockConfig::new(0, app_id, "v1", upstream).with_bind(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub fn start(config: MockConfig) -> TestServer {
    start_with(config, CannedInspector::default(), None)
}

pub fn start_with(
    config: MockConfig,
    host: CannedInspector,
    cgroups: Option<CgroupReader>,
) -> TestServer {
    let host = Arc::new(host);
    let listener = bind_listener(config.listen_addr()).expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");

    let mut server = ProbeServer::new(config, Arc::clone(&host) as Arc<dyn HostInspector>)
        .expect("build server");
    if let Some(cgroups) = cgroups {
        server = server.with_cgroup_reader(cgroups);
    }

    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.serve(listener));

    TestServer {
        addr,
        host,
        shutdown,
        handle,
    }
}
