//! HTTP server impersonating a deployed workload.
//!
//! Connections are accepted and served one at a time: the next `accept`
//! only happens after the previous connection has been fully answered.
//! Shutdown is requested through a `CancellationToken` that the accept
//! loop checks between connections, so a signal never cuts a response
//! short.

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::config::MockConfig;
use crate::error::ProbeError;
use crate::inspect::{parse_shm_size, CgroupReader, HostInspector};
use crate::listing::{listing_dir, render_directory_listing};
use crate::routes::Route;
use crate::upstream::UpstreamClient;

/// Pending connections queued by the kernel while one is being served.
const LISTEN_BACKLOG: u32 = 128;

/// First delay after a failed `accept`; doubles per consecutive failure.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Upper bound on the delay between failed `accept` attempts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Probe server state. Configuration is read from here, never captured.
pub struct ProbeServer {
    config: Arc<MockConfig>,
    upstream: UpstreamClient,
    inspector: Arc<dyn HostInspector>,
    cgroups: CgroupReader,
    static_files: ServeDir,
    shutdown: CancellationToken,
}

impl ProbeServer {
    pub fn new(config: MockConfig, inspector: Arc<dyn HostInspector>) -> Result<Self, ProbeError> {
        let static_files = ServeDir::new(&config.static_root);
        Ok(Self {
            config: Arc::new(config),
            upstream: UpstreamClient::new()?,
            inspector,
            cgroups: CgroupReader::default(),
            static_files,
            shutdown: CancellationToken::new(),
        })
    }

    /// Read cgroups from somewhere other than `/proc/self` and `/sys/fs/cgroup`.
    #[must_use]
    pub fn with_cgroup_reader(mut self, cgroups: CgroupReader) -> Self {
        self.cgroups = cgroups;
        self
    }

    /// Token that stops the accept loop once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Answer a single request.
    ///
    /// An `Err` means no response should be written at all; the caller
    /// closes the connection instead.
    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response, ProbeError>
    where
        B: Send + 'static,
    {
        let route = Route::resolve(req.method(), req.uri().path());
        debug!(method = %req.method(), path = %req.uri().path(), %route, "routing request");

        match route {
            Route::Ping => Ok(self.ping()),
            Route::Ready => self.relay(&self.config.ready_url(), "readiness").await,
            Route::Health => self.relay(&self.config.health_url(), "health").await,
            Route::IpcShm => self.ipc_shm_info().await,
            Route::IpcNs => self.ipc_ns_info().await,
            Route::Cgroup => self.cgroup_info().await,
            Route::Suicide => self.suicide(),
            Route::Static => Ok(self.serve_static(req).await),
            Route::NotImplemented => Ok((
                StatusCode::NOT_IMPLEMENTED,
                [(CONTENT_TYPE, "text/html")],
                format!("Unsupported method ({})", req.method()),
            )
                .into_response()),
            Route::Unrouted => Err(ProbeError::Unrouted {
                method: req.method().to_string(),
                path: req.uri().path().to_string(),
            }),
        }
    }

    /// `handle`, with failures logged against the request that caused them.
    async fn dispatch<B>(&self, req: Request<B>) -> Result<Response, ProbeError>
    where
        B: Send + 'static,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!(%method, %path, "got request");

        self.handle(req)
            .await
            .inspect_err(|e| error!(%method, %path, error = %e, "could not handle request"))
    }

    fn ping(&self) -> Response {
        (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/html")],
            format!("Pong {}", self.config.app_id),
        )
            .into_response()
    }

    async fn relay(&self, url: &str, what: &'static str) -> Result<Response, ProbeError> {
        debug!(%url, "querying upstream for {what}");
        let reply = self.upstream.get(url).await?;
        debug!(status = %reply.status, "done processing {what} request");
        Ok(reply.into_response())
    }

    async fn ipc_shm_info(&self) -> Result<Response, ProbeError> {
        debug!("reporting IPC shm info");
        let report = self.inspector.shm_usage_report().await?;
        let size = parse_shm_size(&report)?;
        Ok(text_response(size))
    }

    async fn ipc_ns_info(&self) -> Result<Response, ProbeError> {
        debug!("reporting IPC namespace info");
        let inode = self.inspector.ipc_namespace_inode().await?;
        Ok(text_response(inode))
    }

    async fn cgroup_info(&self) -> Result<Response, ProbeError> {
        let cgroups = self.cgroups.clone();
        let snapshot = tokio::task::spawn_blocking(move || cgroups.snapshot()).await??;
        let body = serde_json::to_vec(&snapshot)?;
        debug!(
            memory = snapshot.memory.len(),
            cpu = snapshot.cpu.len(),
            "done reporting cgroup info"
        );
        Ok((StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response())
    }

    fn suicide(&self) -> Result<Response, ProbeError> {
        info!("received a suicide request, sending SIGTERM to myself");
        // The signal only cancels the shutdown token. This connection is
        // still answered before the accept loop looks at it again.
        self.inspector.terminate_self()?;
        Ok((StatusCode::OK, [(CONTENT_TYPE, "text/html")]).into_response())
    }

    async fn serve_static<B>(&self, req: Request<B>) -> Response
    where
        B: Send + 'static,
    {
        let url_path = req.uri().path().to_string();
        let response = match self.static_files.clone().oneshot(req).await {
            Ok(response) => response.map(Body::new),
            Err(never) => match never {},
        };

        if response.status() != StatusCode::NOT_FOUND {
            return response;
        }
        let Some(dir) = listing_dir(&self.config.static_root, &url_path) else {
            return response;
        };

        let listed = tokio::task::spawn_blocking(move || render_directory_listing(&url_path, &dir)).await;
        match listed {
            Ok(Ok(html)) => (
                StatusCode::OK,
                [(CONTENT_TYPE, "text/html; charset=utf-8")],
                html,
            )
                .into_response(),
            Ok(Err(e)) => {
                debug!(error = %e, "no directory to list");
                response
            }
            Err(e) => {
                warn!(error = %e, "directory listing task failed");
                response
            }
        }
    }

    /// Serve connections from `listener` until the shutdown token fires.
    ///
    /// The listener is closed when this returns.
    pub async fn serve(self, listener: TcpListener) {
        let server = Arc::new(self);
        let shutdown = server.shutdown.clone();

        let mut http = http1::Builder::new();
        http.keep_alive(false).timer(TokioTimer::new());

        let mut accept_failures: u32 = 0;
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_backoff(accept_failures);
                        warn!(error = %e, ?delay, "failed to accept connection");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                },
            };
            accept_failures = 0;

            let handler = Arc::clone(&server);
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                async move { handler.dispatch(req).await }
            });

            if let Err(e) = http.serve_connection(TokioIo::new(stream), service).await {
                debug!(%peer, error = %e, "connection closed without a complete response");
            }
        }

        info!("closing the server");
        drop(listener);
    }
}

/// Delay before retrying after `failures` consecutive `accept` errors
/// (e.g. EMFILE), so a persistent error does not spin the loop.
pub fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Bind a listening socket with `SO_REUSEADDR` set before binding, so a
/// restarted mock can take over its port while old connections linger in
/// TIME_WAIT.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Cancel `token` on SIGTERM or SIGINT.
///
/// The signal streams are registered before this returns, so a signal sent
/// right afterwards (e.g. by `/suicide`) is never lost to the default
/// disposition.
pub fn install_shutdown_handler(token: CancellationToken) -> io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => warn!("received SIGTERM, closing the server"),
            _ = interrupt.recv() => warn!("received SIGINT, closing the server"),
        }
        token.cancel();
    });

    Ok(())
}

fn text_response(body: String) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "application/text")], body).into_response()
}
