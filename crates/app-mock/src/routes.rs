//! Route table mapping (method, path) to a handler.

use axum::http::Method;
use std::fmt;

/// Handler selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Synthetic liveness reply
    Ping,
    /// Readiness delegated to the upstream
    Ready,
    /// Health delegated to the upstream
    Health,
    /// Size of the `/dev/shm` mount
    IpcShm,
    /// Inode of the IPC namespace
    IpcNs,
    /// Memory and cpu cgroup snapshot
    Cgroup,
    /// Self-termination
    Suicide,
    /// File under the static root
    Static,
    /// No handler; the connection is dropped without a reply
    Unrouted,
    /// Method not supported at all
    NotImplemented,
}

const GET_ROUTES: &[(&str, Route)] = &[
    ("/ping", Route::Ping),
    ("/ready", Route::Ready),
    ("/health", Route::Health),
    ("/ipcshm", Route::IpcShm),
    ("/ipcns", Route::IpcNs),
    ("/cgroup", Route::Cgroup),
];

const DELETE_ROUTES: &[(&str, Route)] = &[("/suicide", Route::Suicide)];

fn lookup(table: &[(&str, Route)], path: &str) -> Option<Route> {
    table
        .iter()
        .find_map(|(candidate, route)| (*candidate == path).then_some(*route))
}

impl Route {
    /// Resolve the handler for a method and URI path (query string excluded).
    ///
    /// Every `POST` is a health check regardless of path. Unknown `GET`
    /// paths and all `HEAD` requests go to the static file handler.
    pub fn resolve(method: &Method, path: &str) -> Self {
        match *method {
            Method::GET => lookup(GET_ROUTES, path).unwrap_or(Self::Static),
            Method::HEAD => Self::Static,
            Method::POST => Self::Health,
            Method::DELETE => lookup(DELETE_ROUTES, path).unwrap_or(Self::Unrouted),
            _ => Self::NotImplemented,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Ready => "ready",
            Self::Health => "health",
            Self::IpcShm => "ipcshm",
            Self::IpcNs => "ipcns",
            Self::Cgroup => "cgroup",
            Self::Suicide => "suicide",
            Self::Static => "static",
            Self::Unrouted => "unrouted",
            Self::NotImplemented => "not_implemented",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
