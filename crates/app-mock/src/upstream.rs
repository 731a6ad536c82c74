//! Client for the orchestrator endpoints that decide readiness and health.

use axum::body::{Body, Bytes};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::ProbeError;

/// User-Agent sent upstream. Some orchestrator frontends reject unknown agents.
pub const USER_AGENT: &str = "Mozilla/5.0";

/// Status and raw body returned by the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl IntoResponse for UpstreamReply {
    fn into_response(self) -> Response {
        (self.status, [(CONTENT_TYPE, "text/html")], Body::from(self.body)).into_response()
    }
}

/// Thin wrapper around `reqwest` that relays whatever the upstream answers.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new() -> Result<Self, ProbeError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }

    /// Issue a GET and capture status and body.
    ///
    /// Redirects are followed. A final 4xx/5xx status is an error, so the
    /// caller drops the connection instead of relaying it.
    pub async fn get(&self, url: &str) -> Result<UpstreamReply, ProbeError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            debug!(%url, %status, "upstream rejected probe");
        }
        let response = response.error_for_status()?;
        let body = response.bytes().await?;
        debug!(%url, %status, body = %String::from_utf8_lossy(&body), "upstream replied");
        Ok(UpstreamReply { status, body })
    }
}
