//! Drone command egress.
//!
//! The vehicle's HTTP endpoint accepts one discrete token per request with
//! an empty body. Transmission failures are logged and not retried within
//! the tick; the autopilot's rate limiter advances only on success.

use http_body_util::Empty;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use gnat_autopilot::{AutopilotController, SmoothedCommand};
use gnat_types::DroneToken;

use crate::now_seconds;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad drone API URI: {0}")]
    Uri(#[from] hyper::http::uri::InvalidUri),
    #[error("request build failed: {0}")]
    Http(#[from] hyper::http::Error),
    #[error("request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    #[error("drone API returned {0}")]
    Status(hyper::StatusCode),
}

/// HTTP client for the drone's discrete command surface.
#[derive(Clone)]
pub struct DroneClient {
    base: String,
    client: Client<HttpConnector, Empty<bytes::Bytes>>,
}

impl DroneClient {
    pub fn new(base: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// POST one token with an empty body.
    pub async fn send(&self, token: DroneToken) -> Result<()> {
        let uri: hyper::Uri = format!("{}/api/{}", self.base, token.api_path()).parse()?;
        let req = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(uri)
            .body(Empty::new())?;
        let resp = self.client.request(req).await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status()));
        }
        Ok(())
    }
}

/// Drain planned commands from the pipeline and transmit them. Marks the
/// autopilot's rate limiter on success only.
pub async fn run_egress(
    mut rx: UnboundedReceiver<SmoothedCommand>,
    client: DroneClient,
    autopilot: Arc<Mutex<AutopilotController>>,
) {
    while let Some(plan) = rx.recv().await {
        tracing::debug!(token = ?plan.token, action = ?plan.action, "sending command");
        match client.send(plan.token).await {
            Ok(()) => autopilot.lock().mark_sent(now_seconds()),
            Err(e) => tracing::warn!("command transmission failed: {e}"),
        }
    }
}
