//! Signed HTTP delivery to the collector endpoint
//!
//! Requests run on a single-worker tokio runtime owned by the channel. The
//! calling thread blocks until the transfer finishes, the send timeout
//! elapses, or the [`CancelSignal`] is raised. Timed-out and cancelled
//! transfers are aborted and never joined.
//!
//! A raised signal stays raised and aborts every request until its owner
//! resets it, so a probe and the send that follows it fail together.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};

use crate::config::{DeliveryConfig, TestMode};
use crate::error::{Error, Result};
use crate::queue::EventQueue;

use super::cancel::CancelSignal;
use super::response::{interpret, DeliveryResponse};
use super::signing::{sanitize_key, sign};

/// Value of the `SdkType` header.
pub const SDK_TYPE: &str = "Rust";

/// Per-attempt settings, read from the runtime properties at tick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub timeout: Duration,
    pub test_mode: TestMode,
    pub simulated_latency: Duration,
}

/// HTTP channel to the collector
pub struct DeliveryChannel {
    endpoint: String,
    api_key: String,
    secret_key: String,
    http_client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    cancel: Arc<CancelSignal>,
}

impl DeliveryChannel {
    /// Create a channel from configuration
    ///
    /// Fails on missing keys or when the HTTP runtime cannot be built.
    pub fn new(config: &DeliveryConfig, cancel: Arc<CancelSignal>) -> Result<Self> {
        config.validate()?;

        let api_key = sanitize_key(config.api_key.as_deref().unwrap_or_default());
        let secret_key = sanitize_key(config.secret_key.as_deref().unwrap_or_default());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("sdkversion"),
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );
        headers.insert(HeaderName::from_static("sdktype"), HeaderValue::from_static(SDK_TYPE));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("tally-delivery")
            .enable_all()
            .build()
            .map_err(|e| Error::Runtime(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            secret_key,
            http_client,
            runtime,
            cancel,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver the whole queue as one signed batch (blocking).
    ///
    /// Returns `true` only when the collector acknowledged with status "ok".
    pub fn send(&self, queue: &mut EventQueue, options: &SendOptions) -> bool {
        let body = queue.to_json_string().to_string();
        let signature = match sign(&self.secret_key, &body) {
            Ok(signature) => signature,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to sign batch");
                return false;
            }
        };
        let url = format!(
            "{}?api_key={}&signature={}",
            self.endpoint,
            urlencoding::encode(&self.api_key),
            signature
        );

        tracing::debug!(records = queue.len(), bytes = body.len(), "Sending batch");
        let response = self.execute(url, Some(body), options);
        response.is_success()
    }

    /// Probe the endpoint with a GET (blocking).
    pub fn check_server(&self, options: &SendOptions) -> bool {
        let url = format!("{}?ping", self.endpoint);
        self.execute(url, None, options).is_reachable()
    }

    /// Abort the attempt in flight, or the next one if none is running.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn execute(&self, url: String, body: Option<String>, options: &SendOptions) -> DeliveryResponse {
        let response = self.runtime.block_on(self.dispatch(url, body, options));

        match &response.error {
            Some(error) => tracing::info!(code = response.code, error = %error, "Request failed"),
            None => tracing::debug!(code = response.code, "Request completed"),
        }
        response
    }

    async fn dispatch(
        &self,
        url: String,
        body: Option<String>,
        options: &SendOptions,
    ) -> DeliveryResponse {
        match options.test_mode {
            TestMode::SimulateSuccess => {
                return self
                    .simulate(options.simulated_latency, DeliveryResponse::simulated_ok())
                    .await
            }
            TestMode::SimulateOffline => {
                return self
                    .simulate(
                        options.simulated_latency,
                        DeliveryResponse::failed("simulated offline"),
                    )
                    .await
            }
            TestMode::Normal => {}
        }

        let request = match body {
            Some(body) => self.http_client.post(&url).body(body),
            None => self.http_client.get(&url),
        };

        let mut transfer = tokio::spawn(async move {
            let response = request
                .send()
                .await
                .map_err(|e| format!("HTTP request failed: {}", e))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| format!("failed to read response: {}", e))?;
            Ok::<_, String>(interpret(status, &text))
        });

        tokio::select! {
            joined = &mut transfer => match joined {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => DeliveryResponse::failed(error),
                Err(e) => DeliveryResponse::failed(format!("transfer task failed: {}", e)),
            },
            _ = tokio::time::sleep(options.timeout) => {
                transfer.abort();
                DeliveryResponse::failed("send timed out")
            }
            _ = self.cancel.cancelled() => {
                transfer.abort();
                DeliveryResponse::failed("send cancelled")
            }
        }
    }

    async fn simulate(&self, latency: Duration, outcome: DeliveryResponse) -> DeliveryResponse {
        tokio::select! {
            _ = tokio::time::sleep(latency) => outcome,
            _ = self.cancel.cancelled() => DeliveryResponse::failed("send cancelled"),
        }
    }
}
