//! Probing the application's primary HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Asks whether the application is serving requests.
#[async_trait]
pub trait EndpointProbe: Send + Sync + 'static {
    /// Whether the endpoint responded successfully.
    async fn responds(&self) -> bool;
}

#[async_trait]
impl EndpointProbe for bool {
    async fn responds(&self) -> bool {
        *self
    }
}

/// Probes a URL with a GET request.
///
/// The endpoint responds when it answers with a 2xx status within the timeout.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
    url: String,
}

impl HttpProbe {
    /// Creates a probe for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
            url: url.into(),
        }
    }

    /// The probed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EndpointProbe for HttpProbe {
    async fn responds(&self) -> bool {
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) => {
                debug!("{} answered {}", self.url, response.status());
                response.status().is_success()
            }
            Err(e) => {
                debug!("{} did not answer: {}", self.url, e);
                false
            }
        }
    }
}
