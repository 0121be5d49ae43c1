use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

/// Source of forwarding endpoints for the indirect fetch path.
pub trait EndpointPool: Send + Sync + fmt::Debug {
    fn endpoints(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticEndpointPool {
    endpoints: Vec<String>,
}

impl StaticEndpointPool {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl EndpointPool for StaticEndpointPool {
    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

pub fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: Option<String>,
    /// Budget for the forwarded attempt; short so a dead endpoint fails fast.
    pub indirect_timeout: Duration,
    pub direct_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            indirect_timeout: Duration::from_secs(5),
            direct_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPath {
    Indirect,
    Direct,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub path: FetchPath,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid forwarding endpoint {endpoint}: {source}")]
    Proxy {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            FetchError::Request(err) => err.status().map(|s| s.as_u16()),
            FetchError::Proxy { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request(err) if err.is_timeout())
    }
}

/// Two-path fetcher: one forwarded attempt through a random pool endpoint, then a
/// single direct attempt. No backoff, no further retries.
#[derive(Debug)]
pub struct HttpFetcher {
    direct: reqwest::Client,
    user_agent: Option<String>,
    pool: Arc<dyn EndpointPool>,
    indirect_timeout: Duration,
    direct_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig, pool: Arc<dyn EndpointPool>) -> Result<Self, FetchError> {
        // The direct path must not pick up system proxy settings.
        let direct = base_builder(config.user_agent.as_deref()).no_proxy().build()?;
        Ok(Self {
            direct,
            user_agent: config.user_agent,
            pool,
            indirect_timeout: config.indirect_timeout,
            direct_timeout: config.direct_timeout,
        })
    }

    pub fn pick_endpoint(&self) -> Option<String> {
        self.pool.endpoints().choose(&mut rand::rng()).cloned()
    }

    /// Single attempt without forwarding.
    pub async fn fetch_direct(&self, url: &str, timeout: Duration) -> Result<FetchedResponse, FetchError> {
        send(&self.direct, url, timeout, FetchPath::Direct).await
    }

    /// Indirect attempt first (when the pool has endpoints), direct attempt on any failure.
    pub async fn fetch_resilient(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("resilient_fetch", url);
        async {
            match self.pick_endpoint() {
                Some(endpoint) => match self.fetch_via(&endpoint, url).await {
                    Ok(resp) => return Ok(resp),
                    Err(err) => {
                        info!(%endpoint, error = %err, "forwarded fetch failed; switching to direct connection");
                    }
                },
                None => debug!("endpoint pool is empty; using direct connection"),
            }

            match self.fetch_direct(url, self.direct_timeout).await {
                Ok(resp) => Ok(resp),
                Err(err) => {
                    error!(error = %err, "direct fetch failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_via(&self, endpoint: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let proxy = reqwest::Proxy::all(endpoint).map_err(|source| FetchError::Proxy {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let client = base_builder(self.user_agent.as_deref())
            .proxy(proxy)
            .build()
            .map_err(|source| FetchError::Proxy {
                endpoint: endpoint.to_string(),
                source,
            })?;
        send(&client, url, self.indirect_timeout, FetchPath::Indirect).await
    }
}

fn base_builder(user_agent: Option<&str>) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder().gzip(true).brotli(true);
    match user_agent {
        Some(agent) => builder.user_agent(agent.to_string()),
        None => builder,
    }
}

async fn send(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    path: FetchPath,
) -> Result<FetchedResponse, FetchError> {
    let resp = client.get(url).timeout(timeout).send().await?;
    let status = resp.status();
    let final_url = resp.url().to_string();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: final_url,
        });
    }
    let body = resp.bytes().await?.to_vec();
    Ok(FetchedResponse {
        status,
        final_url,
        body,
        path,
    })
}
