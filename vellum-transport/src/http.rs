use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use tokio::task;
use ureq::{Agent, AgentBuilder, Error as UreqError};
use url::Url;

use vellum_core::TransportError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct HeadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
}

#[derive(Debug, Clone)]
pub struct GetResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Minimal HTTP surface the transport needs. Status codes come back as data,
/// even for 4xx/5xx, so retry and fallback decisions live in one place.
#[async_trait::async_trait]
pub trait HttpBackend: Send + Sync {
    async fn head(&self, url: &Url) -> Result<HeadResponse, TransportError>;
    /// `range` is a half-open byte range `[begin, end)`.
    async fn get(
        &self,
        url: &Url,
        range: Option<(u64, u64)>,
    ) -> Result<GetResponse, TransportError>;
}

pub struct UreqBackend {
    agent: Agent,
}

impl UreqBackend {
    pub fn new() -> Self {
        let agent = AgentBuilder::new()
            .timeout_read(HTTP_TIMEOUT)
            .timeout_write(HTTP_TIMEOUT)
            .build();
        Self { agent }
    }
}

impl Default for UreqBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn network_error(url: &Url, err: impl std::fmt::Display) -> TransportError {
    TransportError::Network {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[async_trait::async_trait]
impl HttpBackend for UreqBackend {
    async fn head(&self, url: &Url) -> Result<HeadResponse, TransportError> {
        let agent = self.agent.clone();
        let target = url.clone();
        task::spawn_blocking(move || {
            let response = match agent.head(target.as_str()).call() {
                Ok(response) => response,
                Err(UreqError::Status(code, _)) => {
                    return Ok(HeadResponse {
                        status: code,
                        content_length: None,
                        accept_ranges: false,
                    });
                }
                Err(err) => return Err(network_error(&target, err)),
            };
            let content_length = response
                .header("Content-Length")
                .and_then(|raw| raw.trim().parse().ok());
            let accept_ranges = response
                .header("Accept-Ranges")
                .map(|raw| raw.trim().eq_ignore_ascii_case("bytes"))
                .unwrap_or(false);
            Ok(HeadResponse {
                status: response.status(),
                content_length,
                accept_ranges,
            })
        })
        .await
        .map_err(|err| network_error(url, err))?
    }

    async fn get(
        &self,
        url: &Url,
        range: Option<(u64, u64)>,
    ) -> Result<GetResponse, TransportError> {
        let agent = self.agent.clone();
        let target = url.clone();
        task::spawn_blocking(move || {
            let mut request = agent.get(target.as_str());
            if let Some((begin, end)) = range {
                // HTTP ranges are inclusive on both ends.
                request = request.set("Range", &format!("bytes={}-{}", begin, end.saturating_sub(1)));
            }
            let response = match request.call() {
                Ok(response) => response,
                Err(UreqError::Status(code, _)) => {
                    return Ok(GetResponse {
                        status: code,
                        body: Bytes::new(),
                    });
                }
                Err(err) => return Err(network_error(&target, err)),
            };
            let status = response.status();
            let mut body = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut body)
                .map_err(|err| network_error(&target, err))?;
            Ok(GetResponse {
                status,
                body: Bytes::from(body),
            })
        })
        .await
        .map_err(|err| network_error(url, err))?
    }
}
