// reqwest-backed HTTP transport

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::config::NetworkConfig;
use super::errors::TransportError;
use super::models::{DownloadedFile, HttpRequest, HttpResponse};
use super::traits::Transport;
use super::utils::parse_retry_after;

const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Shared HTTP client with a cookie jar and browser-like defaults
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = config.proxy.as_deref() {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(e) => {
                    return Err(TransportError::Other(format!(
                        "invalid proxy URL {}: {}",
                        proxy_url, e
                    )))
                }
            }
        }

        let client = builder.build()?;
        Ok(Self { client })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!("[Transport] Dropping invalid header {}", name),
            }
        }
        self.client
            .get(request.url.clone())
            .headers(headers)
            .timeout(request.timeout)
    }
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!("[Transport] GET {}", request.url);
        let response = self.build(request).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = header_string(response.headers(), CONTENT_TYPE);
        let retry_after = parse_retry_after(
            header_string(response.headers(), RETRY_AFTER).as_deref(),
            MAX_RETRY_AFTER,
        );
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            final_url,
            content_type,
            retry_after,
            body,
        })
    }

    async fn download_to(
        &self,
        request: &HttpRequest,
        dest: &Path,
    ) -> Result<DownloadedFile, TransportError> {
        debug!("[Transport] GET {} -> {}", request.url, dest.display());
        let mut response = self.build(request).send().await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = header_string(response.headers(), CONTENT_TYPE);

        if !response.status().is_success() {
            return Ok(DownloadedFile {
                status,
                final_url,
                content_type,
                bytes_written: 0,
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes_written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(DownloadedFile {
            status,
            final_url,
            content_type,
            bytes_written,
        })
    }
}
