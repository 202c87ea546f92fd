//! Network fetchers used by the HTTP cache on a miss or a refresh.

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::error::FetchError;
use crate::http::{HttpRequest, HttpResponse};

/// Performs the actual network request.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;
}

// == Reqwest Fetcher ==
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        let method = Method::from_bytes(request.options.method.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.options.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.options.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        debug!("Fetched {} -> {}", request.url, status);
        Ok(HttpResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }
}
