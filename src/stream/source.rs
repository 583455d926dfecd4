use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{CONTENT_LENGTH, RANGE};

use crate::error::NetworkError;
use crate::models::ByteRange;

const USER_AGENT: &str = concat!("chunkstream/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Raw answer to a range request
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RangeResponse {
    /// 206, or a 200 whose body fits the requested range
    pub fn is_partial_content(&self, range: ByteRange) -> bool {
        match self.status {
            206 => true,
            200 => (self.body.len() as u64) <= range.byte_count(),
            _ => false,
        }
    }

    /// A 200 carrying more than was asked for: the server sent the whole file
    pub fn is_full_body(&self, range: ByteRange) -> bool {
        self.status == 200 && (self.body.len() as u64) > range.byte_count()
    }
}

/// Where track bytes come from
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Size of the resource, if the source reports one
    async fn content_length(&self, url: &str) -> Result<Option<u64>, NetworkError>;

    /// Request an inclusive byte range. Non-2xx statuses are returned, not
    /// raised, so the caller can decide on a fallback.
    async fn fetch_range(&self, url: &str, range: ByteRange) -> Result<RangeResponse, NetworkError>;

    /// Fetch the whole resource
    async fn fetch_all(&self, url: &str) -> Result<Vec<u8>, NetworkError>;
}

/// HTTP(S) byte source on reqwest
#[derive(Debug, Clone)]
pub struct HttpSource {
    http_client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Result<Self, NetworkError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn content_length(&self, url: &str) -> Result<Option<u64>, NetworkError> {
        let response = self
            .http_client
            .head(url)
            .send()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpStatus { status: status.as_u16() });
        }

        // Read the header directly; HEAD responses carry no body to measure
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        debug!("HEAD {} -> content-length {:?}", url, length);
        Ok(length)
    }

    async fn fetch_range(&self, url: &str, range: ByteRange) -> Result<RangeResponse, NetworkError> {
        let response = self
            .http_client
            .get(url)
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Ok(RangeResponse { status, body: Vec::new() });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        Ok(RangeResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn fetch_all(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpStatus { status: status.as_u16() });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;
        if body.is_empty() {
            return Err(NetworkError::EmptyBody);
        }

        Ok(body.to_vec())
    }
}
