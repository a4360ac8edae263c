use crate::api::error::AppError;
use futures::StreamExt;
use std::time::Duration;
use url::Url;

/// Downloads remote payloads into memory under a hard size cap.
pub struct RemoteFetcher {
    client: reqwest::Client,
    max_size: usize,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration, max_size: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self { client, max_size })
    }

    /// Parses `raw` and checks that it is an http(s) URL.
    pub fn parse_url(raw: &str) -> Result<Url, AppError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| AppError::BadRequest(format!("Invalid URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(AppError::BadRequest(format!(
                "Unsupported URL scheme: {}",
                scheme
            ))),
        }
    }

    /// Fetches `url` into a single buffer.
    ///
    /// A declared length over the cap is refused before the body is read;
    /// otherwise the stream is cut off as soon as the cap is crossed.
    pub async fn fetch(&self, url: &Url) -> Result<Vec<u8>, AppError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AppError::UpstreamFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::UpstreamFetch(format!(
                "{} responded with {}",
                url, status
            )));
        }

        let declared = response.content_length();
        if declared.is_some_and(|len| len > self.max_size as u64) {
            return Err(self.too_large());
        }

        let mut data = Vec::with_capacity(declared.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::UpstreamFetch(e.to_string()))?;
            if data.len() + chunk.len() > self.max_size {
                return Err(self.too_large());
            }
            data.extend_from_slice(&chunk);
        }

        tracing::debug!("Fetched {} bytes from {}", data.len(), url);
        Ok(data)
    }

    fn too_large(&self) -> AppError {
        AppError::PayloadTooLarge(format!(
            "Remote file exceeds the maximum allowed size of {} MB",
            self.max_size / 1024 / 1024
        ))
    }
}
