use std::time::Duration;

use log::debug;
use reqwest::{Client, StatusCode, Url};

use crate::error::ImportError;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; RecipeIngestBot/1.0)";

/// Plain HTTP page fetcher with a per-request timeout
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ImportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ImportError::fetch(format!("failed to build HTTP client: {}", e), false))?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<String, ImportError> {
        let url = parse_url(url)?;
        debug!("Fetching {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImportError::fetch(
                format!("{} returned {}", url, status),
                status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            ));
        }
        Ok(response.text().await?)
    }
}

/// Accept absolute http(s) URLs only
pub fn parse_url(raw: &str) -> Result<Url, ImportError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ImportError::InvalidSource(format!("'{}' is not a valid URL: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ImportError::InvalidSource(format!(
            "'{}' is not an http(s) URL",
            raw
        ))),
    }
}
