use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::{logging::targets, prelude::*, Error};

/// HTTP status codes that indicate transient server errors (retryable)
const RETRYABLE_STATUS_CODES: &[u16] = &[429, 502, 503, 504];

/// Maximum number of retry attempts for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds (doubles with each retry)
const INITIAL_BACKOFF_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub rpc_url: String,
}

async fn parse_response(response: Response) -> Result<String> {
    let status_code = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| Error::GenericRequest(e.to_string()))?;

    if status_code < 400 {
        return Ok(text);
    }
    if (400..500).contains(&status_code) {
        return Err(Error::ClientRequest {
            status_code,
            error_message: text,
        });
    }

    Err(Error::ServerRequest {
        status_code,
        error_message: text,
    })
}

impl HttpClient {
    pub fn new(client: Option<Client>, rpc_url: impl Into<String>) -> Self {
        Self {
            client: client.unwrap_or_default(),
            rpc_url: rpc_url.into(),
        }
    }

    /// Send a POST request with automatic retry for transient server errors.
    ///
    /// Uses exponential backoff: 100ms, 200ms, 400ms between retries.
    pub async fn post(&self, data: String) -> Result<String> {
        for attempt in 0..=MAX_RETRIES {
            let request = self
                .client
                .post(&self.rpc_url)
                .header("Content-Type", "application/json")
                .body(data.clone())
                .build()
                .map_err(|e| Error::GenericRequest(e.to_string()))?;

            let result = self
                .client
                .execute(request)
                .await
                .map_err(|e| Error::GenericRequest(e.to_string()))?;

            let status = result.status().as_u16();

            if RETRYABLE_STATUS_CODES.contains(&status) && attempt < MAX_RETRIES {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    target: targets::RPC,
                    status = status,
                    attempt = attempt + 1,
                    max_attempts = MAX_RETRIES + 1,
                    backoff_ms = backoff.as_millis(),
                    "Retryable HTTP error, backing off"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            return parse_response(result).await;
        }

        Err(Error::GenericRequest(format!(
            "Max retries ({MAX_RETRIES}) exceeded for {}",
            self.rpc_url
        )))
    }

    /// Serialize `body`, POST it, and deserialize the response.
    pub async fn post_json<B, R>(&self, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data = serde_json::to_string(body).map_err(|e| Error::JsonParse(e.to_string()))?;
        let text = self.post(data).await?;
        serde_json::from_str(&text).map_err(|e| Error::JsonParse(e.to_string()))
    }
}
