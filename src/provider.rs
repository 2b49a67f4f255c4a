use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SpiceError;

/// Largest batch a provider accepts in one call.
pub const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceLookup {
    Found(String),
    /// The provider no longer recognizes the identifier.
    Deprecated,
}

/// Remote source of protein sequences.
///
/// Ids missing from the returned list are treated as "not answered" and are
/// requested again on the next collection pass.
pub trait SequenceProvider {
    fn fetch_sequences(&self, ids: &[String])
    -> Result<Vec<(String, SequenceLookup)>, SpiceError>;
}

#[derive(Serialize)]
struct SequenceRequest<'a> {
    ids: &'a [String],
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct SequenceRecord {
    query: String,
    seq: String,
}

#[derive(Deserialize)]
struct PingResponse {
    ping: u8,
}

#[derive(Clone)]
pub struct EnsemblHttpClient {
    client: Client,
    base_url: String,
}

impl EnsemblHttpClient {
    pub fn new(base_url: &str) -> Result<Self, SpiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("spice/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SpiceError::Filesystem(err.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SpiceError::TransientProvider(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SpiceError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(self.outage(err.to_string()));
                }
            }
        }
    }

    /// Liveness probe used once retries are exhausted.
    pub fn ping(&self) -> bool {
        let url = format!("{}/info/ping", self.base_url);
        self.client
            .get(&url)
            .send()
            .ok()
            .filter(|resp| resp.status().is_success())
            .and_then(|resp| resp.json::<PingResponse>().ok())
            .map(|body| body.ping == 1)
            .unwrap_or(false)
    }

    fn outage(&self, detail: String) -> SpiceError {
        if self.ping() {
            SpiceError::TransientProvider(format!("{detail} (service answers ping)"))
        } else {
            SpiceError::TransientProvider(format!("{detail} (service is down)"))
        }
    }

    fn post_sequences(&self, ids: &[String]) -> Result<Response, SpiceError> {
        let url = format!("{}/sequence/id", self.base_url);
        let body = SequenceRequest {
            ids,
            kind: "protein",
        };
        self.send_with_retries(|| self.client.post(&url).json(&body))
    }

    fn decode(response: Response) -> Result<Vec<(String, SequenceLookup)>, SpiceError> {
        let records: Vec<SequenceRecord> = response
            .json()
            .map_err(|err| SpiceError::TransientProvider(err.to_string()))?;
        Ok(records
            .into_iter()
            .map(|record| (record.query, SequenceLookup::Found(record.seq)))
            .collect())
    }

    fn handle_status(&self, response: Response) -> Result<Response, SpiceError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "sequence request failed".to_string());
        if is_retryable_status(status) {
            return Err(self.outage(format!("status {status}: {message}")));
        }
        Err(SpiceError::ProviderStatus { status, message })
    }
}

impl SequenceProvider for EnsemblHttpClient {
    fn fetch_sequences(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, SequenceLookup)>, SpiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.post_sequences(ids)?;
        if response.status() != StatusCode::BAD_REQUEST {
            return Self::decode(self.handle_status(response)?);
        }

        // A single unknown id rejects the whole batch; resolve ids one by one.
        debug!(batch = ids.len(), "batch rejected; retrying ids individually");
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let single = std::slice::from_ref(id);
            let response = self.post_sequences(single)?;
            if response.status() == StatusCode::BAD_REQUEST {
                warn!(id = %id, "identifier rejected by provider");
                results.push((id.clone(), SequenceLookup::Deprecated));
                continue;
            }
            results.extend(Self::decode(self.handle_status(response)?)?);
        }
        Ok(results)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
