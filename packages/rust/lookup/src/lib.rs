//! Registry lookup client.
//!
//! One HTTP GET per chunk of identifiers: the identifiers travel comma-joined
//! in `req`, the credential in `key`. The response is decoded by
//! [`response`] into [`Record`]s.

mod response;

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use regenrich_shared::{EnrichError, Identifier, Record, Result};

pub use response::format_finances;

/// User-Agent string for registry requests.
const USER_AGENT: &str = concat!("regenrich/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// RegistryLookup
// ---------------------------------------------------------------------------

/// Something that can resolve a chunk of identifiers into records.
///
/// Implementations must reject an empty chunk with [`EnrichError::EmptyInput`].
pub trait RegistryLookup: Send + Sync + 'static {
    /// Look up every identifier in `chunk` with a single upstream call.
    fn fetch(&self, chunk: &[Identifier]) -> impl Future<Output = Result<Vec<Record>>> + Send;
}

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

/// HTTP client for the registry API.
#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Create a client for `endpoint`, authenticating with `api_key`.
    pub fn new(endpoint: Url, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichError::Lookup(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }
}

impl RegistryLookup for RegistryClient {
    #[instrument(skip_all, fields(chunk_len = chunk.len()))]
    async fn fetch(&self, chunk: &[Identifier]) -> Result<Vec<Record>> {
        if chunk.is_empty() {
            return Err(EnrichError::EmptyInput);
        }

        let joined = chunk
            .iter()
            .map(Identifier::as_str)
            .collect::<Vec<_>>()
            .join(",");

        // Errors are stripped of the URL so the key never reaches the logs.
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("req", joined.as_str()), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| EnrichError::Lookup(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Lookup(format!("registry returned HTTP {status}")));
        }

        let body = response.text().await.map_err(|e| {
            EnrichError::Lookup(format!("body read failed: {}", e.without_url()))
        })?;

        let records = response::parse_response(&body)?;
        debug!(requested = chunk.len(), records = records.len(), "chunk resolved");
        Ok(records)
    }
}
