//! HTTPS lookups that fetch simple config blobs.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

/// Which lookup a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    /// App metadata URL serving the blob as text.
    AppRequest,
    /// DNS-over-HTTPS JSON answer carrying the blob in TXT records.
    DnsRequest,
}

impl LookupKind {
    /// Short name for logs.
    pub fn name(self) -> &'static str {
        match self {
            LookupKind::AppRequest => "app",
            LookupKind::DnsRequest => "dns",
        }
    }
}

/// Lookup failures.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Request could not be sent or the body could not be read.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("unexpected http status {0}")]
    Status(u16),

    /// DNS answer is not valid JSON.
    #[error("malformed dns response: {0}")]
    DnsResponse(#[from] serde_json::Error),

    /// DNS answer has no TXT records.
    #[error("dns response carries no txt records")]
    NoRecords,
}

/// Source of lookup responses.
///
/// Implemented by [`HttpLookup`]; tests substitute their own.
pub trait Lookup: Send + Sync + 'static {
    /// Fetch the simple config payload for `kind` from `url`.
    fn fetch(
        &self,
        kind: LookupKind,
        url: &str,
    ) -> impl Future<Output = Result<Vec<u8>, LookupError>> + Send;
}

/// reqwest-backed [`Lookup`].
#[derive(Debug, Clone)]
pub struct HttpLookup {
    client: reqwest::Client,
}

impl HttpLookup {
    /// Create a lookup client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Lookup for HttpLookup {
    async fn fetch(&self, kind: LookupKind, url: &str) -> Result<Vec<u8>, LookupError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        trace!(kind = kind.name(), len = body.len(), "lookup response");

        match kind {
            LookupKind::AppRequest => Ok(body.to_vec()),
            LookupKind::DnsRequest => dns_txt_payload(&body),
        }
    }
}

#[derive(Deserialize)]
struct DnsJson {
    #[serde(rename = "Answer", default)]
    answer: Vec<DnsAnswer>,
}

#[derive(Deserialize)]
struct DnsAnswer {
    #[serde(rename = "type", default)]
    record_type: u16,
    data: String,
}

const TXT_RECORD: u16 = 16;

/// Join the TXT records of a DNS-over-HTTPS JSON answer.
///
/// Records are unquoted and concatenated longest first, so a blob split over
/// several records reassembles regardless of answer order.
pub fn dns_txt_payload(body: &[u8]) -> Result<Vec<u8>, LookupError> {
    let parsed: DnsJson = serde_json::from_slice(body)?;

    let mut records: Vec<String> = parsed
        .answer
        .into_iter()
        .filter(|answer| answer.record_type == TXT_RECORD)
        .map(|answer| answer.data.chars().filter(|c| *c != '"').collect())
        .collect();
    if records.is_empty() {
        return Err(LookupError::NoRecords);
    }

    records.sort_by(|a, b| b.len().cmp(&a.len()));
    Ok(records.concat().into_bytes())
}
