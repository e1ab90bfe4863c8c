//! HTTP transport implementation of the versioned store.
//!
//! Revisions map onto ETags and conditional requests: `If-None-Match`
//! backs the cheap "has anything changed" load, `If-Match` backs the
//! compare-and-swap save, and a 412 response carries the actual
//! current state for conflict resolution. The actual HTTP client is
//! abstracted behind a trait so any library (reqwest, ureq, hyper,
//! ...) can provide it.

use crate::error::{StoreError, StoreResult};
use crate::store::{Loaded, VersionedStore};
use folio_sync_protocol::{Revision, VersionedValue};
use serde_json::Value;
use tracing::debug;

/// A minimal HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `ETag` header value, if present.
    pub etag: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this to provide the actual transport. Errors returned
/// here are connection-level failures; HTTP error statuses come back
/// as ordinary responses.
pub trait HttpClient: Send + Sync {
    /// Sends one request and returns the response.
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, String>;
}

/// A [`VersionedStore`] over a key-value HTTP service.
pub struct HttpStore<C: HttpClient> {
    base_url: String,
    client: C,
}

impl<C: HttpClient> HttpStore<C> {
    /// Creates a store rooted at `base_url`, e.g.
    /// `"https://sync.example.com/kv"`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// The base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    fn revision_from(response: &HttpResponse) -> StoreResult<Revision> {
        response
            .etag
            .as_deref()
            .map(|etag| Revision::new(unquote(etag)))
            .ok_or_else(|| StoreError::transport_fatal("response missing ETag"))
    }

    fn value_from(response: &HttpResponse) -> StoreResult<Value> {
        serde_json::from_slice(&response.body).map_err(|e| StoreError::Codec(e.to_string()))
    }
}

/// Strips the quotes ETag values travel in.
fn unquote(etag: &str) -> &str {
    etag.trim_start_matches("W/").trim_matches('"')
}

impl<C: HttpClient> VersionedStore for HttpStore<C> {
    fn load(&self, key: &str, if_none_match: Option<&Revision>) -> StoreResult<Loaded> {
        let mut headers = Vec::new();
        if let Some(revision) = if_none_match {
            headers.push(("If-None-Match".to_string(), format!("\"{revision}\"")));
        }

        let response = self
            .client
            .request("GET", &self.url_for(key), &headers, None)
            .map_err(StoreError::transport_retryable)?;

        match response.status {
            200 => {
                let revision = Self::revision_from(&response)?;
                let value = Self::value_from(&response)?;
                Ok(Loaded::Value(VersionedValue::new(value, revision)))
            }
            304 => Ok(Loaded::NoChange),
            404 => Err(StoreError::NotFound),
            status => Err(status_error("load", key, status)),
        }
    }

    fn save(&self, key: &str, value: &Value, if_match: Option<&Revision>) -> StoreResult<Revision> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        match if_match {
            Some(revision) => {
                headers.push(("If-Match".to_string(), format!("\"{revision}\"")));
            }
            // First write of a new key must not clobber a concurrent
            // first writer.
            None => headers.push(("If-None-Match".to_string(), "*".to_string())),
        }

        let body = serde_json::to_vec(value).map_err(|e| StoreError::Codec(e.to_string()))?;
        let response = self
            .client
            .request("PUT", &self.url_for(key), &headers, Some(&body))
            .map_err(StoreError::transport_retryable)?;

        match response.status {
            200 | 201 => Self::revision_from(&response),
            412 => {
                // Precondition failed: the response reports the actual
                // current state when the service can provide it.
                let revision = Self::revision_from(&response)?;
                let current = if response.body.is_empty() {
                    None
                } else {
                    Some(VersionedValue::new(
                        Self::value_from(&response)?,
                        revision.clone(),
                    ))
                };
                debug!(key = %key, revision = %revision, "compare-and-swap conflict");
                Err(StoreError::Conflict { revision, current })
            }
            404 => Err(StoreError::NotFound),
            status => Err(status_error("save", key, status)),
        }
    }
}

fn status_error(operation: &str, key: &str, status: u16) -> StoreError {
    let message = format!("{operation} {key}: unexpected status {status}");
    if status == 408 || status == 429 || status >= 500 {
        StoreError::transport_retryable(message)
    } else {
        StoreError::transport_fatal(message)
    }
}
