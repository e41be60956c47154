//! The connection seam between the gateway and an object store.
//!
//! [`StoreConnection`] is what the pool hands out and what the handler and
//! upload utility drive. `SwiftConnection` implements it over HTTP; tests
//! swap in stubs.

use crate::models::object::ObjectInfo;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::{future::Future, io, time::Duration};
use thiserror::Error;
use tokio::{io::AsyncRead, time::Instant};

/// Owned byte stream of an object body.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("auth version {0} is not supported")]
    UnsupportedAuthVersion(u8),
    #[error("connection is not authenticated")]
    NotAuthenticated,
    #[error("object `{object}` not found in container `{container}`")]
    NotFound { container: String, object: String },
    #[error("unexpected status {status} from store: {context}")]
    Status { status: StatusCode, context: String },
    #[error("malformed auth response: {0}")]
    Protocol(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("no connection available: {0}")]
    Pool(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            StoreError::Status { status, .. } => status.is_server_error(),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Optional parameters for [`StoreConnection::object_put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Exact body size; sent as `Content-Length` when known.
    pub content_length: Option<u64>,

    /// Hex MD5 of the body. The store rejects the upload if it does not match.
    pub etag: Option<String>,

    /// MIME type; the store detects one when unset.
    pub content_type: Option<String>,
}

/// A reusable, possibly authenticated handle to an object store.
///
/// A handle is used by one task at a time. Implementations keep whatever
/// session state they need between calls.
#[async_trait]
pub trait StoreConnection: Send + 'static {
    /// Authenticate unless a still-valid session is cached.
    async fn authenticate(&mut self) -> StoreResult<()>;

    /// Whether a usable session is currently cached.
    fn authenticated(&self) -> bool;

    /// Open a read-only stream of `object` in `container`.
    async fn object_open(
        &mut self,
        container: &str,
        object: &str,
    ) -> StoreResult<(ObjectReader, ObjectInfo)>;

    /// Upload `body` as `object` in `container`, returning the store's etag.
    async fn object_put(
        &mut self,
        container: &str,
        object: &str,
        body: ObjectReader,
        options: PutOptions,
    ) -> StoreResult<String>;
}

/// Run `fut` against an absolute deadline, mapping expiry to [`StoreError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Instant, budget: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(budget)),
    }
}
