//! The file-streaming endpoint.
//!
//! `GET /<object>` authenticates a pooled store connection, opens the object
//! in the configured container and streams it back. Store calls share one
//! per-request deadline; the body is copied through a fixed-size buffer so
//! memory per request does not grow with object size.
//!
//! The borrowed connection rides along inside the response body and goes
//! back to the pool when the body finishes, fails, or is dropped because the
//! client disconnected.

use crate::{
    errors::AppError,
    models::object::{ObjectInfo, ObjectName},
    services::{
        pool::{ConnectionPool, PooledConnection},
        store::{ObjectReader, StoreConnection, with_deadline},
    },
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Uri, header},
    response::Response,
};
use bytes::Bytes;
use futures::Stream;
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Size of the buffer used to copy object bytes into the response.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Deadline for authenticating and opening an object.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the file handler.
pub struct GatewayState<C: Send> {
    pub pool: ConnectionPool<C>,
    pub container: Arc<str>,
    pub request_timeout: Duration,
    pub buffer_size: usize,
}

impl<C: Send> Clone for GatewayState<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            container: Arc::clone(&self.container),
            request_timeout: self.request_timeout,
            buffer_size: self.buffer_size,
        }
    }
}

impl<C: StoreConnection> GatewayState<C> {
    pub fn new(pool: ConnectionPool<C>, container: impl Into<Arc<str>>) -> Self {
        Self {
            pool,
            container: container.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            buffer_size: COPY_BUFFER_SIZE,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// `GET /{*object}` — stream an object from the configured container.
///
/// Any other method is rejected with 405 before a connection is borrowed.
pub async fn serve_file<C: StoreConnection>(
    State(state): State<GatewayState<C>>,
    method: Method,
    uri: Uri,
) -> Result<Response, AppError> {
    if method != Method::GET {
        return Err(AppError::method_not_allowed());
    }

    let request_id = Uuid::new_v4();
    let name = ObjectName::from_request_path(uri.path());
    info!(
        %request_id,
        object = name.as_ref().map(ObjectName::as_str).unwrap_or_default(),
        "file request"
    );
    let name = name.ok_or_else(|| AppError::bad_request("Invalid file name"))?;

    let budget = state.request_timeout;
    let deadline = Instant::now() + budget;
    let mut conn = match with_deadline(deadline, budget, state.pool.acquire()).await {
        Ok(conn) => conn,
        Err(err) => {
            error!(%request_id, "Failed to get a store connection: {}", err);
            return Err(AppError::internal("Authentication failed"));
        }
    };

    if let Err(err) = with_deadline(deadline, budget, conn.authenticate()).await {
        error!(%request_id, "Failed to authenticate with Swift: {}", err);
        return Err(AppError::internal("Authentication failed"));
    }

    let opened = with_deadline(
        deadline,
        budget,
        conn.object_open(&state.container, name.as_str()),
    )
    .await;
    let (reader, info) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            warn!(%request_id, "Failed to open object: {}", err);
            return Err(AppError::not_found("File not found"));
        }
    };

    let mut response = Response::new(Body::from_stream(LeasedBody {
        inner: ReaderStream::with_capacity(reader, state.buffer_size),
        _lease: conn,
        object: name.clone(),
        request_id,
        sent: 0,
        finished: false,
    }));
    set_download_headers(response.headers_mut(), &name, &info);

    Ok(response)
}

fn set_download_headers(headers: &mut HeaderMap, name: &ObjectName, info: &ObjectInfo) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&name.attachment_disposition())
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    if let Some(length) = info.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    if let Some(etag) = info.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }
}

/// Response body that owns the pooled connection for as long as it streams.
struct LeasedBody<C: Send> {
    inner: ReaderStream<ObjectReader>,
    _lease: PooledConnection<C>,
    object: ObjectName,
    request_id: Uuid,
    sent: u64,
    finished: bool,
}

// `inner` is Unpin and the lease is never pinned.
impl<C: Send> Unpin for LeasedBody<C> {}

impl<C: Send> Stream for LeasedBody<C> {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                error!(
                    request_id = %this.request_id,
                    object = %this.object,
                    sent = this.sent,
                    "Error streaming file: {}",
                    err
                );
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                debug!(
                    request_id = %this.request_id,
                    "streamed {} ({} bytes)",
                    this.object,
                    this.sent
                );
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<C: Send> Drop for LeasedBody<C> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                request_id = %self.request_id,
                "client went away while streaming {} after {} bytes",
                self.object,
                self.sent
            );
        }
    }
}
