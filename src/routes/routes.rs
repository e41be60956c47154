//! Defines the gateway's single endpoint.
//!
//! ## Structure
//! - `GET /{*object}` — stream an object from the configured container
//! - any other method — 405
//!
//! The handler is the router fallback so every path reaches it, including
//! `/` (rejected as an empty name) and nested keys like
//! `photos/2025/img.jpg`.

use crate::{
    handlers::object_handlers::{GatewayState, serve_file},
    services::store::StoreConnection,
};
use axum::Router;

/// Build the router carrying `GatewayState<C>` to the file handler.
pub fn routes<C: StoreConnection>() -> Router<GatewayState<C>> {
    Router::new().fallback(serve_file::<C>)
}
