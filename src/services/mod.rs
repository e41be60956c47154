//! Object store access: the connection seam, its Swift implementation, the
//! shared connection pool and the one-shot upload operation.

pub mod pool;
pub mod store;
pub mod swift;
pub mod upload_service;
