//! Data types shared between the gateway, the store client and the upload utility.
//!
//! Nothing here is persisted: object names live for one request, sessions
//! live inside a pooled connection.

pub mod object;
pub mod session;
