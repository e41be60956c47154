//! Router construction.

#[allow(clippy::module_inception)]
pub mod routes;
