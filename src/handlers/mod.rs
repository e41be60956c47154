//! HTTP handlers.

pub mod object_handlers;
