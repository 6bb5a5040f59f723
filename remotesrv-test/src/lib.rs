//! Test utilities for the remotesrv server.
//!
//! This crate provides utilities to facilitate end-to-end testing of the server. See the modules
//! for all available utilities.

pub mod chunks;
pub mod server;
pub mod tracing;
