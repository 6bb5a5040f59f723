//! The remote chunk store server.
//!
//! This builds on top of [`remotesrv_service`] and exposes its repositories over two interfaces: an
//! RPC interface negotiating chunk transfers and repository roots, and an HTTP interface moving
//! chunk contents. Both can share a single listener.
//!
//! Startup is split into small steps, each usable on its own:
//!
//! - [`address`] resolves listen address templates against the host's network interfaces.
//! - [`cache`] selects how repositories are opened.
//! - [`bootstrap`] constructs the [`Server`](web::Server) and binds its listeners.
//! - [`lifecycle`] serves until shutdown is requested and then stops gracefully.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod address;
pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod config;
pub mod endpoints;
pub mod lifecycle;
pub mod observability;
pub mod state;
pub mod web;
