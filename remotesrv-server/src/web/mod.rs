//! Module implementing the remotesrv network server.
//!
//! [`Server`] owns the shared service state and binds the listeners for the RPC and HTTP
//! interfaces. Each listener is served by an [`App`], which sets up routing and middleware for the
//! protocols served on it.
//!
//! # Testing
//!
//! For end-to-end tests of the server, see the `remotesrv-test` crate, which provides utilities
//! to start a test server and interact with it.

mod app;
mod middleware;
mod server;

pub use app::App;
pub use server::{Listeners, Server, ServerArgs};
