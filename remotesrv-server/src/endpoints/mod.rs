//! Contains all endpoint handlers.
//!
//! The server speaks two protocols: a JSON RPC interface for negotiating chunk transfers and
//! repository roots ([`rpc`]), and a plain HTTP interface moving chunk contents ([`chunks`]). Use
//! [`routes`] to create a router for one or both of them.

use axum::Router;

use crate::state::ServiceState;

pub mod chunks;
pub mod common;
pub mod health;
pub mod rpc;

/// The protocols served on a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocols {
    /// Only the RPC interface.
    Rpc,
    /// Only the chunk transfer interface.
    Http,
    /// Both interfaces on a shared listener.
    Both,
}

/// Creates a router serving the given protocols, plus the health endpoint.
pub fn routes(protocols: Protocols) -> Router<ServiceState> {
    let mut router = health::router();
    if matches!(protocols, Protocols::Rpc | Protocols::Both) {
        router = router.merge(rpc::router());
    }
    if matches!(protocols, Protocols::Http | Protocols::Both) {
        router = router.merge(chunks::router());
    }
    router
}
