//! Application layer: endpoint tables, session derivation and the account
//! client built on top of the cache.

pub mod auth;
pub mod endpoints;
pub mod error;
pub mod query;
pub mod session;
pub mod transport;
