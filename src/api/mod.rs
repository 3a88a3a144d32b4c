//! HTTP API: policy gate, routes, server assembly.

pub mod auth;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;

pub use server::ApiServer;
