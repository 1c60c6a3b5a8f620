//! Device management HTTP server.
//!
//! Wires the core library and storage backends into an Axum router serving
//! configuration documents, enrollment, binaries, health and the optional
//! operator routes.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
