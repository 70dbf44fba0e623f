//! Integration test utilities for sockline
//!
//! This crate provides helpers for running end-to-end tests against a real
//! axum server with tokio-tungstenite clients.

pub mod helpers;

pub use helpers::*;
