//! HTTP host wiring for the `quill` primitives.
//!
//! - `config`: CLI/env settings and their validation
//! - `backend`: selection of the counter store and the view store
//! - `limits`: layered rate-limit policies and the request middleware
//! - `routes`: handler state, endpoints and error mapping
//! - `telemetry`: logging bootstrap

pub mod backend;
pub mod config;
pub mod limits;
pub mod routes;
pub mod telemetry;
