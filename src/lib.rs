//! Debounced, single-flight query orchestration over a read-only catalog.
//!
//! Layers, from the bottom up:
//!
//! - [`domain`]: fetch errors and cached payloads
//! - [`cache`]: keys, the query cache, the fetch scheduler, debouncing,
//!   dependent stages and stale retention
//! - [`application`]: the catalog seam, sessions and the browsing views
//! - [`infra`]: the HTTP catalog client and telemetry
//! - [`presentation`]: plain-text rendering of view states
//! - [`config`]: layered settings and command-line arguments

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
