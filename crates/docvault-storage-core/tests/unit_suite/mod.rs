//! Unit tests for docvault-storage-core.
//!
//! These tests exercise the public API end to end without external services.

pub mod chunked;
pub mod circuit;
pub mod config;
pub mod fallback;
pub mod helpers;
pub mod roundtrip;
