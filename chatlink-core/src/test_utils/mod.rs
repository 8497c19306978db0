//! Shared test fixtures
//!
//! Builders for credentials, wire frames, and envelopes so unit and
//! integration tests construct realistic data without repeating it.

pub mod fixtures;

pub use fixtures::*;
