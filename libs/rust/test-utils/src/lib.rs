//! Shared test utilities for the Vault credential broker.
//!
//! This crate provides:
//! - Proptest generators for broker domain types
//! - Mock providers and connectors
//! - Fixtures: environment maps and canned metadata and Vault responses

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mocks;

pub use generators::*;
