//! Test utilities and fixtures for tsjit
//!
//! Shared by unit tests (#[cfg(test)]) and integration tests (tests/ directory).

pub mod fixtures;
pub mod mocks;
