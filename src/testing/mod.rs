//! Testing utilities and mock implementations
//!
//! Test doubles for the broker, network and storage seams, usable from unit
//! tests and from the integration tests under `tests/`.

pub mod mocks;

pub use mocks::*;
