//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `cmdq` crate.
//!
//! It centralizes the error taxonomy shared by every component and the
//! tracing setup used by the binary and tests.

pub mod error;
pub mod logging;

pub use error::{Capability, GatewayError, Result};
