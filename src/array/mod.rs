//! Array Adapter
//!
//! REST implementation of the [`crate::domain::ArrayClient`] port for
//! FlashArray management endpoints.

pub mod rest;
mod types;

pub use rest::*;
