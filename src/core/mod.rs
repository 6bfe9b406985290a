//! RONDO Protocol - Core Types
//!
//! Constants and error taxonomy shared by every layer.

pub mod constants;
mod error;

pub use error::*;
