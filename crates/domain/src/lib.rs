//! # Calbridge Domain
//!
//! Business domain types and models for the calendar integration layer.
//!
//! This crate contains:
//! - Normalized calendar data types (connections, tokens, events, queries)
//! - Domain error types and the operation result envelope
//! - Pure availability math (interval merging, slot generation)
//!
//! ## Architecture
//! - No dependencies on other calbridge crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures; no I/O

pub mod availability;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
