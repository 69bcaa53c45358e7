//! Domain type definitions
//!
//! Shared types for calendar connections, normalized events, availability
//! queries, and the operation result envelope.

pub mod connection;
pub mod event;
pub mod result;
pub mod scheduling;

pub use connection::*;
pub use event::*;
pub use result::*;
pub use scheduling::*;
