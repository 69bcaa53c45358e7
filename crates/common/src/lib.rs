//! # Calbridge Common
//!
//! Cross-cutting collaborators for the calendar integration layer:
//!
//! - [`crypto`]: the [`TokenCipher`](crypto::TokenCipher) trait plus an
//!   AES-256-GCM implementation used to encrypt OAuth tokens at rest
//! - [`storage`]: the [`KeyValueStore`](storage::KeyValueStore) trait plus
//!   file-backed and in-memory implementations
//!
//! Both collaborators are injected into the token store at construction;
//! nothing in this crate holds process-wide mutable state.

pub mod crypto;
pub mod error;
pub mod storage;

pub use crypto::{AesGcmTokenCipher, TokenCipher};
pub use error::{CommonError, CommonResult};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
