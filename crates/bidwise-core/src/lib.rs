//! # bidwise-core
//!
//! Core types, traits, and abstractions for the bidwise compliance document
//! analysis pipeline.
//!
//! This crate provides the queue and file data model, the error type, and the
//! trait seams (metadata store, object store, analysis backend) that the other
//! bidwise crates implement or consume.

pub mod defaults;
pub mod error;
pub mod mime;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use mime::detect_mime_type;
pub use models::*;
pub use traits::*;

/// Generate a new time-ordered UUIDv7 identifier.
#[inline]
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
