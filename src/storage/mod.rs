//! Media storage
//!
//! Post images live in the backend's file bucket; posts reference them
//! by file ID and preview URL.

mod media;

pub use media::{MediaStorage, StoredMedia, extension_for};
