/// Storage core for lodestore.
///
/// This module contains the document codec, the pure query and update
/// engines, the per-collection cache and the filesystem persistence layer.
pub mod cache;
/// Canonical document ordering and the on-disk collection format.
pub mod codec;
/// Filesystem persistence with atomic write-then-rename saves.
pub mod persistence;
/// Pure filter matching, sorting and projection.
pub mod query;
/// Declarative update interpreter.
pub mod update;

pub use cache::CollectionCache;
pub use persistence::Persistence;
