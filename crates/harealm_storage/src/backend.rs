//! Storage backend trait definition.

use crate::error::StorageResult;

/// A persistence target for group images.
///
/// Backends are **opaque image stores**. They hold the most recently
/// committed image and know nothing about tables or cells.
///
/// # Invariants
///
/// - `store` replaces the image atomically: a reader sees either the old or
///   the new image, never a mix
/// - `load` returns exactly the bytes of the last successful `store`
/// - `lock_writer`/`unlock_writer` bracket every write transaction and
///   exclude writers in other processes
pub trait StorageBackend: Send + Sync {
    /// Loads the current image, or `None` if nothing was ever stored.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the stored image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be written durably.
    fn store(&mut self, image: &[u8]) -> StorageResult<()>;

    /// Returns the commit stamp of the stored image, or 0 if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is unreadable or corrupted.
    fn stamp(&self) -> StorageResult<u64>;

    /// Returns the size of the stored image in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Blocks until this process holds the cross-process writer lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    fn lock_writer(&self) -> StorageResult<()>;

    /// Releases the cross-process writer lock.
    fn unlock_writer(&self);
}
