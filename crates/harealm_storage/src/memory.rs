//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::image;
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend keeps the committed image in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral realms that don't need persistence
///
/// # Example
///
/// ```rust
/// use harealm_storage::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// assert!(backend.load().unwrap().is_none());
/// assert_eq!(backend.stamp().unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Option<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding a pre-existing image.
    ///
    /// Useful for testing corrupted or foreign images.
    #[must_use]
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(image)),
        }
    }

    /// Returns a copy of the stored image.
    #[must_use]
    pub fn image(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone())
    }

    fn store(&mut self, image: &[u8]) -> StorageResult<()> {
        *self.data.write() = Some(image.to_vec());
        Ok(())
    }

    fn stamp(&self) -> StorageResult<u64> {
        match self.data.read().as_deref() {
            Some(data) => image::read_stamp(data),
            None => Ok(0),
        }
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().as_ref().map_or(0, |d| d.len() as u64))
    }

    fn lock_writer(&self) -> StorageResult<()> {
        // Single process by construction.
        Ok(())
    }

    fn unlock_writer(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.image().is_none());
    }

    #[test]
    fn memory_store_replaces_image() {
        let mut backend = InMemoryBackend::new();
        backend
            .store(&image::encode(&Group::new(), 1).unwrap())
            .unwrap();
        backend
            .store(&image::encode(&Group::new(), 2).unwrap())
            .unwrap();
        assert_eq!(backend.stamp().unwrap(), 2);
        assert!(backend.size().unwrap() > 0);
    }

    #[test]
    fn memory_with_image_reports_stamp() {
        let bytes = image::encode(&Group::new(), 42).unwrap();
        let backend = InMemoryBackend::with_image(bytes.clone());
        assert_eq!(backend.stamp().unwrap(), 42);
        assert_eq!(backend.load().unwrap(), Some(bytes));
    }

    #[test]
    fn memory_writer_lock_is_noop() {
        let backend = InMemoryBackend::new();
        assert!(backend.lock_writer().is_ok());
        backend.unlock_writer();
    }
}
