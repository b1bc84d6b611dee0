//! Shared groups: snapshot readers and a single writer over one backend.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use crate::file::FileBackend;
use crate::group::Group;
use crate::image;
use crate::memory::InMemoryBackend;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

/// The last committed state known to this process.
#[derive(Debug, Clone)]
struct Committed {
    group: Arc<Group>,
    version: u64,
}

/// One storage file (or in-memory store) shared by every session of the
/// process that opened it.
///
/// `SharedGroup` provides:
/// - Non-blocking snapshot reads via `begin_read()`
/// - Single-writer write transactions via `begin_write()`
/// - Pick-up of commits made by other processes through the backend stamp
///
/// ## Single-Writer Guarantee
///
/// Only one write transaction can be active at a time. Within a process the
/// writer gate serializes writers; across processes the backend's writer lock
/// does. `begin_write()` blocks without timeout until both are held.
pub struct SharedGroup {
    /// Registry identity (`file:<path>` or `memory:<id>`).
    identity: String,
    /// Persistence target.
    backend: RwLock<Box<dyn StorageBackend>>,
    /// Last committed state.
    committed: RwLock<Committed>,
    /// True while a write transaction is open.
    writer_active: Mutex<bool>,
    /// Signalled when the writer gate is released.
    writer_released: Condvar,
}

impl fmt::Debug for SharedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedGroup")
            .field("identity", &self.identity)
            .field("version", &self.committed.read().version)
            .finish_non_exhaustive()
    }
}

type Registry = Mutex<HashMap<String, Weak<SharedGroup>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl SharedGroup {
    /// Opens a shared group over an arbitrary backend.
    ///
    /// The group is not registered; two calls over the same file behave like
    /// two processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored image cannot be read or decoded.
    pub fn open(
        identity: impl Into<String>,
        backend: Box<dyn StorageBackend>,
    ) -> StorageResult<Arc<Self>> {
        let committed = match backend.load()? {
            Some(data) => {
                let (group, version) = image::decode(&data)?;
                Committed {
                    group: Arc::new(group),
                    version,
                }
            }
            None => Committed {
                group: Arc::new(Group::new()),
                version: 0,
            },
        };
        Ok(Arc::new(Self {
            identity: identity.into(),
            backend: RwLock::new(backend),
            committed: RwLock::new(committed),
            writer_active: Mutex::new(false),
            writer_released: Condvar::new(),
        }))
    }

    /// Returns the process-wide shared group for a file, opening it if no
    /// live session holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is unusable or the image is corrupted.
    pub fn open_file(path: &Path) -> StorageResult<Arc<Self>> {
        let absolute = std::path::absolute(path)?;
        let identity = format!("file:{}", absolute.display());
        Self::open_registered(identity, || {
            Ok(Box::new(FileBackend::open(&absolute)?) as Box<dyn StorageBackend>)
        })
    }

    /// Returns the process-wide in-memory shared group with this identifier.
    ///
    /// The data lives as long as any session holds the group.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`SharedGroup::open_file`].
    pub fn open_memory(identifier: &str) -> StorageResult<Arc<Self>> {
        let identity = format!("memory:{identifier}");
        Self::open_registered(identity, || {
            Ok(Box::new(InMemoryBackend::new()) as Box<dyn StorageBackend>)
        })
    }

    fn open_registered(
        identity: String,
        make_backend: impl FnOnce() -> StorageResult<Box<dyn StorageBackend>>,
    ) -> StorageResult<Arc<Self>> {
        let mut registry = registry().lock();
        if let Some(shared) = registry.get(&identity).and_then(Weak::upgrade) {
            return Ok(shared);
        }
        registry.retain(|_, weak| weak.strong_count() > 0);
        let shared = Self::open(identity.clone(), make_backend()?)?;
        registry.insert(identity, Arc::downgrade(&shared));
        Ok(shared)
    }

    /// Returns the registry identity of this group.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns the latest committed version, including commits made by other
    /// processes. Zero means nothing was ever committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    pub fn latest_version(&self) -> StorageResult<u64> {
        let stamp = self.backend.read().stamp()?;
        Ok(stamp.max(self.committed.read().version))
    }

    /// Returns the size of the stored image in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    pub fn image_size(&self) -> StorageResult<u64> {
        self.backend.read().size()
    }

    /// Begins a read transaction on the latest committed state.
    ///
    /// Never blocks on writers.
    ///
    /// # Errors
    ///
    /// Returns an error if a newer image from another process cannot be
    /// loaded.
    pub fn begin_read(&self) -> StorageResult<ReadTransaction> {
        let committed = self.sync()?;
        Ok(ReadTransaction {
            group: committed.group,
            version: committed.version,
        })
    }

    /// Begins a write transaction, blocking until the writer gate is free.
    ///
    /// The transaction starts from the latest committed state. Dropping it
    /// without calling [`WriteTransaction::commit`] rolls it back.
    ///
    /// # Errors
    ///
    /// Returns an error if the cross-process lock cannot be acquired or the
    /// latest image cannot be loaded.
    pub fn begin_write(self: &Arc<Self>) -> StorageResult<WriteTransaction> {
        {
            let mut active = self.writer_active.lock();
            while *active {
                self.writer_released.wait(&mut active);
            }
            *active = true;
        }
        if let Err(e) = self.backend.read().lock_writer() {
            self.release_gate();
            return Err(e);
        }

        // From here on, dropping the transaction releases both locks.
        let mut txn = WriteTransaction {
            shared: Arc::clone(self),
            base: Arc::new(Group::new()),
            group: Group::new(),
            base_version: 0,
            finished: false,
        };
        let committed = self.sync()?;
        txn.group = (*committed.group).clone();
        txn.base = committed.group;
        txn.base_version = committed.version;
        Ok(txn)
    }

    /// Reloads the image if another process committed a newer version.
    fn sync(&self) -> StorageResult<Committed> {
        let backend = self.backend.read();
        let stamp = backend.stamp()?;
        {
            let committed = self.committed.read();
            if stamp <= committed.version {
                return Ok(committed.clone());
            }
        }
        let Some(data) = backend.load()? else {
            return Ok(self.committed.read().clone());
        };
        let (group, version) = image::decode(&data)?;
        let mut committed = self.committed.write();
        if version > committed.version {
            *committed = Committed {
                group: Arc::new(group),
                version,
            };
        }
        Ok(committed.clone())
    }

    fn release_writer(&self) {
        self.backend.read().unlock_writer();
        self.release_gate();
    }

    fn release_gate(&self) {
        *self.writer_active.lock() = false;
        self.writer_released.notify_one();
    }
}

/// A consistent point-in-time view of a shared group.
#[derive(Debug, Clone)]
pub struct ReadTransaction {
    group: Arc<Group>,
    version: u64,
}

impl ReadTransaction {
    /// Wraps a group as a detached snapshot.
    #[must_use]
    pub fn detached(group: Arc<Group>, version: u64) -> Self {
        Self { group, version }
    }

    /// Returns the snapshot's group.
    #[must_use]
    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    /// Returns the commit version this snapshot observes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// An open write transaction holding the writer gate.
///
/// Changes are made to a private copy-on-write copy of the group and become
/// visible to readers only on commit.
pub struct WriteTransaction {
    shared: Arc<SharedGroup>,
    base: Arc<Group>,
    group: Group,
    base_version: u64,
    finished: bool,
}

impl fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("shared", &self.shared.identity)
            .field("base_version", &self.base_version)
            .finish_non_exhaustive()
    }
}

impl WriteTransaction {
    /// Returns the transaction's working group.
    #[must_use]
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Returns the transaction's working group for modification.
    pub fn group_mut(&mut self) -> &mut Group {
        &mut self.group
    }

    /// Returns the committed group the transaction started from.
    #[must_use]
    pub fn base(&self) -> &Arc<Group> {
        &self.base
    }

    /// Returns the version the transaction started from.
    #[must_use]
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Captures the working state so a failed operation can be undone.
    #[must_use]
    pub fn savepoint(&self) -> Group {
        self.group.clone()
    }

    /// Restores a state captured by [`WriteTransaction::savepoint`].
    pub fn restore(&mut self, savepoint: Group) {
        self.group = savepoint;
    }

    /// Commits the transaction and returns the new version.
    ///
    /// On error the transaction is rolled back and the stored image is
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be encoded or stored.
    pub fn commit(mut self) -> StorageResult<u64> {
        let version = self.base_version + 1;
        let bytes = image::encode(&self.group, version)?;
        self.shared.backend.write().store(&bytes)?;

        let group = std::mem::take(&mut self.group);
        *self.shared.committed.write() = Committed {
            group: Arc::new(group),
            version,
        };
        self.finish();
        Ok(version)
    }

    /// Discards the transaction's changes.
    pub fn rollback(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.release_writer();
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        self.finish();
    }
}
