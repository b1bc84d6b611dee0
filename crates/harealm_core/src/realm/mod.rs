//! Realm sessions.
//!
//! A [`Realm`] is a thread-confined handle to one storage file (or shared
//! in-memory store) at a snapshot. Reads see the snapshot until the next
//! refresh; writes go through a single write transaction at a time per file.

mod notification;

pub use notification::{NotificationToken, RealmNotification};

use crate::accessor::{self, Accessor};
use crate::config::RealmConfig;
use crate::error::{CoreError, CoreResult};
use crate::metadata;
use crate::migration;
use crate::schema::{Schema, SchemaIndex};
use crate::store;
use harealm_storage::{Group, ReadTransaction, SharedGroup, StorageError, WriteTransaction};
use notification::Observers;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub(crate) enum State {
    Read(ReadTransaction),
    Write(WriteTransaction),
    Closed,
}

/// Shared state behind a [`Realm`] handle.
///
/// Objects and collections hold a `Weak` pointer to it together with the
/// session token, so they observe closing and never keep a realm alive.
pub(crate) struct RealmInner {
    pub(crate) session: u64,
    pub(crate) config: RealmConfig,
    pub(crate) shared: Arc<SharedGroup>,
    pub(crate) schema: Arc<Schema>,
    state: RefCell<State>,
    change_stamp: Cell<u64>,
    auto_refresh: Cell<bool>,
    /// Pinned realms never refresh or write.
    pinned: bool,
    pub(crate) in_migration: Cell<bool>,
    bindings: RefCell<HashMap<SchemaIndex, Arc<Accessor>>>,
    /// Types whose primary-key uniqueness is checked at commit.
    pub(crate) unchecked: RefCell<BTreeSet<SchemaIndex>>,
    pub(crate) observers: RefCell<Observers>,
}

impl RealmInner {
    pub(crate) fn is_closed(&self) -> bool {
        matches!(*self.state.borrow(), State::Closed)
    }

    pub(crate) fn is_writing(&self) -> bool {
        matches!(*self.state.borrow(), State::Write(_))
    }

    /// Returns the counter that changes whenever the visible data may have
    /// changed.
    pub(crate) fn change_stamp(&self) -> u64 {
        self.change_stamp.get()
    }

    fn touch(&self) {
        self.change_stamp.set(self.change_stamp.get() + 1);
    }

    fn snapshot_version(&self) -> Option<u64> {
        match &*self.state.borrow() {
            State::Read(txn) => Some(txn.version()),
            State::Write(txn) => Some(txn.base_version()),
            State::Closed => None,
        }
    }

    fn reset_bindings(&self) {
        self.bindings.borrow_mut().clear();
    }

    /// Runs `f` against the current snapshot or write transaction.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Group) -> CoreResult<R>) -> CoreResult<R> {
        match &*self.state.borrow() {
            State::Read(txn) => f(txn.group()),
            State::Write(txn) => f(txn.group()),
            State::Closed => Err(CoreError::RealmClosed),
        }
    }

    /// Runs `f` against the write transaction.
    ///
    /// The transaction is restored to its prior state if `f` fails.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut Group) -> CoreResult<R>) -> CoreResult<R> {
        let mut state = self.state.borrow_mut();
        let txn = match &mut *state {
            State::Write(txn) => txn,
            State::Read(_) => return Err(CoreError::NotInWriteTransaction),
            State::Closed => return Err(CoreError::RealmClosed),
        };
        let savepoint = txn.savepoint();
        match f(txn.group_mut()) {
            Ok(value) => {
                drop(state);
                self.touch();
                Ok(value)
            }
            Err(e) => {
                txn.restore(savepoint);
                Err(e)
            }
        }
    }

    /// Returns the bound accessor of a type, binding it on first use.
    pub(crate) fn accessor(&self, group: &Group, index: SchemaIndex) -> CoreResult<Arc<Accessor>> {
        if let Some(accessor) = self.bindings.borrow().get(&index) {
            return Ok(Arc::clone(accessor));
        }
        let object_schema = self.schema.get(index);
        let table = group.require_table(&metadata::table_name(object_schema.name()))?;
        let accessor = accessor::bind(object_schema, table)?;
        self.bindings.borrow_mut().insert(index, Arc::clone(&accessor));
        Ok(accessor)
    }

    pub(crate) fn take_write(&self) -> CoreResult<WriteTransaction> {
        let mut state = self.state.borrow_mut();
        match &*state {
            State::Write(_) => {}
            State::Read(_) => return Err(CoreError::NotInWriteTransaction),
            State::Closed => return Err(CoreError::RealmClosed),
        }
        // Placeholder until the caller installs the next snapshot.
        match std::mem::replace(&mut *state, State::Closed) {
            State::Write(txn) => Ok(txn),
            _ => Err(CoreError::NotInWriteTransaction),
        }
    }

    pub(crate) fn install(&self, state: State) {
        *self.state.borrow_mut() = state;
        self.touch();
    }
}

/// An open realm session.
///
/// Cloning a `Realm` yields another handle to the same session. A realm
/// and everything read from it stay on the thread that opened it.
///
/// # Example
///
/// ```rust
/// use harealm_core::{ObjectSchema, Property, Realm, RealmConfig, Schema};
///
/// let schema = Schema::register([ObjectSchema::builder("Dog")
///     .property(Property::string("name"))
///     .build()])?;
/// let realm = Realm::open(RealmConfig::in_memory("realm-doc").schema(schema))?;
/// realm.write(|realm| {
///     realm.create("Dog", [("name", "Rex".into())])?;
///     Ok(())
/// })?;
/// assert_eq!(realm.objects("Dog")?.len()?, 1);
/// # Ok::<(), harealm_core::CoreError>(())
/// ```
#[derive(Clone)]
pub struct Realm {
    pub(crate) inner: Rc<RealmInner>,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("session", &self.inner.session)
            .field("identity", &self.inner.shared.identity())
            .field("version", &self.inner.snapshot_version())
            .finish()
    }
}

impl Realm {
    /// Opens a realm, creating or migrating the file as needed.
    ///
    /// # Errors
    ///
    /// - `InvalidSchemaVersion` if the stored version is newer than the
    ///   configured one
    /// - `MigrationFailed` if the migration callback or a structural step
    ///   fails; nothing is committed
    /// - storage errors from the backend
    pub fn open(config: RealmConfig) -> CoreResult<Self> {
        migration::open(config)
    }

    /// Opens a file realm with a schema, migrating from older versions with
    /// `migration`.
    pub fn open_or_migrate<F>(
        path: impl AsRef<Path>,
        schema_version: u64,
        schema: Schema,
        migration: F,
    ) -> CoreResult<Self>
    where
        F: Fn(&mut migration::Migration<'_>) -> CoreResult<()> + Send + Sync + 'static,
    {
        Self::open(
            RealmConfig::new(path)
                .schema(schema)
                .schema_version(schema_version)
                .migration(migration),
        )
    }

    pub(crate) fn from_parts(
        config: RealmConfig,
        shared: Arc<SharedGroup>,
        schema: Arc<Schema>,
        state: State,
        pinned: bool,
    ) -> Self {
        let auto_refresh = config.auto_refresh;
        Self {
            inner: Rc::new(RealmInner {
                session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
                config,
                shared,
                schema,
                state: RefCell::new(state),
                change_stamp: Cell::new(0),
                auto_refresh: Cell::new(auto_refresh),
                pinned,
                in_migration: Cell::new(false),
                bindings: RefCell::new(HashMap::new()),
                unchecked: RefCell::new(BTreeSet::new()),
                observers: RefCell::new(Observers::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RealmInner>) -> Self {
        Self { inner }
    }

    /// Returns the realm's schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Returns the configuration the realm was opened with.
    #[must_use]
    pub fn config(&self) -> &RealmConfig {
        &self.inner.config
    }

    /// Returns the file path, if this is a file realm.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.config.path()
    }

    /// Returns the schema version stored in the current snapshot.
    ///
    /// Unversioned stores report [`metadata::NOT_VERSIONED`].
    pub fn schema_version(&self) -> CoreResult<u64> {
        self.inner
            .read(|group| Ok(metadata::read_version(group)?.unwrap_or(metadata::NOT_VERSIONED)))
    }

    /// Returns the storage version of the current snapshot.
    pub fn version(&self) -> CoreResult<u64> {
        self.inner.snapshot_version().ok_or(CoreError::RealmClosed)
    }

    /// Returns true if this handle and `other` are the same session.
    #[must_use]
    pub fn is_same_realm(&self, other: &Realm) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns true once [`Realm::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Returns true while a write transaction is open.
    #[must_use]
    pub fn is_in_write_transaction(&self) -> bool {
        self.inner.is_writing()
    }

    /// Begins a write transaction.
    ///
    /// Blocks until no other write transaction on the same file is open,
    /// then advances the realm to the latest commit.
    ///
    /// # Errors
    ///
    /// - `NestedWriteTransaction` if this realm is already writing
    /// - `RealmClosed` after [`Realm::close`]
    /// - `Storage(ReadOnly)` for read-only realms
    pub fn begin_write(&self) -> CoreResult<()> {
        let inner = &self.inner;
        let current = match &*inner.state.borrow() {
            State::Read(txn) => txn.version(),
            State::Write(_) => return Err(CoreError::NestedWriteTransaction),
            State::Closed => return Err(CoreError::RealmClosed),
        };
        if inner.config.read_only || inner.pinned {
            return Err(StorageError::ReadOnly.into());
        }
        let txn = inner.shared.begin_write()?;
        if txn.base_version() != current {
            debug!(
                from = current,
                to = txn.base_version(),
                "advanced realm on write"
            );
            inner.reset_bindings();
        }
        inner.install(State::Write(txn));
        Ok(())
    }

    /// Commits the open write transaction.
    ///
    /// Primary-key uniqueness deferred by unchecked inserts is verified
    /// first; a violation rolls the transaction back.
    ///
    /// # Errors
    ///
    /// - `NotInWriteTransaction` if no write is open
    /// - `DuplicatePrimaryKey` if deferred uniqueness fails
    /// - storage errors if the commit cannot be stored
    pub fn commit_write(&self) -> CoreResult<()> {
        let inner = &self.inner;
        let txn = inner.take_write()?;
        let unchecked = std::mem::take(&mut *inner.unchecked.borrow_mut());

        let verified = unchecked
            .iter()
            .try_for_each(|&index| store::verify_unique(txn.group(), &inner.schema, index));
        if let Err(e) = verified {
            warn!(error = %e, "rolled back write transaction");
            txn.rollback();
            inner.install(State::Read(inner.shared.begin_read()?));
            return Err(e);
        }

        match txn.commit() {
            Ok(version) => {
                debug!(version, identity = inner.shared.identity(), "committed write transaction");
                inner.install(State::Read(inner.shared.begin_read()?));
                self.notify(RealmNotification::DidChange);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "commit failed, rolled back write transaction");
                inner.install(State::Read(inner.shared.begin_read()?));
                Err(e.into())
            }
        }
    }

    /// Discards the open write transaction.
    pub fn cancel_write(&self) -> CoreResult<()> {
        let inner = &self.inner;
        let txn = inner.take_write()?;
        inner.unchecked.borrow_mut().clear();
        txn.rollback();
        warn!(identity = inner.shared.identity(), "rolled back write transaction");
        inner.install(State::Read(inner.shared.begin_read()?));
        Ok(())
    }

    /// Runs `f` in a write transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back if it returns `Err`.
    pub fn write<T>(&self, f: impl FnOnce(&Realm) -> CoreResult<T>) -> CoreResult<T> {
        self.begin_write()?;
        match f(self) {
            Ok(value) => {
                if self.is_in_write_transaction() {
                    self.commit_write()?;
                }
                Ok(value)
            }
            Err(e) => {
                if self.is_in_write_transaction() {
                    self.cancel_write()?;
                }
                Err(e)
            }
        }
    }

    /// Advances the realm to the latest commit.
    ///
    /// Returns true if the snapshot changed. Realms in a write transaction
    /// are already current and return false.
    pub fn refresh(&self) -> CoreResult<bool> {
        let inner = &self.inner;
        let current = match &*inner.state.borrow() {
            State::Read(txn) => txn.version(),
            State::Write(_) => return Ok(false),
            State::Closed => return Err(CoreError::RealmClosed),
        };
        if inner.pinned || inner.shared.latest_version()? == current {
            return Ok(false);
        }
        let txn = inner.shared.begin_read()?;
        if txn.version() == current {
            return Ok(false);
        }
        debug!(from = current, to = txn.version(), "refreshed realm");
        inner.reset_bindings();
        inner.install(State::Read(txn));
        self.notify(RealmNotification::DidChange);
        Ok(true)
    }

    /// Returns whether idle notifications refresh this realm.
    #[must_use]
    pub fn auto_refresh(&self) -> bool {
        self.inner.auto_refresh.get()
    }

    /// Sets whether idle notifications refresh this realm.
    pub fn set_auto_refresh(&self, value: bool) {
        self.inner.auto_refresh.set(value);
    }

    /// Called by the host when idle.
    ///
    /// Refreshes when auto-refresh is on; otherwise observers receive
    /// [`RealmNotification::RefreshRequired`] if a newer commit exists.
    /// Returns true if the snapshot changed.
    pub fn notify_idle(&self) -> CoreResult<bool> {
        if self.auto_refresh() {
            return self.refresh();
        }
        let current = match &*self.inner.state.borrow() {
            State::Read(txn) => txn.version(),
            State::Write(_) => return Ok(false),
            State::Closed => return Err(CoreError::RealmClosed),
        };
        if !self.inner.pinned && self.inner.shared.latest_version()? > current {
            self.notify(RealmNotification::RefreshRequired);
        }
        Ok(false)
    }

    /// Registers a change callback.
    pub fn add_notification<F>(&self, callback: F) -> NotificationToken
    where
        F: Fn(&Realm, RealmNotification) + 'static,
    {
        let id = self.inner.observers.borrow_mut().add(Rc::new(callback));
        NotificationToken::new(Rc::downgrade(&self.inner), id)
    }

    fn notify(&self, notification: RealmNotification) {
        let callbacks = self.inner.observers.borrow().snapshot();
        for callback in callbacks {
            callback(self, notification);
        }
    }

    /// Closes the realm.
    ///
    /// Rolls back an open write transaction and invalidates every object and
    /// collection read from this realm. Closing twice is a no-op.
    pub fn close(&self) {
        let inner = &self.inner;
        let previous = std::mem::replace(&mut *inner.state.borrow_mut(), State::Closed);
        match previous {
            State::Write(txn) => {
                txn.rollback();
                warn!(identity = inner.shared.identity(), "closed realm with open write, rolled back");
            }
            State::Read(_) => {}
            State::Closed => return,
        }
        inner.unchecked.borrow_mut().clear();
        inner.reset_bindings();
        inner.observers.borrow_mut().clear();
        inner.touch();
        debug!(session = inner.session, "closed realm");
    }

    /// Re-reads the layout of every type after structural changes.
    pub(crate) fn rebind(&self) {
        self.inner.reset_bindings();
        self.inner.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Property};
    use crate::Value;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::register([ObjectSchema::builder("Note")
            .property(Property::string("text"))
            .build()])
        .unwrap()
    }

    fn open(id: &str) -> Realm {
        Realm::open(RealmConfig::in_memory(id).schema(schema())).unwrap()
    }

    #[test]
    fn write_commits_on_ok() {
        let realm = open("realm-write-ok");
        realm
            .write(|r| r.create("Note", [("text", "hi".into())]).map(|_| ()))
            .unwrap();
        assert_eq!(realm.objects("Note").unwrap().len().unwrap(), 1);
        assert!(!realm.is_in_write_transaction());
    }

    #[test]
    fn write_rolls_back_on_err() {
        let realm = open("realm-write-err");
        let err = realm
            .write(|r| {
                r.create("Note", [("text", "gone".into())])?;
                Err::<(), _>(CoreError::InvalidatedObject)
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidatedObject));
        assert_eq!(realm.objects("Note").unwrap().len().unwrap(), 0);
    }

    #[test]
    fn nested_begin_fails() {
        let realm = open("realm-nested");
        realm.begin_write().unwrap();
        assert!(matches!(
            realm.begin_write(),
            Err(CoreError::NestedWriteTransaction)
        ));
        realm.cancel_write().unwrap();
        assert!(matches!(
            realm.commit_write(),
            Err(CoreError::NotInWriteTransaction)
        ));
    }

    #[test]
    fn mutation_outside_write_fails() {
        let realm = open("realm-outside");
        let err = realm.create("Note", [("text", "x".into())]).unwrap_err();
        assert!(matches!(err, CoreError::NotInWriteTransaction));
    }

    #[test]
    fn other_session_sees_commit_after_refresh() {
        let writer = open("realm-refresh");
        let reader = open("realm-refresh");
        writer
            .write(|r| r.create("Note", [("text", "a".into())]).map(|_| ()))
            .unwrap();

        assert_eq!(reader.objects("Note").unwrap().len().unwrap(), 0);
        assert!(reader.refresh().unwrap());
        assert_eq!(reader.objects("Note").unwrap().len().unwrap(), 1);
        assert!(!reader.refresh().unwrap());
    }

    #[test]
    fn begin_write_advances_snapshot() {
        let writer = open("realm-advance");
        let other = open("realm-advance");
        writer
            .write(|r| r.create("Note", [("text", "a".into())]).map(|_| ()))
            .unwrap();
        other.begin_write().unwrap();
        assert_eq!(other.objects("Note").unwrap().len().unwrap(), 1);
        other.cancel_write().unwrap();
    }

    #[test]
    fn notify_idle_refreshes_with_auto_refresh() {
        let writer = open("realm-idle");
        let reader = open("realm-idle");
        writer.write(|_| Ok(())).unwrap();
        assert!(reader.notify_idle().unwrap());

        reader.set_auto_refresh(false);
        writer.write(|_| Ok(())).unwrap();
        assert!(!reader.notify_idle().unwrap());
        assert!(reader.refresh().unwrap());
    }

    #[test]
    fn close_invalidates_objects() {
        let realm = open("realm-close");
        let note = realm
            .write(|r| r.create("Note", [("text", "x".into())]))
            .unwrap();
        realm.begin_write().unwrap();
        realm.close();
        realm.close();

        assert!(realm.is_closed());
        assert!(note.is_invalidated());
        assert!(matches!(note.get("text"), Err(CoreError::InvalidatedObject)));
        assert!(matches!(realm.objects("Note"), Err(CoreError::RealmClosed)));
        assert!(matches!(realm.begin_write(), Err(CoreError::RealmClosed)));
    }

    #[test]
    fn closing_with_open_write_releases_writer() {
        let first = open("realm-close-writer");
        let second = open("realm-close-writer");
        first.begin_write().unwrap();
        first.close();
        second.begin_write().unwrap();
        second.commit_write().unwrap();
    }

    #[test]
    fn read_only_realm_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.realm");
        Realm::open(RealmConfig::new(&path).schema(schema()))
            .unwrap()
            .close();

        let realm = Realm::open(RealmConfig::new(&path).schema(schema()).read_only(true)).unwrap();
        assert!(matches!(
            realm.begin_write(),
            Err(CoreError::Storage(StorageError::ReadOnly))
        ));
    }

    #[test]
    fn file_realm_persists_across_sessions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.realm");
        {
            let realm = Realm::open(RealmConfig::new(&path).schema(schema())).unwrap();
            realm
                .write(|r| r.create("Note", [("text", "kept".into())]).map(|_| ()))
                .unwrap();
        }
        let realm = Realm::open(RealmConfig::new(&path).schema(schema())).unwrap();
        let note = realm.objects("Note").unwrap().first().unwrap().unwrap();
        assert_eq!(note.get("text").unwrap(), Value::from("kept"));
        assert_eq!(realm.schema_version().unwrap(), 0);
    }
}
