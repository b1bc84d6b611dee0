//! Realm change notifications.

use super::{Realm, RealmInner};
use std::fmt;
use std::rc::{Rc, Weak};

/// Events delivered to realm observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmNotification {
    /// The realm's snapshot changed through a local commit or a refresh.
    DidChange,
    /// A newer commit exists but auto-refresh is disabled.
    RefreshRequired,
}

pub(crate) type Callback = Rc<dyn Fn(&Realm, RealmNotification)>;

/// Registry of observer callbacks, in registration order.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

impl Observers {
    pub(crate) fn add(&mut self, callback: Callback) -> u64 {
        self.next_id += 1;
        self.callbacks.push((self.next_id, callback));
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.callbacks.retain(|(token, _)| *token != id);
    }

    pub(crate) fn clear(&mut self) {
        self.callbacks.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Returns a snapshot so callbacks may register or drop observers.
    pub(crate) fn snapshot(&self) -> Vec<Callback> {
        self.callbacks.iter().map(|(_, cb)| Rc::clone(cb)).collect()
    }
}

/// Keeps a notification callback registered.
///
/// The callback is removed when the token is invalidated or dropped.
#[must_use = "dropping the token unregisters the callback"]
pub struct NotificationToken {
    realm: Weak<RealmInner>,
    id: u64,
}

impl NotificationToken {
    pub(crate) fn new(realm: Weak<RealmInner>, id: u64) -> Self {
        Self { realm, id }
    }

    /// Unregisters the callback.
    pub fn invalidate(&self) {
        if let Some(realm) = self.realm.upgrade() {
            realm.observers.borrow_mut().remove(self.id);
        }
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        self.invalidate();
    }
}

impl fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationToken").field("id", &self.id).finish()
    }
}
