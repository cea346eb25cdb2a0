//! Coordination between unit tests that run concurrently in one process.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

static DESCRIPTORS: RwLock<()> = RwLock::new(());

/// Held by tests that fork worker processes. Any number of them can run at once.
pub(crate) fn forking() -> RwLockReadGuard<'static, ()> {
    DESCRIPTORS.read().unwrap_or_else(PoisonError::into_inner)
}

/// Held by tests that expect end-of-file or a broken pipe when they close a channel end.
///
/// A process forked by a concurrent test holds copies of every open descriptor, which keeps the
/// channel open for as long as that process lives.
pub(crate) fn closing_channels() -> RwLockWriteGuard<'static, ()> {
    DESCRIPTORS.write().unwrap_or_else(PoisonError::into_inner)
}
