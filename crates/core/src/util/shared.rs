use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-wide value built lazily for a key and shared read-only.
///
/// Initialization happens at most once per key; asking for a different key
/// replaces the cached value. A poisoned lock is recovered, since the cached
/// value is never mutated in place.
#[derive(Debug)]
pub struct SharedResource<T> {
    slot: RwLock<Option<(String, Arc<T>)>>,
}

impl<T> Default for SharedResource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedResource<T> {
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<(String, Arc<T>)>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<(String, Arc<T>)>> {
        self.slot.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached value for `key`, if that is the key currently loaded.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        match &*self.read() {
            Some((k, v)) if k == key => Some(Arc::clone(v)),
            _ => None,
        }
    }

    pub fn get_or_try_init<E>(
        &self,
        key: &str,
        init: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }

        let mut slot = self.write();
        // another caller may have won the race for the write lock
        if let Some((k, v)) = &*slot {
            if k == key {
                return Ok(Arc::clone(v));
            }
        }

        let value = Arc::new(init()?);
        *slot = Some((key.to_owned(), Arc::clone(&value)));
        Ok(value)
    }

    pub fn is_loaded(&self) -> bool {
        self.read().is_some()
    }

    /// Drop the cached value. Holders of an `Arc` keep theirs.
    pub fn reset(&self) {
        *self.write() = None;
    }
}
