use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::CaptureBuffer;
use crate::error::CaptureError;

/// Numeric reference to one command execution.
pub type HandleId = u64;

/// Reserved id that never refers to a live handle.
pub const INVALID_HANDLE_ID: HandleId = 0;

/// Owns every live capture buffer, keyed by a monotonic id.
///
/// The map lock only guards insert/lookup/remove; buffers carry their own locks so
/// polling one handle never contends with capture on another.
#[derive(Debug)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    handles: Mutex<BTreeMap<HandleId, Arc<CaptureBuffer>>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(INVALID_HANDLE_ID + 1),
            handles: Mutex::new(BTreeMap::new()),
        }
    }
}

impl HandleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh id. Ids are strictly increasing and never reused.
    pub fn allocate(&self) -> HandleId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn register(&self, id: HandleId, buffer: Arc<CaptureBuffer>) -> Result<(), CaptureError> {
        if id == INVALID_HANDLE_ID {
            return Err(CaptureError::InvalidHandle { id });
        }

        let mut handles = self.lock_handles();
        if handles.contains_key(&id) {
            return Err(CaptureError::DuplicateHandle { id });
        }

        handles.insert(id, buffer);
        Ok(())
    }

    pub fn lookup(&self, id: HandleId) -> Result<Arc<CaptureBuffer>, CaptureError> {
        self.lock_handles()
            .get(&id)
            .cloned()
            .ok_or(CaptureError::HandleNotFound { id })
    }

    pub fn remove(&self, id: HandleId) -> Result<Arc<CaptureBuffer>, CaptureError> {
        self.lock_handles()
            .remove(&id)
            .ok_or(CaptureError::HandleNotFound { id })
    }

    /// Returns live ids in ascending order.
    #[must_use]
    pub fn list_all(&self) -> Vec<HandleId> {
        self.lock_handles().keys().copied().collect()
    }

    /// Returns live buffers in ascending id order.
    #[must_use]
    pub fn buffers(&self) -> Vec<Arc<CaptureBuffer>> {
        self.lock_handles().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_handles().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_handles().is_empty()
    }

    fn lock_handles(&self) -> MutexGuard<'_, BTreeMap<HandleId, Arc<CaptureBuffer>>> {
        lock_unpoisoned(&self.handles)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
