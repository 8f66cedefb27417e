use parking_lot::{lock_api::ArcRwLockWriteGuard, Condvar, Mutex, RawRwLock, RwLock};
use std::sync::Arc;

use crate::types::PageId;

pub(crate) type FrameWriteGuard = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

#[derive(Default, Debug)]
struct FrameState {
    pin_count: u32,
    dirty: bool,
}

/// One cached page. The byte buffer has its own lock; pin count and dirty bit
/// live under a separate mutex so cleanup waiters can sleep on them.
pub struct Frame {
    pub id: PageId,
    pub buf: Arc<RwLock<Box<[u8]>>>,
    state: Mutex<FrameState>,
    unpinned: Condvar,
}

impl Frame {
    pub fn new(id: PageId, bytes: Box<[u8]>) -> Self {
        Self {
            id,
            buf: Arc::new(RwLock::new(bytes)),
            state: Mutex::new(FrameState::default()),
            unpinned: Condvar::new(),
        }
    }

    pub fn pin(&self) {
        let mut state = self.state.lock();
        state.pin_count = state.pin_count.saturating_add(1);
    }

    pub fn unpin(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.pin_count > 0, "unpin without pin");
        state.pin_count = state.pin_count.saturating_sub(1);
        self.unpinned.notify_all();
    }

    pub fn mark_dirty(&self) {
        self.state.lock().dirty = true;
    }

    /// Clears the dirty bit, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        std::mem::replace(&mut self.state.lock().dirty, false)
    }

    /// Exclusive lock that additionally waits until the caller holds the only pin.
    ///
    /// The write lock is released while waiting so pinned readers can finish.
    pub fn lock_cleanup(&self) -> FrameWriteGuard {
        loop {
            let guard = self.buf.write_arc();
            let mut state = self.state.lock();
            if state.pin_count <= 1 {
                return guard;
            }
            drop(guard);
            self.unpinned.wait(&mut state);
        }
    }
}
