//! Atomic optional `Arc` slot.
//!
//! A slot is either empty (null) or owns exactly one strong reference that
//! was leaked into it with `Arc::into_raw`. Publishing and claiming are each a
//! single-word compare-and-swap, so whoever wins the CAS becomes the sole
//! owner of that reference; nobody dereferences the pointer before owning it.

use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Lock-free single-entry parking spot for an `Arc<T>`.
pub struct IdleSlot<T> {
    ptr: AtomicPtr<T>,
    _owns: PhantomData<Arc<T>>,
}

impl<T> IdleSlot<T> {
    pub const fn empty() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// Moves `value` into the slot if it is empty.
    ///
    /// Returns the value back when the slot is already occupied.
    pub fn publish(&self, value: Arc<T>) -> Result<(), Arc<T>> {
        let raw = Arc::into_raw(value) as *mut T;
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            // Safety: `raw` came from `Arc::into_raw` above and was never stored
            Err(_) => Err(unsafe { Arc::from_raw(raw) }),
        }
    }

    /// Takes ownership of the occupant, if any.
    ///
    /// A lost race with another claimer yields `None` rather than retrying.
    pub fn claim(&self) -> Option<Arc<T>> {
        let current = self.ptr.load(Ordering::Acquire);
        if current.is_null() {
            return None;
        }
        self.ptr
            .compare_exchange(current, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .ok()
            // Safety: the successful CAS transferred the slot's reference to us
            .map(|raw| unsafe { Arc::from_raw(raw) })
    }

    pub fn is_occupied(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for IdleSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for IdleSlot<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();
        if !raw.is_null() {
            // Safety: a non-null slot owns one strong reference
            drop(unsafe { Arc::from_raw(raw) });
        }
    }
}
