use core::ptr;
use std::fmt::Debug;
use std::ops::Deref;

use crate::sync::atomic;

use super::record::HazardSlot;

/// A Guard protects a single Memory address and provides safe read access to
/// it, for as long as the Guard is not dropped
pub struct Guard<T> {
    /// The actual Data-Ptr protected by the Hazard-Slot
    inner: *mut T,
    /// The Hazard-Slot through which the Protection is published
    slot: *const HazardSlot,
}

impl<T> Debug for Guard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guard ( ptr = {:p} )", self.inner)
    }
}

impl<T> Drop for Guard<T> {
    fn drop(&mut self) {
        let slot = unsafe { &*self.slot };
        slot.release();
    }
}

impl<T> Deref for Guard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // # Safety:
        //
        // The Ptr stored in the Guard was published in the Hazard-Slot before
        // it was handed out, so the Data behind it can not be reclaimed while
        // the Guard exists. The Guard must have been pointed at an actual
        // Address first, see `protect`
        unsafe { &*self.inner }
    }
}

impl<T> Guard<T> {
    pub(super) fn new(slot: *const HazardSlot) -> Self {
        Self {
            inner: ptr::null_mut(),
            slot,
        }
    }

    /// Gets the underlying Ptr to the Data protected by the Guard
    pub fn raw(&self) -> *const T {
        self.inner as *const T
    }

    /// Publishes the given Ptr in the underlying Hazard-Slot without any
    /// validation. The Caller has to make sure the Ptr can not be retired
    /// before the Publication, for example because it is already protected
    /// through a second Slot of the same Thread
    pub(crate) fn publish(&mut self, ptr: *mut T) {
        let slot = unsafe { &*self.slot };
        slot.protected
            .store(ptr as *mut (), atomic::Ordering::SeqCst);
        self.inner = ptr;
    }

    /// Stops protecting the current Address, without giving up the ownership
    /// of the underlying Hazard-Slot
    pub fn clear(&mut self) {
        let slot = unsafe { &*self.slot };
        slot.protected
            .store(ptr::null_mut(), atomic::Ordering::SeqCst);
        self.inner = ptr::null_mut();
    }

    /// Loads the most recent Ptr-Value from the given AtomicPtr and updates
    /// the Guard to now protect this new Ptr.
    ///
    /// # Behaviour
    /// The AtomicPtr is read at least 2 times, with the Hazard-Slot being
    /// updated in between, to make sure that the Ptr was not invalidated
    /// before the Publication became visible to every other Thread.
    ///
    /// # Usage
    /// This should be used when you already have a Guard, no longer need the
    /// previously protected Value and now want to protect another Memory-
    /// Location, as it reuses the already owned Hazard-Slot. This is
    /// especially useful when iterating a Datastructure, where you move from
    /// one Node to the next
    pub fn protect(&mut self, atom_ptr: &atomic::AtomicPtr<T>, load_order: atomic::Ordering) {
        let slot = unsafe { &*self.slot };

        let mut protect_ptr = atom_ptr.load(load_order);
        loop {
            slot.protected
                .store(protect_ptr as *mut (), atomic::Ordering::SeqCst);

            let n_ptr = atom_ptr.load(load_order);
            if n_ptr == protect_ptr {
                break;
            }

            protect_ptr = n_ptr;
        }

        self.inner = protect_ptr;
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn protect_updates_slot() {
        let slot = HazardSlot::new();
        assert_eq!(true, slot.try_acquire());

        let data_ptr = Box::into_raw(Box::new(13u32));
        let atom_ptr = atomic::AtomicPtr::new(data_ptr);

        let mut guard: Guard<u32> = Guard::new(&slot as *const HazardSlot);
        guard.protect(&atom_ptr, atomic::Ordering::SeqCst);

        assert_eq!(13, *guard);
        assert_eq!(
            data_ptr as *mut (),
            slot.protected.load(atomic::Ordering::SeqCst)
        );

        drop(guard);
        assert_eq!(false, slot.in_use.load(atomic::Ordering::SeqCst));

        drop(unsafe { Box::from_raw(data_ptr) });
    }

    #[test]
    fn clear_keeps_slot() {
        let slot = HazardSlot::new();
        assert_eq!(true, slot.try_acquire());

        let data_ptr = Box::into_raw(Box::new(14u32));
        let atom_ptr = atomic::AtomicPtr::new(data_ptr);

        let mut guard: Guard<u32> = Guard::new(&slot as *const HazardSlot);
        guard.protect(&atom_ptr, atomic::Ordering::SeqCst);
        guard.clear();

        assert_eq!(true, slot.in_use.load(atomic::Ordering::SeqCst));
        assert_eq!(
            true,
            slot.protected.load(atomic::Ordering::SeqCst).is_null()
        );

        drop(unsafe { Box::from_raw(data_ptr) });
    }
}
