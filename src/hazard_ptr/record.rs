use core::ptr;
use std::fmt::Debug;

use crate::sync::atomic;

/// A single Hazard-Slot. While a Guard owns the Slot, the Address that the
/// owning Thread wants to dereference is published here for every other
/// Thread to see
pub struct HazardSlot {
    /// The currently protected Data-Ptr, a Null-Ptr if the Slot does not
    /// protect anything at the Moment
    pub protected: atomic::AtomicPtr<()>,
    /// Set for as long as a Guard owns this Slot
    pub in_use: atomic::AtomicBool,
}

impl HazardSlot {
    /// Creates a new free Slot that protects nothing
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            protected: atomic::AtomicPtr::new(0 as *mut ()),
            in_use: atomic::AtomicBool::new(false),
        }
    }

    /// Creates a new free Slot that protects nothing
    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            protected: atomic::AtomicPtr::new(ptr::null_mut()),
            in_use: atomic::AtomicBool::new(false),
        }
    }

    /// Attempts to take ownership of the Slot for a new Guard
    pub fn try_acquire(&self) -> bool {
        self.in_use
            .compare_exchange(
                false,
                true,
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Returns the Slot to its free initial State, where it does not protect
    /// any Memory and is ready to be acquired by the next Guard
    pub fn release(&self) {
        self.protected
            .store(ptr::null_mut(), atomic::Ordering::SeqCst);
        self.in_use.store(false, atomic::Ordering::SeqCst);
    }
}

/// A single Record in the Registry of a Hazard-Pointer-Domain. A Record is
/// bound to at most one Thread at a time and holds all the Hazard-Slots of
/// that Thread
pub struct Record<const K: usize> {
    /// The Hazard-Slots belonging to the Thread currently bound to this
    /// Record
    pub slots: [HazardSlot; K],
    /// Set while a Thread is bound to this Record
    pub active: atomic::AtomicBool,
    /// The Ptr to the next Record in the Registry-List
    pub next: atomic::AtomicPtr<Record<K>>,
}

impl<const K: usize> Record<K> {
    /// Creates a new already activated Record, which can be appended to the
    /// Registry-List
    pub fn boxed_active() -> Box<Self> {
        Box::new(Self {
            slots: [(); K].map(|_| HazardSlot::new()),
            active: atomic::AtomicBool::new(true),
            next: atomic::AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Attempts to find a free Hazard-Slot in this Record and take ownership
    /// of it
    pub fn try_acquire_slot(&self) -> Option<&HazardSlot> {
        self.slots.iter().find(|slot| slot.try_acquire())
    }

    /// Attempts to re-bind this Record to the calling Thread, which only
    /// succeeds if no other Thread is bound to it right now
    pub fn try_activate(&self) -> bool {
        self.active
            .compare_exchange(
                false,
                true,
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl<const K: usize> Debug for Record<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let next = self.next.load(atomic::Ordering::SeqCst);
        write!(f, "Record ( slots = {}, next = {:p} )", K, next)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_slot() {
        let slot = HazardSlot::new();

        assert_eq!(true, slot.try_acquire());
        assert_eq!(false, slot.try_acquire());

        slot.release();
        assert_eq!(true, slot.try_acquire());
    }

    #[test]
    fn acquire_all_slots() {
        let record = Record::<2>::boxed_active();

        assert_eq!(true, record.try_acquire_slot().is_some());
        assert_eq!(true, record.try_acquire_slot().is_some());
        assert_eq!(true, record.try_acquire_slot().is_none());
    }

    #[test]
    fn activate_once() {
        let record = Record::<2>::boxed_active();

        assert_eq!(false, record.try_activate());

        record.active.store(false, atomic::Ordering::SeqCst);
        assert_eq!(true, record.try_activate());
        assert_eq!(false, record.try_activate());
    }
}
