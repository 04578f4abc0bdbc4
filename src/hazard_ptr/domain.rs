mod global;

pub use global::{DomainGlobal, DEFAULT_MAX_RECORDS};

use std::fmt::Debug;

use crate::sync::atomic;

use super::{record::Record, retire_node::RetireNode, DomainError, Guard};

/// A per-Thread Handle to interact with a single Hazard-Pointer-Domain
///
/// The Handle is obtained through [`Domain::register`] and bound to the
/// calling Thread. Dropping the Handle attempts one final Reclamation,
/// donates everything that is still protected to the Domain and returns the
/// underlying Record for the next registering Thread.
pub struct Domain<const K: usize = 4> {
    /// The Reference to the shared Global State of the Domain
    global: &'static DomainGlobal<K>,
    /// The Registry-Record currently bound to this Thread
    record: *mut Record<K>,
    /// The Threshold at which a Scan is started
    r_threshold: usize,
    /// The List of retired Ptrs that have not been reclaimed yet, as they
    /// may still be in use by some other Part of the overall System
    r_list: Vec<RetireNode>,
}

impl<const K: usize> Debug for Domain<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Domain ( pending = {} )", self.r_list.len())
    }
}

impl<const K: usize> Domain<K> {
    /// Binds a Record of the given Domain to the calling Thread and returns
    /// the Handle for it. `reclaim_threshold` is the Number of retired Ptrs
    /// at which the Handle starts a Scan on its own.
    ///
    /// # Errors
    /// Fails with [`DomainError::OutOfRecords`] if the Registry already
    /// holds its maximum number of Records and none of them is free for
    /// reuse
    pub fn register(
        global: &'static DomainGlobal<K>,
        reclaim_threshold: usize,
    ) -> Result<Self, DomainError> {
        let record = global.acquire_record()?;

        Ok(Self {
            global,
            record,
            r_threshold: reclaim_threshold,
            r_list: Vec::new(),
        })
    }

    fn record(&self) -> &Record<K> {
        // # Safety:
        //
        // The Record was handed out by the Registry at registration and
        // Records are never freed while the Global they belong to exists
        unsafe { &*self.record }
    }

    /// Acquires one of the `K` Hazard-Slots of this Thread and returns a
    /// Guard for it that does not protect anything yet
    ///
    /// # Errors
    /// Fails with [`DomainError::TooManyGuards`] if every Slot is currently
    /// owned by another Guard
    pub fn empty_guard<T>(&mut self) -> Result<Guard<T>, DomainError> {
        let slot = self
            .record()
            .try_acquire_slot()
            .ok_or(DomainError::TooManyGuards)?;

        Ok(Guard::new(slot as *const _))
    }

    /// Loads the most recent Ptr-Value from the given AtomicPtr, protects it
    /// using one of the Hazard-Slots of this Thread and returns a Guard,
    /// through which the underlying Data can be accessed safely
    ///
    /// # Errors
    /// Fails with [`DomainError::TooManyGuards`] if every Slot is currently
    /// owned by another Guard
    pub fn protect<T>(
        &mut self,
        atom_ptr: &atomic::AtomicPtr<T>,
        load_order: atomic::Ordering,
    ) -> Result<Guard<T>, DomainError> {
        let mut guard: Guard<T> = self.empty_guard()?;
        guard.protect(atom_ptr, load_order);

        Ok(guard)
    }

    /// Marks the given Ptr as being removed from whatever System it was part
    /// of, to be reclaimed through `retire_func` once no Hazard-Slot
    /// protects it anymore. Crossing the configured Threshold of pending
    /// Ptrs starts a Scan
    pub fn retire_node<F>(&mut self, node: *mut (), retire_func: F)
    where
        F: Fn(*mut ()) + Send + 'static,
    {
        let r_node = RetireNode::new(node, Box::new(retire_func));
        self.r_list.push(r_node);

        if self.r_list.len() >= self.r_threshold {
            self.scan();
        }
    }

    /// The Number of retired Ptrs this Handle still has to reclaim
    pub fn pending(&self) -> usize {
        self.r_list.len()
    }

    /// Forces a Reclamation attempt, which might reclaim some of the retired
    /// Ptrs, but can not give any Guarantee, as they might still be
    /// protected by other Threads
    pub fn reclaim(&mut self) {
        self.scan();
    }

    /// Attempts to reclaim every pending RetireNode whose Ptr does not show
    /// up in the current Set of Protections
    fn scan(&mut self) {
        self.r_list.extend(self.global.claim_donations());

        let plist = self.global.get_protections();

        let tmplist = std::mem::take(&mut self.r_list);
        for node in tmplist {
            if plist.contains(&node.ptr()) {
                self.r_list.push(node);
            } else {
                // # Safety:
                //
                // The Ptr was unlinked before it was retired and the Scan
                // just observed that no Hazard-Slot protects it, so this
                // Node has exclusive access to the Data
                unsafe { node.retire() };
            }
        }
    }
}

impl<const K: usize> Drop for Domain<K> {
    fn drop(&mut self) {
        self.scan();

        if !self.r_list.is_empty() {
            self.global.donate(std::mem::take(&mut self.r_list));
        }

        self.global.release_record(self.record);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn register_returns_record_on_drop() {
        static GLOBAL: DomainGlobal = DomainGlobal::with_max_records(1);

        let domain = Domain::register(&GLOBAL, 10).unwrap();
        assert_eq!(
            Err(DomainError::OutOfRecords),
            Domain::register(&GLOBAL, 10).map(|_| ())
        );

        drop(domain);
        Domain::register(&GLOBAL, 10).unwrap();
    }

    #[test]
    fn guard_budget_is_bounded() {
        static GLOBAL: DomainGlobal<2> = DomainGlobal::new();

        let mut domain = Domain::register(&GLOBAL, 10).unwrap();

        let first: Guard<u32> = domain.empty_guard().unwrap();
        let _second: Guard<u32> = domain.empty_guard().unwrap();
        assert_eq!(
            Err(DomainError::TooManyGuards),
            domain.empty_guard::<u32>().map(|_| ())
        );

        drop(first);
        domain.empty_guard::<u32>().unwrap();
    }

    #[test]
    fn retire_below_threshold_keeps_node() {
        static GLOBAL: DomainGlobal = DomainGlobal::new();

        let mut domain = Domain::register(&GLOBAL, 10).unwrap();

        domain.retire_node(0x123 as *mut (), |_| {});
        assert_eq!(1, domain.pending());

        domain.reclaim();
        assert_eq!(0, domain.pending());
    }

    #[test]
    fn protected_ptr_survives_scan() {
        static GLOBAL: DomainGlobal = DomainGlobal::new();

        let mut domain = Domain::register(&GLOBAL, 100).unwrap();

        let data_ptr = Box::into_raw(Box::new(15u32));
        let atom_ptr = atomic::AtomicPtr::new(data_ptr);

        let guard = domain.protect(&atom_ptr, atomic::Ordering::SeqCst).unwrap();

        domain.retire_node(data_ptr as *mut (), |ptr| {
            drop(unsafe { Box::from_raw(ptr as *mut u32) });
        });

        domain.reclaim();
        assert_eq!(1, domain.pending());
        assert_eq!(15, *guard);

        drop(guard);
        domain.reclaim();
        assert_eq!(0, domain.pending());
    }
}
