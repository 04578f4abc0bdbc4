use core::ptr;
use std::{collections::HashSet, fmt::Debug};

use crate::sync::atomic;

use super::super::{record::Record, retire_node::RetireNode, DomainError};

/// The Registry-Capacity used when none is given explicitly
pub const DEFAULT_MAX_RECORDS: usize = 64;

/// This represents the Global shared State for a single Hazard-Pointer-
/// Domain, which is mainly the Registry of all the Thread-Records in the
/// Domain
pub struct DomainGlobal<const K: usize = 4> {
    /// The Head of the grow-only List of Thread-Records
    records: atomic::AtomicPtr<Record<K>>,
    /// The Number of Records currently in the Registry
    record_count: atomic::AtomicUsize,
    /// The upper Bound on the Number of Records
    max_records: usize,
    /// Retired Ptrs that were donated by exiting Threads and are waiting to
    /// be claimed by the next Scan
    donated: atomic::AtomicPtr<DonationNode>,
}

/// A single Batch of donated RetireNodes
struct DonationNode {
    nodes: Vec<RetireNode>,
    next: *mut DonationNode,
}

impl<const K: usize> Debug for DomainGlobal<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.record_count.load(atomic::Ordering::SeqCst);
        write!(
            f,
            "Domain-Global ( records = {}/{} )",
            count, self.max_records
        )
    }
}

impl<const K: usize> DomainGlobal<K> {
    /// Creates a new empty DomainGlobal instance with the default Registry-
    /// Capacity
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self::with_max_records(DEFAULT_MAX_RECORDS)
    }

    /// Creates a new empty DomainGlobal instance with the default Registry-
    /// Capacity
    #[cfg(loom)]
    pub fn new() -> Self {
        Self::with_max_records(DEFAULT_MAX_RECORDS)
    }

    /// Creates a new empty DomainGlobal instance, which can register up to
    /// `max_records` Threads at the same time
    #[cfg(not(loom))]
    pub const fn with_max_records(max_records: usize) -> Self {
        Self {
            records: atomic::AtomicPtr::new(0 as *mut Record<K>),
            record_count: atomic::AtomicUsize::new(0),
            max_records,
            donated: atomic::AtomicPtr::new(0 as *mut DonationNode),
        }
    }

    /// Creates a new empty DomainGlobal instance, which can register up to
    /// `max_records` Threads at the same time
    #[cfg(loom)]
    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            records: atomic::AtomicPtr::new(ptr::null_mut()),
            record_count: atomic::AtomicUsize::new(0),
            max_records,
            donated: atomic::AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Checks all the Hazard-Slots of all Records and returns the Set of
    /// Ptrs that are currently protected by them
    pub(super) fn get_protections(&self) -> HashSet<*const ()> {
        let mut plist = HashSet::new();

        let mut current = self.records.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let record = unsafe { &*current };
            for slot in record.slots.iter() {
                let ptr_val = slot.protected.load(atomic::Ordering::SeqCst);
                if !ptr_val.is_null() {
                    plist.insert(ptr_val as *const ());
                }
            }

            current = record.next.load(atomic::Ordering::SeqCst);
        }

        plist
    }

    /// Hands out a Record for the calling Thread, either by re-binding an
    /// inactive Record or by appending a new one, as long as the Registry-
    /// Capacity is not yet reached
    pub(super) fn acquire_record(&self) -> Result<*mut Record<K>, DomainError> {
        let mut current = self.records.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let record = unsafe { &*current };
            if record.try_activate() {
                return Ok(current);
            }

            current = record.next.load(atomic::Ordering::SeqCst);
        }

        let mut count = self.record_count.load(atomic::Ordering::SeqCst);
        loop {
            if count >= self.max_records {
                return Err(DomainError::OutOfRecords);
            }

            match self.record_count.compare_exchange(
                count,
                count + 1,
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(n_count) => count = n_count,
            };
        }

        let n_record_ptr = Box::into_raw(Record::boxed_active());
        self.append_record(n_record_ptr);

        Ok(n_record_ptr)
    }

    /// Marks the given Record as no longer bound to any Thread, making it
    /// available for the next registering Thread. Releasing an already
    /// released Record has no effect
    pub(super) fn release_record(&self, record: *mut Record<K>) {
        let record = unsafe { &*record };
        record.active.store(false, atomic::Ordering::SeqCst);
    }

    /// This is used to add a new Record to the End of the Registry-List
    fn append_record(&self, n_record_ptr: *mut Record<K>) {
        let mut current = &self.records;
        loop {
            let ptr = current.load(atomic::Ordering::SeqCst);
            if ptr.is_null() {
                match current.compare_exchange(
                    ptr::null_mut(),
                    n_record_ptr,
                    atomic::Ordering::SeqCst,
                    atomic::Ordering::SeqCst,
                ) {
                    Ok(_) => return,
                    Err(_) => continue,
                };
            }

            current = unsafe { &(*ptr).next };
        }
    }

    /// Stores the given Batch of RetireNodes in the Donation-List, where it
    /// stays until the next Scan of any Thread claims it
    pub(super) fn donate(&self, nodes: Vec<RetireNode>) {
        let n_node = Box::into_raw(Box::new(DonationNode {
            nodes,
            next: ptr::null_mut(),
        }));

        loop {
            let head = self.donated.load(atomic::Ordering::SeqCst);
            unsafe { (*n_node).next = head };

            if self
                .donated
                .compare_exchange(
                    head,
                    n_node,
                    atomic::Ordering::SeqCst,
                    atomic::Ordering::SeqCst,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Takes all the currently donated RetireNodes out of the Donation-List
    pub(super) fn claim_donations(&self) -> Vec<RetireNode> {
        let mut head = self.donated.swap(ptr::null_mut(), atomic::Ordering::SeqCst);

        let mut result = Vec::new();
        while !head.is_null() {
            let boxed = unsafe { Box::from_raw(head) };
            result.extend(boxed.nodes);
            head = boxed.next;
        }

        result
    }
}

impl<const K: usize> Drop for DomainGlobal<K> {
    fn drop(&mut self) {
        // # Safety:
        //
        // Dropping the Global requires exclusive access, so no Thread can
        // still be registered or hold a Guard into this Domain. Every
        // donated Ptr is therefore unprotected and can be reclaimed directly
        for node in self.claim_donations() {
            unsafe { node.retire() };
        }

        let mut current = self.records.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let boxed = unsafe { Box::from_raw(current) };
            current = boxed.next.load(atomic::Ordering::SeqCst);
        }
    }
}
