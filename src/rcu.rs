//! A Quiescent-State based user-space RCU implementation
//!
//! # How it works
//! Readers announce their read-side critical Sections through a per-Thread
//! Epoch-Counter instead of per-Ptr Hazard-Slots: entering publishes the
//! current global Epoch, leaving resets the Counter to its quiescent State.
//! Retired Ptrs are tagged with the Epoch at which they were handed in and
//! are reclaimed once every currently active Reader entered at a later
//! Epoch, because the Ptr was already unlinked before their critical
//! Section began.
//!
//! Compared to the Hazard-Pointer Domain this trades a bounded per-Thread
//! Garbage-Limit for much cheaper Reads, as a Reader only publishes once
//! per Operation instead of once per visited Node.
//!
//! # Reference:
//! * [User-Level Implementations of Read-Copy Update](https://www.rdrop.com/users/paulmck/RCU/urcu-main-accepted.2011.08.30a.pdf)

use core::ptr;
use std::fmt::Debug;

use crate::sync::atomic;

/// The Value a Reader-Counter holds while its Thread is not inside a
/// read-side critical Section
const QUIESCENT: usize = 0;

/// A single Reader-Record in the grow-only Registry of an [`Rcu`] instance
struct ReaderRecord {
    /// The Epoch the owning Thread entered its current read-side critical
    /// Section at, `QUIESCENT` outside of one
    epoch: atomic::AtomicUsize,
    /// Set while a Thread is bound to this Record
    active: atomic::AtomicBool,
    /// The Ptr to the next Record in the Registry-List
    next: atomic::AtomicPtr<ReaderRecord>,
}

impl ReaderRecord {
    fn boxed_active() -> Box<Self> {
        Box::new(Self {
            epoch: atomic::AtomicUsize::new(QUIESCENT),
            active: atomic::AtomicBool::new(true),
            next: atomic::AtomicPtr::new(ptr::null_mut()),
        })
    }
}

/// A single retired Ptr, tagged with the Epoch at which it was handed in
struct Deferred {
    epoch: usize,
    ptr: *mut (),
    free_fn: Box<dyn Fn(*mut ()) + Send>,
}

// The stored Ptr was unlinked before the Deferred was created and the
// Deferred is its only remaining owner
unsafe impl Send for Deferred {}

/// A single Batch of Deferred entries donated by an exiting Thread
struct DonatedBatch {
    nodes: Vec<Deferred>,
    next: *mut DonatedBatch,
}

/// The shared Global State of one RCU instance: the global Epoch-Counter
/// and the Registry of all Reader-Records
///
/// In most cases this is stored in a `static` next to the Datastructure it
/// protects, with every participating Thread holding its own
/// [`RcuHandle`]
pub struct Rcu {
    /// The global Epoch, bumped on every retire
    global_epoch: atomic::AtomicUsize,
    /// The Head of the grow-only List of Reader-Records
    readers: atomic::AtomicPtr<ReaderRecord>,
    /// Retired Ptrs that were donated by exiting Threads and are waiting to
    /// be claimed by the next Flush
    donated: atomic::AtomicPtr<DonatedBatch>,
}

impl Debug for Rcu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let epoch = self.global_epoch.load(atomic::Ordering::SeqCst);
        write!(f, "Rcu ( epoch = {} )", epoch)
    }
}

impl Rcu {
    /// Creates a new empty RCU instance without any registered Readers
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            // Epochs start above QUIESCENT so the two can never be confused
            global_epoch: atomic::AtomicUsize::new(QUIESCENT + 1),
            readers: atomic::AtomicPtr::new(0 as *mut ReaderRecord),
            donated: atomic::AtomicPtr::new(0 as *mut DonatedBatch),
        }
    }

    /// Creates a new empty RCU instance without any registered Readers
    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            global_epoch: atomic::AtomicUsize::new(QUIESCENT + 1),
            readers: atomic::AtomicPtr::new(ptr::null_mut()),
            donated: atomic::AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Binds a Reader-Record to the calling Thread. `flush_threshold` is the
    /// Number of retired Ptrs at which the Handle attempts a Flush on its
    /// own. The Registry grows on demand, so Registration can not fail
    pub fn register(&'static self, flush_threshold: usize) -> RcuHandle {
        let record = self.acquire_record();

        RcuHandle {
            global: self,
            record,
            threshold: flush_threshold,
            deferred: Vec::new(),
        }
    }

    fn acquire_record(&self) -> *mut ReaderRecord {
        let mut current = self.readers.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let record = unsafe { &*current };
            if record
                .active
                .compare_exchange(
                    false,
                    true,
                    atomic::Ordering::SeqCst,
                    atomic::Ordering::SeqCst,
                )
                .is_ok()
            {
                return current;
            }

            current = record.next.load(atomic::Ordering::SeqCst);
        }

        let n_record_ptr = Box::into_raw(ReaderRecord::boxed_active());

        let mut current = &self.readers;
        loop {
            let ptr = current.load(atomic::Ordering::SeqCst);
            if ptr.is_null() {
                match current.compare_exchange(
                    ptr::null_mut(),
                    n_record_ptr,
                    atomic::Ordering::SeqCst,
                    atomic::Ordering::SeqCst,
                ) {
                    Ok(_) => return n_record_ptr,
                    Err(_) => continue,
                };
            }

            current = unsafe { &(*ptr).next };
        }
    }

    /// Stores the given Batch of Deferred entries in the Donation-List,
    /// where it stays until the next Flush of any Thread claims it
    fn donate(&self, nodes: Vec<Deferred>) {
        let n_batch = Box::into_raw(Box::new(DonatedBatch {
            nodes,
            next: ptr::null_mut(),
        }));

        loop {
            let head = self.donated.load(atomic::Ordering::SeqCst);
            unsafe { (*n_batch).next = head };

            if self
                .donated
                .compare_exchange(
                    head,
                    n_batch,
                    atomic::Ordering::SeqCst,
                    atomic::Ordering::SeqCst,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Takes all the currently donated Deferred entries out of the
    /// Donation-List
    fn claim_donations(&self) -> Vec<Deferred> {
        let mut head = self.donated.swap(ptr::null_mut(), atomic::Ordering::SeqCst);

        let mut result = Vec::new();
        while !head.is_null() {
            let boxed = unsafe { Box::from_raw(head) };
            result.extend(boxed.nodes);
            head = boxed.next;
        }

        result
    }

    /// The smallest Epoch any currently active Reader entered at,
    /// `usize::MAX` if every Reader is quiescent
    fn oldest_reader_epoch(&self) -> usize {
        let mut oldest = usize::MAX;

        let mut current = self.readers.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let record = unsafe { &*current };
            let epoch = record.epoch.load(atomic::Ordering::SeqCst);
            if epoch != QUIESCENT && epoch < oldest {
                oldest = epoch;
            }

            current = record.next.load(atomic::Ordering::SeqCst);
        }

        oldest
    }
}

impl Drop for Rcu {
    fn drop(&mut self) {
        // Exclusive access, no Reader can still be registered, so every
        // donated Ptr is past its Grace-Period and can be reclaimed directly
        for node in self.claim_donations() {
            (node.free_fn)(node.ptr);
        }

        let mut current = self.readers.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let boxed = unsafe { Box::from_raw(current) };
            current = boxed.next.load(atomic::Ordering::SeqCst);
        }
    }
}

/// The per-Thread Handle for one [`Rcu`] instance, used both to enter
/// read-side critical Sections and to retire removed Ptrs
///
/// Dropping the Handle attempts one final Flush, donates everything that is
/// still inside its Grace-Period back to the instance and returns the
/// underlying Reader-Record for the next registering Thread.
pub struct RcuHandle {
    global: &'static Rcu,
    record: *mut ReaderRecord,
    /// The Threshold at which a Flush is started
    threshold: usize,
    /// Retired Ptrs whose Grace-Period has not passed yet
    deferred: Vec<Deferred>,
}

impl Debug for RcuHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rcu-Handle ( pending = {} )", self.deferred.len())
    }
}

impl RcuHandle {
    fn record(&self) -> &ReaderRecord {
        // # Safety:
        //
        // Records are handed out by the Registry and never freed while the
        // Rcu instance they belong to exists
        unsafe { &*self.record }
    }

    /// Enters a read-side critical Section. Every Ptr that is reachable
    /// through the protected Datastructure at this Point stays valid until
    /// the returned Guard is dropped.
    ///
    /// The Guard borrows the Handle exclusively, which rules out nested
    /// Sections, as a nested Entry would overwrite the published Epoch
    pub fn read_lock(&mut self) -> RcuGuard<'_> {
        let epoch = self.global.global_epoch.load(atomic::Ordering::SeqCst);
        self.record().epoch.store(epoch, atomic::Ordering::SeqCst);

        RcuGuard { handle: self }
    }

    /// Hands over a removed Ptr, to be reclaimed through `free_fn` once
    /// every Reader that might still see it has left its critical Section.
    /// Crossing the configured Threshold of pending Ptrs starts a Flush
    pub fn retire<F>(&mut self, ptr: *mut (), free_fn: F)
    where
        F: Fn(*mut ()) + Send + 'static,
    {
        let epoch = self
            .global
            .global_epoch
            .fetch_add(1, atomic::Ordering::SeqCst);

        self.deferred.push(Deferred {
            epoch,
            ptr,
            free_fn: Box::new(free_fn),
        });

        if self.deferred.len() >= self.threshold {
            self.flush();
        }
    }

    /// The Number of retired Ptrs this Handle still has to reclaim
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    /// Attempts to reclaim every pending Ptr whose Grace-Period has passed,
    /// meaning every active Reader entered after the Ptr was retired
    pub fn flush(&mut self) {
        self.deferred.extend(self.global.claim_donations());

        let oldest = self.global.oldest_reader_epoch();

        let tmplist = std::mem::take(&mut self.deferred);
        for node in tmplist {
            if node.epoch < oldest {
                (node.free_fn)(node.ptr);
            } else {
                self.deferred.push(node);
            }
        }
    }
}

impl Drop for RcuHandle {
    fn drop(&mut self) {
        self.flush();

        // whatever is still inside its Grace-Period goes to the
        // Donation-List for a later Flush, waiting for the Readers here
        // would block on their progress
        if !self.deferred.is_empty() {
            self.global.donate(std::mem::take(&mut self.deferred));
        }

        let record = self.record();
        record.epoch.store(QUIESCENT, atomic::Ordering::SeqCst);
        record.active.store(false, atomic::Ordering::SeqCst);
    }
}

/// Marks a read-side critical Section, which ends when the Guard is dropped
pub struct RcuGuard<'h> {
    handle: &'h RcuHandle,
}

impl<'h> Debug for RcuGuard<'h> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rcu-Guard ()")
    }
}

impl<'h> Drop for RcuGuard<'h> {
    fn drop(&mut self) {
        self.handle
            .record()
            .epoch
            .store(QUIESCENT, atomic::Ordering::SeqCst);
    }
}
