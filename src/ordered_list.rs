//! A Lock-Free sorted Linked-List with Set semantics
//!
//! # Algorithm
//! Removing a Value happens in two Steps: the Node is first marked as
//! logically deleted, by atomically setting the Mark-Bit on its `next` Ptr,
//! and only afterwards physically unlinked, by swinging the `next` Ptr of
//! its Predecessor past it. Every Traversal that encounters a marked Node
//! helps with the Unlinking before it moves on, which is what keeps all
//! Operations lock-free.
//!
//! Every Operation runs under Hazard-Pointer protection and therefore takes
//! the [`Domain`]-Handle of the calling Thread; all Threads working on the
//! same List have to be registered with the same Domain.
//!
//! # Reference:
//! * [High Performance Dynamic Lock-Free Hash Tables and List-Based Sets](https://dl.acm.org/doi/10.1145/564870.564881)
//! * [A Pragmatic Implementation of Non-Blocking Linked-Lists](https://www.cl.cam.ac.uk/research/srg/netos/papers/2001-caslists.pdf)

use core::cmp::Ordering as CmpOrdering;
use core::marker::PhantomData;
use core::ptr;
use std::{error::Error, fmt, fmt::Debug};

use crate::backoff::{Backoff, NoBackoff};
use crate::hazard_ptr::{Domain, DomainError, Guard};
use crate::sync::atomic;

mod mptr;
use mptr::MarkedPtr;

mod node;
use node::Node;

mod iter;
pub use iter::Iter;

/// The Errors that can be returned by the Operations of the List
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListError {
    /// Allocating a new Node failed
    OutOfMemory,
    /// Every Hazard-Slot of the calling Thread is already owned by another
    /// Guard, so the Operation could not acquire the Slots it traverses with
    TooManyGuards,
    /// The Registry of the Hazard-Pointer-Domain is full
    OutOfRecords,
}

impl From<DomainError> for ListError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::TooManyGuards => Self::TooManyGuards,
            DomainError::OutOfRecords => Self::OutOfRecords,
        }
    }
}

impl fmt::Display for ListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Allocating a new Node failed"),
            Self::TooManyGuards => {
                write!(f, "Every Hazard-Slot of the current Thread is in use")
            }
            Self::OutOfRecords => write!(f, "The Registry of the Domain is full"),
        }
    }
}

impl Error for ListError {}

/// A total Order over the Values stored in a List
pub trait Comparator<T> {
    /// Compares the two given Values
    fn compare(&self, left: &T, right: &T) -> CmpOrdering;
}

/// Orders the Values by their `Ord` implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrder;

impl<T> Comparator<T> for NaturalOrder
where
    T: Ord,
{
    fn compare(&self, left: &T, right: &T) -> CmpOrdering {
        left.cmp(right)
    }
}

/// A Reference to a Value stored in a List, kept alive by the Hazard-Guard
/// it wraps. The Value can not be reclaimed while the RefValue exists, even
/// if it is removed from the List concurrently
#[derive(Debug)]
pub struct RefValue<T> {
    guard: Guard<Node<T>>,
}

impl<T> RefValue<T> {
    /// The protected Value itself
    pub fn value(&self) -> &T {
        &self.guard.value
    }
}

impl<T> AsRef<T> for RefValue<T> {
    fn as_ref(&self) -> &T {
        self.value()
    }
}

impl<T> PartialEq for RefValue<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.value().eq(other.value())
    }
}

impl<T> PartialEq<T> for RefValue<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &T) -> bool {
        self.value().eq(other)
    }
}

/// A Lock-Free sorted Set, backed by a singly linked List with Mark-Bit
/// based two-step Deletion
///
/// Every Operation takes the Hazard-Pointer [`Domain`]-Handle of the calling
/// Thread. The List never blocks: conflicting Updates simply retry and every
/// Traversal helps unlinking the logically deleted Nodes it runs into.
pub struct OrderedList<T, C = NaturalOrder, B = NoBackoff> {
    /// The Entry-Ptr of the List. This plays the role of the `next` Field of
    /// a Head-Sentinel, which is never compared by Value and never deleted
    head: MarkedPtr<Node<T>>,
    comparator: C,
    _backoff: PhantomData<B>,
}

// The List owns its Values and hands out shared References to them across
// Threads, so it needs the same Bounds the Values would need themselves
unsafe impl<T, C, B> Send for OrderedList<T, C, B>
where
    T: Send,
    C: Send,
{
}
unsafe impl<T, C, B> Sync for OrderedList<T, C, B>
where
    T: Send + Sync,
    C: Sync,
{
}

impl<T> OrderedList<T> {
    /// Creates a new empty List that uses the natural Order of its Values
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<T> Default for OrderedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, C, B> Debug for OrderedList<T, C, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderedList<{}> ()", core::any::type_name::<T>())
    }
}

impl<T, C, B> OrderedList<T, C, B> {
    /// Creates a new empty List that is ordered by the given Comparator
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            head: MarkedPtr::new(ptr::null_mut()),
            comparator,
            _backoff: PhantomData,
        }
    }
}

/// The two Hazard-Guards a Traversal leapfrogs with
struct Guards<T> {
    prev: Guard<Node<T>>,
    curr: Guard<Node<T>>,
}

impl<T> Guards<T> {
    fn acquire<const K: usize>(handle: &mut Domain<K>) -> Result<Self, DomainError> {
        Ok(Self {
            prev: handle.empty_guard()?,
            curr: handle.empty_guard()?,
        })
    }
}

/// The Result of a Search: `prev` is the Link-Field whose CAS inserts or
/// unlinks at this Position, `curr` the first Node whose Value is not
/// smaller than the Key, a Null-Ptr if no such Node exists
struct Position<T> {
    prev: *const MarkedPtr<Node<T>>,
    curr: *mut Node<T>,
    found: bool,
}

impl<T, C, B> OrderedList<T, C, B>
where
    T: Send + 'static,
    C: Comparator<T>,
    B: Backoff + Default,
{
    /// The Search-Loop at the heart of every Operation. Returns the Position
    /// between two adjacent unmarked Nodes with
    /// `prev.value < key <= curr.value`, having physically unlinked and
    /// retired every marked Node seen along the way.
    ///
    /// On return `guards.prev` protects the Node owning the `prev` Field
    /// (nothing if that is the List-Head) and `guards.curr` protects `curr`.
    fn locate<const K: usize>(
        &self,
        key: &T,
        guards: &mut Guards<T>,
        handle: &mut Domain<K>,
    ) -> Position<T> {
        let mut backoff = B::default();

        'restart: loop {
            let mut prev: *const MarkedPtr<Node<T>> = &self.head;
            guards.prev.clear();

            let (mut curr, _) = unsafe { &*prev }.protect(&mut guards.curr);

            loop {
                if curr.is_null() {
                    return Position {
                        prev,
                        curr,
                        found: false,
                    };
                }

                // # Safety:
                //
                // `curr` was validated to be reachable through `*prev` after
                // it was published in the Hazard-Slot, so it can not have
                // been reclaimed
                let curr_ref = unsafe { &*curr };
                let (succ, marked) = curr_ref.next.load(atomic::Ordering::Acquire);

                if marked {
                    // curr is logically deleted, splice it out. A marked
                    // `next` is frozen, so `succ` can not change under us
                    if unsafe { &*prev }
                        .compare_exchange(
                            (curr, false),
                            (succ, false),
                            atomic::Ordering::SeqCst,
                            atomic::Ordering::SeqCst,
                        )
                        .is_err()
                    {
                        backoff.pause();
                        continue 'restart;
                    }

                    handle.retire_node(curr as *mut (), |ptr| unsafe { Node::<T>::reclaim(ptr) });

                    let (n_curr, n_marked) = unsafe { &*prev }.protect(&mut guards.curr);
                    if n_marked {
                        // the Predecessor itself got deleted in the meantime
                        continue 'restart;
                    }
                    curr = n_curr;
                    continue;
                }

                match self.comparator.compare(&curr_ref.value, key) {
                    CmpOrdering::Less => {
                        core::mem::swap(&mut guards.prev, &mut guards.curr);
                        prev = &curr_ref.next;

                        let (n_curr, n_marked) = unsafe { &*prev }.protect(&mut guards.curr);
                        if n_marked {
                            continue 'restart;
                        }
                        curr = n_curr;
                    }
                    ordering => {
                        return Position {
                            prev,
                            curr,
                            found: ordering == CmpOrdering::Equal,
                        };
                    }
                }
            }
        }
    }

    /// Inserts the given Value at its unique sorted Position. Returns
    /// `Ok(false)`, without modifying the List, if an equal Value already
    /// exists
    ///
    /// # Errors
    /// [`ListError::OutOfMemory`] if the Node-Allocation failed and
    /// [`ListError::TooManyGuards`] if the Hazard-Slot Budget of the calling
    /// Thread is exhausted; the List is untouched in both Cases
    pub fn insert<const K: usize>(
        &self,
        value: T,
        handle: &mut Domain<K>,
    ) -> Result<bool, ListError> {
        let mut guards = Guards::acquire(handle)?;

        let n_node = Node::try_alloc(value).ok_or(ListError::OutOfMemory)?;
        let mut backoff = B::default();

        loop {
            let pos = {
                // # Safety:
                //
                // The Node is owned by this Thread until the CAS below links
                // it into the List
                let key = unsafe { &(*n_node).value };
                self.locate(key, &mut guards, handle)
            };

            if pos.found {
                // an equal Value won the race, the Node was never linked and
                // this Thread is still its only owner
                unsafe { Node::<T>::reclaim(n_node as *mut ()) };
                return Ok(false);
            }

            unsafe { &*n_node }
                .next
                .store(pos.curr, false, atomic::Ordering::SeqCst);

            match unsafe { &*pos.prev }.compare_exchange(
                (pos.curr, false),
                (n_node, false),
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(true),
                Err(_) => backoff.pause(),
            };
        }
    }

    /// Removes the Node whose Value equals the given Key. Returns `Ok(true)`
    /// iff such a Node existed; the Mark-CAS is the Moment the Value
    /// disappears from the Set, the physical Unlink may be finished by a
    /// later Traversal
    pub fn erase<const K: usize>(&self, key: &T, handle: &mut Domain<K>) -> Result<bool, ListError> {
        let mut guards = Guards::acquire(handle)?;
        let mut backoff = B::default();

        loop {
            let pos = self.locate(key, &mut guards, handle);
            if !pos.found {
                return Ok(false);
            }

            let curr_ref = unsafe { &*pos.curr };
            let (succ, already_marked) = curr_ref.next.fetch_or_mark(atomic::Ordering::SeqCst);
            if already_marked {
                // another Thread is deleting this Node, search again to help
                // with the Unlink and re-check for the Key
                backoff.pause();
                continue;
            }

            // the Value is logically gone at this Point, the Unlink is only
            // best-effort. Retire happens exactly once, on the successful
            // Unlink, whether it is this one or the one of a helping
            // Traversal
            if unsafe { &*pos.prev }
                .compare_exchange(
                    (pos.curr, false),
                    (succ, false),
                    atomic::Ordering::SeqCst,
                    atomic::Ordering::SeqCst,
                )
                .is_ok()
            {
                handle.retire_node(pos.curr as *mut (), |ptr| unsafe { Node::<T>::reclaim(ptr) });
            }

            return Ok(true);
        }
    }

    /// Checks whether a not-deleted Node with the given Key existed at some
    /// Instant during the Call
    pub fn find<const K: usize>(&self, key: &T, handle: &mut Domain<K>) -> Result<bool, ListError> {
        let mut guards = Guards::acquire(handle)?;

        let pos = self.locate(key, &mut guards, handle);
        Ok(pos.found)
    }

    /// Looks up the given Key and returns a protected Reference to the
    /// stored Value. The Value stays accessible for as long as the RefValue
    /// exists, even if it is removed from the List in the meantime
    pub fn get<const K: usize>(
        &self,
        key: &T,
        handle: &mut Domain<K>,
    ) -> Result<Option<RefValue<T>>, ListError> {
        let mut guards = Guards::acquire(handle)?;

        let pos = self.locate(key, &mut guards, handle);
        if pos.found {
            let Guards { curr, .. } = guards;
            Ok(Some(RefValue { guard: curr }))
        } else {
            Ok(None)
        }
    }

    /// Creates a weakly consistent Iterator over the List: Values that are
    /// present for the whole Iteration are all yielded exactly once,
    /// concurrently inserted or removed Values may or may not show up
    pub fn iter<'l, 'd, const K: usize>(
        &'l self,
        handle: &'d mut Domain<K>,
    ) -> Result<Iter<'l, 'd, T, C, B, K>, ListError> {
        Iter::new(self, handle)
    }
}

impl<T, C, B> Drop for OrderedList<T, C, B> {
    fn drop(&mut self) {
        // Exclusive access: every Node still linked is owned solely by the
        // List, unlinked Nodes were already handed to retire
        let (mut current, _) = self.head.load(atomic::Ordering::SeqCst);
        while !current.is_null() {
            let boxed = unsafe { Box::from_raw(current) };
            let (next, _) = boxed.next.load(atomic::Ordering::SeqCst);
            current = next;
        }
    }
}
