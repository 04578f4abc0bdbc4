use core::cmp::Ordering as CmpOrdering;
use core::ptr;

use crate::hazard_ptr::{Domain, Guard};
use crate::sync::atomic;

use super::{mptr::MarkedPtr, node::Node, Comparator, ListError, OrderedList, RefValue};

/// A weakly consistent forward Iterator over a List
///
/// The Iterator walks the List with three Hazard-Guards of its own; every
/// yielded [`RefValue`] carries one additional Guard, so the Number of Items
/// that can be kept around at the same time is bounded by the Slot-Budget
/// `K` of the Thread.
///
/// Values that are present for the whole Iteration are yielded exactly once
/// in ascending Order, concurrently inserted or removed Values may or may
/// not show up.
pub struct Iter<'l, 'd, T, C, B, const K: usize> {
    list: &'l OrderedList<T, C, B>,
    handle: &'d mut Domain<K>,
    /// Protects the Node the Iterator currently stands on
    standing: Guard<Node<T>>,
    /// Protects the Node the Iterator is about to step onto
    lead: Guard<Node<T>>,
    /// The trailing Guard used while re-approaching a Position from the Head
    chase: Guard<Node<T>>,
    pos: *mut Node<T>,
    done: bool,
}

impl<'l, 'd, T, C, B, const K: usize> Iter<'l, 'd, T, C, B, K> {
    pub(super) fn new(
        list: &'l OrderedList<T, C, B>,
        handle: &'d mut Domain<K>,
    ) -> Result<Self, ListError> {
        let standing = handle.empty_guard()?;
        let lead = handle.empty_guard()?;
        let chase = handle.empty_guard()?;

        Ok(Self {
            list,
            handle,
            standing,
            lead,
            chase,
            pos: ptr::null_mut(),
            done: false,
        })
    }
}

impl<'l, 'd, T, C, B, const K: usize> Iter<'l, 'd, T, C, B, K>
where
    T: Send + 'static,
    C: Comparator<T>,
{
    /// Wraps the given Node, which is already protected by `self.standing`,
    /// into its own guarded Reference
    fn yield_item(&mut self, node: *mut Node<T>) -> Result<RefValue<T>, ListError> {
        let mut guard = self.handle.empty_guard::<Node<T>>()?;
        guard.publish(node);

        Ok(RefValue { guard })
    }

    /// Re-approaches the Iteration-Position from the Head of the List, used
    /// once the standing Node itself got deleted and its frozen `next` Ptr
    /// can not be trusted anymore. Stands on and returns the first Node
    /// whose Value is greater than the standing one, None if no such Node
    /// is left
    fn seek_past(&mut self) -> Option<*mut Node<T>> {
        // the standing Node is protected, so its Value stays readable even
        // though the Node was removed from the List
        let bound = unsafe { &(*self.pos).value };

        'restart: loop {
            let mut src: *const MarkedPtr<Node<T>> = &self.list.head;
            self.chase.clear();

            let (mut cand, _) = unsafe { &*src }.protect(&mut self.lead);

            loop {
                if cand.is_null() {
                    return None;
                }

                let cand_ref = unsafe { &*cand };
                let (succ, marked) = cand_ref.next.load(atomic::Ordering::Acquire);

                if marked {
                    if unsafe { &*src }
                        .compare_exchange(
                            (cand, false),
                            (succ, false),
                            atomic::Ordering::SeqCst,
                            atomic::Ordering::SeqCst,
                        )
                        .is_err()
                    {
                        continue 'restart;
                    }

                    self.handle
                        .retire_node(cand as *mut (), |ptr| unsafe { Node::<T>::reclaim(ptr) });

                    let (n_cand, n_marked) = unsafe { &*src }.protect(&mut self.lead);
                    if n_marked {
                        continue 'restart;
                    }
                    cand = n_cand;
                    continue;
                }

                if CmpOrdering::Greater == self.list.comparator.compare(&cand_ref.value, bound) {
                    core::mem::swap(&mut self.standing, &mut self.lead);
                    self.pos = cand;
                    return Some(cand);
                }

                core::mem::swap(&mut self.chase, &mut self.lead);
                src = &cand_ref.next;

                let (n_cand, n_marked) = unsafe { &*src }.protect(&mut self.lead);
                if n_marked {
                    continue 'restart;
                }
                cand = n_cand;
            }
        }
    }
}

impl<'l, 'd, T, C, B, const K: usize> Iterator for Iter<'l, 'd, T, C, B, K>
where
    T: Send + 'static,
    C: Comparator<T>,
{
    type Item = Result<RefValue<T>, ListError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        'step: loop {
            // Step through the `next` Field of the standing Node. As long as
            // the standing Node is not deleted that Field is live, so the
            // protection loop can validate against it
            let src: *const MarkedPtr<Node<T>> = if self.pos.is_null() {
                &self.list.head
            } else {
                &unsafe { &*self.pos }.next
            };

            let (mut cand, src_marked) = unsafe { &*src }.protect(&mut self.lead);

            if src_marked {
                // the standing Node got deleted under the Iterator; its
                // frozen `next` may already lead to reclaimed Memory, so the
                // Position has to be re-approached from the Head
                match self.seek_past() {
                    Some(found) => return Some(self.yield_item(found)),
                    None => {
                        self.done = true;
                        return None;
                    }
                };
            }

            loop {
                if cand.is_null() {
                    self.done = true;
                    return None;
                }

                let cand_ref = unsafe { &*cand };
                let (succ, cand_marked) = cand_ref.next.load(atomic::Ordering::Acquire);
                if !cand_marked {
                    break;
                }

                // the Node we are about to step onto is logically deleted,
                // splice it out through the live Source-Field
                if unsafe { &*src }
                    .compare_exchange(
                        (cand, false),
                        (succ, false),
                        atomic::Ordering::SeqCst,
                        atomic::Ordering::SeqCst,
                    )
                    .is_err()
                {
                    // the Source-Field changed, re-examine the Position
                    continue 'step;
                }

                self.handle
                    .retire_node(cand as *mut (), |ptr| unsafe { Node::<T>::reclaim(ptr) });

                let (n_cand, n_src_marked) = unsafe { &*src }.protect(&mut self.lead);
                if n_src_marked {
                    continue 'step;
                }
                cand = n_cand;
            }

            core::mem::swap(&mut self.standing, &mut self.lead);
            self.pos = cand;

            return Some(self.yield_item(cand));
        }
    }
}
