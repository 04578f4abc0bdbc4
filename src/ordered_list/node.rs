use core::ptr;
use std::alloc::{self, Layout};

use super::mptr::MarkedPtr;

/// A single Node of the List. The Mark-Bit on `next` flags this Node as
/// logically deleted
pub(crate) struct Node<T> {
    /// The Value stored in this Node
    pub value: T,
    /// The Ptr to the next Node in the List
    pub next: MarkedPtr<Node<T>>,
}

impl<T> Node<T> {
    /// Attempts to allocate a new unlinked Node for the given Value and
    /// returns None if the Allocation itself failed. The Node is owned by
    /// the Caller until it is linked into a List
    pub fn try_alloc(value: T) -> Option<*mut Self> {
        let layout = Layout::new::<Self>();

        // Nodes contain a Ptr, so the Alignment always leaves Bit 0 of the
        // Address free for the deletion Mark
        let raw_ptr = unsafe { alloc::alloc(layout) } as *mut Self;
        if raw_ptr.is_null() {
            return None;
        }

        unsafe {
            raw_ptr.write(Self {
                value,
                next: MarkedPtr::new(ptr::null_mut()),
            })
        };

        Some(raw_ptr)
    }

    /// Drops the Value and frees the Memory of a Node that was previously
    /// created through `try_alloc`
    ///
    /// # Safety
    /// The Caller needs to have exclusive access to the Node, meaning it is
    /// either not linked into any List or was retired and is no longer
    /// protected by any Hazard-Slot
    pub unsafe fn reclaim(ptr: *mut ()) {
        drop(unsafe { Box::from_raw(ptr as *mut Self) });
    }
}
