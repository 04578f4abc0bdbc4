use crate::hazard_ptr::Guard;
use crate::sync::atomic;

/// An atomic Ptr that additionally carries the logical-deletion Mark of its
/// owning Node in the lowest Bit of the stored Address. Address and Mark are
/// always loaded, stored and CAS-ed as one single Word
pub(crate) struct MarkedPtr<T> {
    inner: atomic::AtomicPtr<T>,
}

impl<T> MarkedPtr<T> {
    /// Creates a new unmarked Ptr for the given Address
    pub fn new(ptr: *mut T) -> Self {
        Self {
            inner: atomic::AtomicPtr::new(ptr),
        }
    }

    /// Atomically loads the (Address, Mark) Pair
    pub fn load(&self, order: atomic::Ordering) -> (*mut T, bool) {
        decompose(self.inner.load(order))
    }

    /// Atomically stores the given (Address, Mark) Pair
    pub fn store(&self, ptr: *mut T, mark: bool, order: atomic::Ordering) {
        self.inner.store(compose(ptr, mark), order);
    }

    /// A single CAS over the whole (Address, Mark) Pair, returns the found
    /// Pair on failure
    pub fn compare_exchange(
        &self,
        (current, current_mark): (*mut T, bool),
        (new, new_mark): (*mut T, bool),
        success: atomic::Ordering,
        failure: atomic::Ordering,
    ) -> Result<(), (*mut T, bool)> {
        self.inner
            .compare_exchange(
                compose(current, current_mark),
                compose(new, new_mark),
                success,
                failure,
            )
            .map(|_| ())
            .map_err(decompose)
    }

    /// Sets the Mark-Bit, leaving the Address untouched, and returns the
    /// previously stored Pair
    pub fn fetch_or_mark(&self, order: atomic::Ordering) -> (*mut T, bool) {
        let mut current = self.inner.load(atomic::Ordering::SeqCst);
        loop {
            if is_marked(current) {
                return decompose(current);
            }

            match self.inner.compare_exchange_weak(
                current,
                mark_ptr(current),
                order,
                atomic::Ordering::SeqCst,
            ) {
                Ok(prev) => return decompose(prev),
                Err(n_current) => current = n_current,
            };
        }
    }

    /// Loads the stored Pair and publishes the Address in the given Guard.
    /// The Ptr is read at least 2-times to make sure the Publication was
    /// visible before the Pair could have changed; the Hazard-Slot receives
    /// the bare Address, the validation compares the full tagged Word
    pub fn protect(&self, guard: &mut Guard<T>) -> (*mut T, bool) {
        let mut current = self.inner.load(atomic::Ordering::SeqCst);
        loop {
            guard.publish(to_actual_ptr(current));

            let n_current = self.inner.load(atomic::Ordering::SeqCst);
            if n_current == current {
                return decompose(current);
            }

            current = n_current;
        }
    }
}

pub fn is_marked<T>(ptr: *mut T) -> bool {
    (ptr as usize) & 0x1 == 1
}

pub fn mark_ptr<T>(ptr: *mut T) -> *mut T {
    ((ptr as usize) | 0x1) as *mut T
}

pub fn to_actual_ptr<T>(ptr: *mut T) -> *mut T {
    ((ptr as usize) & (usize::MAX - 1)) as *mut T
}

fn compose<T>(ptr: *mut T, mark: bool) -> *mut T {
    if mark {
        mark_ptr(ptr)
    } else {
        ptr
    }
}

fn decompose<T>(raw: *mut T) -> (*mut T, bool) {
    (to_actual_ptr(raw), is_marked(raw))
}
