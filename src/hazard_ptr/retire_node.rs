/// The RetireNode stores a single Ptr that was removed from a Datastructure,
/// together with the Function that should be used to reclaim the Data behind
/// it once no Hazard-Slot protects it anymore
pub struct RetireNode {
    /// The Data-Ptr that should be reclaimed eventually
    ptr: *mut (),
    /// The Function used to actually reclaim the Data
    retire_fn: Box<dyn Fn(*mut ()) + Send>,
}

impl RetireNode {
    /// Creates a new RetireNode with the given Data
    pub fn new(ptr: *mut (), func: Box<dyn Fn(*mut ()) + Send>) -> Self {
        Self {
            ptr,
            retire_fn: func,
        }
    }

    /// The Ptr stored in this Node, used to check it against the Set of
    /// currently protected Ptrs
    pub fn ptr(&self) -> *const () {
        self.ptr as *const ()
    }

    /// Actually performs the Reclamation of the stored Data
    ///
    /// # Safety
    /// The Caller needs to make sure that the Ptr stored in this Node is not
    /// reachable through the Datastructure anymore and that no Hazard-Slot
    /// currently protects it. The Node has exclusive access to the Data at
    /// this Point, as the stored Function will most likely free the
    /// underlying Memory
    pub unsafe fn retire(self) {
        let retire_fn = self.retire_fn;
        retire_fn(self.ptr);
    }
}

// The stored Ptr was unlinked before the Node was created and the Node is
// its only remaining owner, so handing the Node to another Thread through
// the Donation-List is fine
unsafe impl Send for RetireNode {}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::{atomic, Arc};

    use super::*;

    #[test]
    fn new_node() {
        RetireNode::new(std::ptr::null_mut(), Box::new(|_| {}));
    }

    #[test]
    fn get_ptr() {
        let node = RetireNode::new(0x123 as *mut (), Box::new(|_| {}));
        assert_eq!(0x123 as *const (), node.ptr());
    }

    #[test]
    fn retire_runs_fn() {
        let retired_ptr = Arc::new(atomic::AtomicPtr::new(std::ptr::null_mut()));

        let node_retire_target = retired_ptr.clone();
        let node = RetireNode::new(
            0x123 as *mut (),
            Box::new(move |ptr| {
                node_retire_target.store(ptr, atomic::Ordering::SeqCst);
            }),
        );

        assert_eq!(
            std::ptr::null_mut(),
            retired_ptr.load(atomic::Ordering::SeqCst)
        );

        unsafe { node.retire() };

        assert_eq!(0x123 as *mut (), retired_ptr.load(atomic::Ordering::SeqCst));
    }
}
