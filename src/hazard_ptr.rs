//! An implementation of Hazard-Pointers with a bounded Registry, that also
//! supports having multiple Hazard-Pointer-Domains
//!
//! # Overview
//! Every participating Thread registers itself with a Domain and receives a
//! Record with `K` Hazard-Slots. Before dereferencing a shared Ptr, the
//! Thread publishes the Address in one of its Slots through a [`Guard`].
//! Removed Ptrs are handed to [`Domain::retire_node`] and only reclaimed
//! once a Scan observes that no Slot of any Thread publishes their Address
//! anymore.
//!
//! # Reference:
//! * [Hazard Pointers: Safe Memory Reclamation for Lock-Free Objects](https://www.eecg.utoronto.ca/~amza/ece1747h/papers/hazard_pointers.pdf)

use std::{error::Error, fmt};

mod record;

mod retire_node;

mod domain;
pub use domain::{Domain, DomainGlobal, DEFAULT_MAX_RECORDS};

mod guard;
pub use guard::Guard;

/// The Errors that can occur while interacting with a Hazard-Pointer-Domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainError {
    /// The Registry of the Domain already holds its maximum number of
    /// Thread-Records and none of them is free for reuse
    OutOfRecords,
    /// Every Hazard-Slot of the calling Thread is currently owned by another
    /// Guard
    TooManyGuards,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRecords => write!(f, "The Registry of the Domain is full"),
            Self::TooManyGuards => {
                write!(f, "Every Hazard-Slot of the current Thread is in use")
            }
        }
    }
}

impl Error for DomainError {}

/// This macro can be used to generate all the needed parts for a new
/// Hazard-Pointer Domain.
/// This domain will then be available as a private module, with the provided
/// Domain-Name.
///
/// # Domains:
/// A Hazard-Domain helps to seperate different parts of your system that
/// do not share memory and therefore are not relevant, safety wise, for
/// other parts in the System and seperating the Hazard-Pointers by Domain
/// can then help with Performance, as they only need to check the
/// Hazard-Pointers relevant to their Domain.
///
/// # Example:
/// Creates a new Domain called `demo_domain` and then uses it to protect
/// an AtomicPtr and give save access to it;
///
/// ```ignore
/// // Creates a module named `demo_domain` and all the Hazard-Pointer parts
/// // are exposed in that module
/// create_hazard_domain!(demo_domain);
///
/// # use std::sync::atomic;
/// # let boxed_ptr: *mut u8 = Box::into_raw(Box::new(13));
/// # let atomic_ptr = atomic::AtomicPtr::new(boxed_ptr);
///
/// // Actually use the new Hazard-Pointer-Domain
/// let guard = demo_domain::protect(&atomic_ptr, atomic::Ordering::SeqCst).unwrap();
/// println!("Value in the Guard: {}", *guard);
/// ```
#[macro_export]
macro_rules! create_hazard_domain {
    ($domain_name:ident) => {
        mod $domain_name {
            use $crate::hazard_ptr::{Domain, DomainError, DomainGlobal, Guard};
            use std::{cell::RefCell, sync::atomic};

            static SUB_GLOBAL: DomainGlobal = DomainGlobal::new();

            const RECLAIM_THRESHOLD: usize = 32;

            std::thread_local! {
                static SUB_DOMAIN: RefCell<Option<Domain>> = RefCell::new(None);
            }

            fn with_domain<R, F>(func: F) -> Result<R, DomainError>
            where
                F: FnOnce(&mut Domain) -> R,
            {
                SUB_DOMAIN.with(|shared_domain| {
                    let mut mut_shared = shared_domain.borrow_mut();
                    if mut_shared.is_none() {
                        *mut_shared = Some(Domain::register(&SUB_GLOBAL, RECLAIM_THRESHOLD)?);
                    }

                    Ok(func(mut_shared.as_mut().unwrap()))
                })
            }

            /// This function protects whatever memory address is stored in
            /// the Atomic-Ptr from being freed, while the Guard is still in
            /// use, indicating that the memory is still needed.
            ///
            /// # Behaviour
            /// This function reads the Atomic-Ptr at least 2-times to make
            /// sure that the Ptr was not invalidated before the Hazard has
            /// been updated accordingly.
            ///
            /// # Errors
            /// The calling Thread is registered with the Domain on first
            /// use, which can fail once the Registry is full, and every Call
            /// needs a free Hazard-Slot
            pub fn protect<T>(
                atom_ptr: &atomic::AtomicPtr<T>,
                load_order: atomic::Ordering,
            ) -> Result<Guard<T>, DomainError> {
                with_domain(|domain| domain.protect(atom_ptr, load_order))?
            }

            /// This function is used to reclaim a piece of memory, once it is
            /// no longer in use by any other Thread. Once it is determined
            /// that the given Address is no longer used by any other Thread,
            /// the provided `retire_fn` function will be called with the given
            /// Address to then properly reclaim the piece of memory.
            ///
            /// This function does not provide any garantue about when the
            /// memory will be reclaimed, as there is no way to predict when
            /// the memory will not be used anymore
            pub fn retire<T, F>(ptr: *mut T, retire_fn: F) -> Result<(), DomainError>
            where
                F: Fn(*mut T) + Send + 'static,
            {
                with_domain(|domain| {
                    domain
                        .retire_node(ptr as *mut (), move |raw_ptr| retire_fn(raw_ptr as *mut T));
                })
            }

            /// Forces a Reclamation attempt on the Domain-Handle of the
            /// calling Thread
            pub fn reclaim() -> Result<(), DomainError> {
                with_domain(|domain| domain.reclaim())
            }
        }
    };
}

#[cfg(not(loom))]
create_hazard_domain!(default);
#[cfg(not(loom))]
pub use default::*;

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    use std::sync::atomic;

    #[test]
    fn protect_memory() {
        let raw_ptr = Box::into_raw(Box::new(15));
        let shared_ptr = atomic::AtomicPtr::new(raw_ptr);

        let guard = protect(&shared_ptr, atomic::Ordering::SeqCst).unwrap();

        assert_eq!(15, *guard);

        retire(raw_ptr, |ptr| {
            let boxed = unsafe { Box::from_raw(ptr) };
            drop(boxed);
        })
        .unwrap();

        assert_eq!(15, *guard);

        drop(guard);

        let other_raw_ptr = Box::into_raw(Box::new(16));
        shared_ptr.store(other_raw_ptr, atomic::Ordering::SeqCst);

        retire(other_raw_ptr, |ptr| {
            let boxed = unsafe { Box::from_raw(ptr) };
            drop(boxed);
        })
        .unwrap();

        reclaim().unwrap();
    }
}
