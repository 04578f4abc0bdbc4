#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms)]
//! This crate provides a Lock-Free sorted Set, together with the
//! Memory-Reclamation schemes needed to make it safe
//!
//! # Feature-Flags
//! * `hazard_ptr`: Enables the Hazard-Ptr implementation
//! * `rcu`: Enables the Quiescent-State based RCU implementation
//! * `ordered_list`: Enables the ordered Lock-Free Linked-List
//! * `full`: Enables all the Feature-Flags

pub mod backoff;
#[cfg(feature = "hazard_ptr")]
#[cfg_attr(docsrs, doc(cfg(feature = "hazard_ptr")))]
pub mod hazard_ptr;
#[cfg(feature = "ordered_list")]
#[cfg_attr(docsrs, doc(cfg(feature = "ordered_list")))]
pub mod ordered_list;
#[cfg(feature = "rcu")]
#[cfg_attr(docsrs, doc(cfg(feature = "rcu")))]
pub mod rcu;

pub(crate) mod sync;
