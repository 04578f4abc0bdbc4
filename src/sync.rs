// The atomic primitives used by the whole crate, switched over to their
// loom counterparts when building for the loom model-checker
cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic;
    } else {
        pub(crate) use core::sync::atomic;
    }
}
