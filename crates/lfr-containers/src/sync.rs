//! Atomics and spin backoff, switched to loom's under `--cfg loom`.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

/// Backoff for CAS retry loops.
///
/// Loom cannot explore a busy loop that never yields, so under loom every
/// retry yields to the model scheduler instead of spinning.
pub(crate) struct Backoff {
    #[cfg(not(loom))]
    inner: crossbeam_utils::Backoff,
}

impl Backoff {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            #[cfg(not(loom))]
            inner: crossbeam_utils::Backoff::new(),
        }
    }

    #[inline]
    pub(crate) fn spin(&self) {
        #[cfg(loom)]
        loom::thread::yield_now();

        #[cfg(not(loom))]
        self.inner.spin();
    }
}
