//! Treiber stack reclaimed through crossbeam-epoch.
//!
//! Same push/pop as [`ReclaimingStack`](crate::ReclaimingStack); popped
//! nodes are handed to the epoch collector instead of the pop counter. Used
//! as the comparison point in benchmarks and stress tests.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned};

/// A lock-free Treiber stack with epoch-based reclamation.
pub struct EpochStack<T> {
    head: Atomic<Node<T>>,
}

struct Node<T> {
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> EpochStack<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
        }
    }

    pub fn push(&self, value: T) {
        let mut node = Owned::new(Node {
            value: ManuallyDrop::new(value),
            next: Atomic::null(),
        });

        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Relaxed, &guard);
            node.next.store(head, Ordering::Relaxed);

            match self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard)
            {
                Ok(_) => break,
                Err(e) => node = e.new,
            }
        }
    }

    pub fn pop(&self) -> Option<T> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            // SAFETY: protected by the guard.
            let head_ref = unsafe { head.as_ref() }?;
            let next = head_ref.next.load(Ordering::Relaxed, &guard);

            if self
                .head
                .compare_exchange(head, next, Ordering::Relaxed, Ordering::Relaxed, &guard)
                .is_ok()
            {
                // SAFETY: the CAS unlinked head, so this pop owns the value.
                // The node is destroyed once no guard can still see it, and
                // ManuallyDrop keeps that from dropping the value again.
                unsafe {
                    guard.defer_destroy(head);
                    return Some(ManuallyDrop::into_inner(ptr::read(&head_ref.value)));
                }
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Ordering::Acquire, &guard).is_null()
    }
}

impl<T> Default for EpochStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T: Send> Send for EpochStack<T> {}
unsafe impl<T: Send> Sync for EpochStack<T> {}

impl<T> Drop for EpochStack<T> {
    fn drop(&mut self) {
        // SAFETY: &mut self, no other thread can reach the nodes.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let mut node = current.into_owned();
                current = node.next.load(Ordering::Relaxed, guard);
                ManuallyDrop::drop(&mut node.value);
            }
        }
    }
}
