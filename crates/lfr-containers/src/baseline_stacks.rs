//! Baseline stacks that get reclamation wrong in opposite directions.
//!
//! Both share the Treiber push/pop of [`ReclaimingStack`](crate::ReclaimingStack)
//! and differ only in what happens to a node after its pop CAS succeeds.
//!
//! # Catalog
//!
//! | Implementation | Behavior | Caught By |
//! |----------------|----------|-----------|
//! | LeakingStack | Never frees popped nodes | model ("no leak"), `leaked_nodes` |
//! | ImmediateFreeStack | Frees on unlink | model ("no use after free"), Miri |
//!
//! `ImmediateFreeStack::pop` is memory-safe only without concurrent pops,
//! which is why it is an `unsafe fn`.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::Backoff;

struct Node<T> {
    value: ManuallyDrop<T>,
    next: AtomicPtr<Node<T>>,
}

/// Shared Treiber core: link/unlink only, no reclamation.
struct RawStack<T> {
    head: AtomicPtr<Node<T>>,
}

impl<T> RawStack<T> {
    fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: ManuallyDrop::new(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }));

        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: unpublished node.
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
    }

    /// Unlink the top node and move its payload out. The node itself is
    /// returned still allocated.
    ///
    /// # Safety
    ///
    /// Every node this may read must still be allocated.
    unsafe fn unlink(&self) -> Option<(*mut Node<T>, T)> {
        let backoff = Backoff::new();
        let mut old = self.head.load(Ordering::Acquire);
        while !old.is_null() {
            let next = (*old).next.load(Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(old, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => {
                    let value = ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*old).value)));
                    return Some((old, value));
                }
                Err(current) => {
                    old = current;
                    backoff.spin();
                }
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for RawStack<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: &mut self; linked nodes own their payload.
            unsafe {
                let mut node = Box::from_raw(current);
                current = *node.next.get_mut();
                ManuallyDrop::drop(&mut node.value);
            }
        }
    }
}

// =============================================================================
// Leaking
// =============================================================================

/// Stack that never frees a popped node.
///
/// Memory-safe under any concurrency, at the price of one node per pop.
pub struct LeakingStack<T> {
    inner: RawStack<T>,
    leaked: AtomicU64,
}

impl<T> LeakingStack<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RawStack::new(),
            leaked: AtomicU64::new(0),
        }
    }

    pub fn push(&self, value: T) {
        self.inner.push(value);
    }

    pub fn pop(&self) -> Option<T> {
        // SAFETY: nodes are never freed while the stack is alive.
        let (_node, value) = unsafe { self.inner.unlink() }?;
        self.leaked.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Nodes unlinked and never returned to the allocator.
    #[must_use]
    pub fn leaked_nodes(&self) -> u64 {
        self.leaked.load(Ordering::Relaxed)
    }
}

impl<T> Default for LeakingStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T: Send> Send for LeakingStack<T> {}
unsafe impl<T: Send> Sync for LeakingStack<T> {}

// =============================================================================
// Free on unlink
// =============================================================================

/// Stack that frees a node as soon as its pop CAS succeeds.
///
/// A concurrent pop that read the same head before the CAS then reads
/// `next` out of freed memory.
pub struct ImmediateFreeStack<T> {
    inner: RawStack<T>,
}

impl<T> ImmediateFreeStack<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RawStack::new(),
        }
    }

    pub fn push(&self, value: T) {
        self.inner.push(value);
    }

    /// # Safety
    ///
    /// No other `pop` on this stack may run concurrently. Concurrent pushes
    /// are fine.
    pub unsafe fn pop(&self) -> Option<T> {
        let (node, value) = self.inner.unlink()?;
        // BUG under concurrent pops: another pop may still hold `node`.
        drop(Box::from_raw(node));
        Some(value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> Default for ImmediateFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T: Send> Send for ImmediateFreeStack<T> {}
unsafe impl<T: Send> Sync for ImmediateFreeStack<T> {}
