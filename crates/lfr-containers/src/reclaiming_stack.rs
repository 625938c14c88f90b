//! Lock-free stack with pop-counting deferred reclamation.
//!
//! # Protocol
//!
//! Every `pop` increments `threads_in_pop` before touching the head and
//! decrements it on the way out. A node unlinked by a pop is freed at once
//! only when the popping thread is the sole pop in progress; otherwise it
//! is pushed onto a lock-free retirement list. A thread that finds itself
//! alone takes the whole retirement list, then decrements the counter. If
//! the counter is now zero nobody can still hold a pointer into the taken
//! batch and it is freed; if another pop slipped in between the take and
//! the decrement the batch goes back onto the retirement list.
//!
//! # Invariants
//!
//! | Property | Verified By |
//! |----------|-------------|
//! | NoUseAfterFree | model, loom, stress with allocator poisoning |
//! | NoDoubleFree | model, loom |
//! | NoLostElements | DST, proptest, stress |
//! | NoDuplicates | DST, stress |
//! | LIFO_Order | DST, proptest |
//! | QuiescentDrain | model, stress |
//!
//! # Known limitation
//!
//! Under sustained contention the counter may never read one, and the
//! retirement list grows without bound. The length is tracked in
//! [`StackStats::retired_len`] and logged when it crosses
//! [`StackConfig::retired_warn_threshold`].

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::AtomicU64;

use crossbeam_utils::CachePadded;
use serde::Serialize;
use tracing::{trace, warn};

use crate::sync::{fence, AtomicPtr, AtomicUsize, Backoff, Ordering};

/// Retirement list length at which growth starts being logged.
pub const RETIRED_WARN_THRESHOLD_DEFAULT: usize = 1024;

/// Tunables for [`ReclaimingStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackConfig {
    /// Log a warning each time the retirement list reaches a power of two
    /// at or above this length.
    pub retired_warn_threshold: usize,
}

impl StackConfig {
    #[must_use]
    pub fn with_retired_warn_threshold(mut self, threshold: usize) -> Self {
        self.retired_warn_threshold = threshold.max(1);
        self
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            retired_warn_threshold: RETIRED_WARN_THRESHOLD_DEFAULT,
        }
    }
}

/// Point-in-time counters. Each field is read with relaxed ordering, so a
/// snapshot taken under concurrency is only approximately consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StackStats {
    pub pushes: u64,
    /// Pops that returned a value
    pub pops: u64,
    pub empty_pops: u64,
    pub nodes_allocated: u64,
    pub nodes_freed: u64,
    /// Nodes ever placed on the retirement list
    pub nodes_retired: u64,
    /// Nodes on the retirement list right now
    pub retired_len: u64,
    /// Taken batches that had to go back on the retirement list
    pub rechained_batches: u64,
}

impl StackStats {
    /// Nodes allocated and not yet freed.
    #[must_use]
    pub fn live_nodes(&self) -> u64 {
        self.nodes_allocated.saturating_sub(self.nodes_freed)
    }
}

#[derive(Default)]
struct Counters {
    pushes: AtomicU64,
    pops: AtomicU64,
    empty_pops: AtomicU64,
    allocated: AtomicU64,
    freed: AtomicU64,
    retired: AtomicU64,
    retired_len: AtomicU64,
    rechained: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64, n: u64) -> u64 {
        counter.fetch_add(n, std::sync::atomic::Ordering::Relaxed) + n
    }

    #[inline]
    fn drop_by(counter: &AtomicU64, n: u64) {
        counter.fetch_sub(n, std::sync::atomic::Ordering::Relaxed);
    }

    fn snapshot(&self) -> StackStats {
        let load = |c: &AtomicU64| c.load(std::sync::atomic::Ordering::Relaxed);
        StackStats {
            pushes: load(&self.pushes),
            pops: load(&self.pops),
            empty_pops: load(&self.empty_pops),
            nodes_allocated: load(&self.allocated),
            nodes_freed: load(&self.freed),
            nodes_retired: load(&self.retired),
            retired_len: load(&self.retired_len),
            rechained_batches: load(&self.rechained),
        }
    }
}

/// A lock-free LIFO stack that reclaims popped nodes without epochs or
/// hazard pointers.
///
/// `push` and `pop` are lock-free. Reclamation itself is opportunistic:
/// memory is returned once pops stop overlapping.
pub struct ReclaimingStack<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    threads_in_pop: CachePadded<AtomicUsize>,
    to_be_deleted: CachePadded<AtomicPtr<Node<T>>>,
    config: StackConfig,
    counters: Counters,
}

struct Node<T> {
    /// Moved out by the pop that unlinks the node. Never dropped through
    /// the node after that.
    value: ManuallyDrop<T>,
    /// Written before publication and again when the node is chained onto
    /// the retirement list, while stale poppers may still be reading it.
    next: AtomicPtr<Node<T>>,
}

impl<T> ReclaimingStack<T> {
    /// Create an empty stack with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StackConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StackConfig) -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            threads_in_pop: CachePadded::new(AtomicUsize::new(0)),
            to_be_deleted: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Push `value` on top.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: ManuallyDrop::new(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        Counters::bump(&self.counters.allocated, 1);

        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: node is not yet published, this thread owns it.
            unsafe { (*node).next.store(head, Ordering::Relaxed) };

            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => {
                    head = current;
                    backoff.spin();
                }
            }
        }
        Counters::bump(&self.counters.pushes, 1);
    }

    /// Pop the top value, or `None` if the stack is empty.
    ///
    /// An empty pop still takes part in reclamation: a solo empty pop frees
    /// whatever is left on the retirement list.
    pub fn pop(&self) -> Option<T> {
        self.threads_in_pop.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in try_reclaim: either that pop sees this
        // registration or this load sees its unlink.
        fence(Ordering::SeqCst);

        let backoff = Backoff::new();
        let mut old = self.head.load(Ordering::Acquire);
        while !old.is_null() {
            // SAFETY: old was read from head while this thread is counted in
            // threads_in_pop. No node unlinked after that point is freed
            // before this pop decrements the counter.
            let next = unsafe { (*old).next.load(Ordering::Relaxed) };

            match self
                .head
                .compare_exchange_weak(old, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => {
                    old = current;
                    backoff.spin();
                }
            }
        }

        let value = if old.is_null() {
            Counters::bump(&self.counters.empty_pops, 1);
            None
        } else {
            Counters::bump(&self.counters.pops, 1);
            // SAFETY: the CAS unlinked old, so this thread is the only one
            // that moves its payload out. Stale readers only touch `next`.
            Some(unsafe { ManuallyDrop::into_inner(ptr::read(ptr::addr_of!((*old).value))) })
        };

        self.try_reclaim(old);
        value
    }

    /// True if no node is linked. Racy under concurrency.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Linked element count derived from the counters. Exact only while no
    /// operation is in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        let stats = self.stats();
        stats.pushes.saturating_sub(stats.pops) as usize
    }

    /// Nodes currently on the retirement list.
    #[must_use]
    pub fn retired_len(&self) -> usize {
        self.counters
            .retired_len
            .load(std::sync::atomic::Ordering::Relaxed) as usize
    }

    /// Current value of the pop counter.
    #[must_use]
    pub fn threads_in_pop(&self) -> usize {
        self.threads_in_pop.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> StackStats {
        self.counters.snapshot()
    }

    /// Decide what happens to `old` (null for an empty pop) and leave the
    /// pop.
    fn try_reclaim(&self, old: *mut Node<T>) {
        // Orders the unlinking CAS before the counter load.
        fence(Ordering::SeqCst);
        if self.threads_in_pop.load(Ordering::SeqCst) == 1 {
            let taken = self.to_be_deleted.swap(ptr::null_mut(), Ordering::AcqRel);
            // SAFETY: the swap hands the whole list to this thread.
            let (taken_last, taken_len) = unsafe { list_tail(taken) };
            if taken_len > 0 {
                Counters::drop_by(&self.counters.retired_len, taken_len);
            }

            if self.threads_in_pop.fetch_sub(1, Ordering::SeqCst) == 1 {
                // SAFETY: the counter reached zero after the take. Every pop
                // that could have read a node in the batch has left.
                unsafe { self.free_list(taken) };
            } else if !taken.is_null() {
                trace!(nodes = taken_len, "pop overlapped take, re-chaining batch");
                Counters::bump(&self.counters.rechained, 1);
                // SAFETY: the batch is exclusively owned after the swap.
                unsafe { self.chain_pending_nodes(taken, taken_last, taken_len) };
            }

            if !old.is_null() {
                // SAFETY: only pops that started before our CAS could have
                // read old, and the counter said we were alone.
                unsafe { self.free_node(old) };
            }
        } else {
            if !old.is_null() {
                // SAFETY: old was unlinked by this thread and is not yet on
                // any list.
                unsafe { self.chain_pending_node(old) };
            }
            self.threads_in_pop.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Retire one node.
    unsafe fn chain_pending_node(&self, node: *mut Node<T>) {
        // next still points into the stack from the push
        self.chain_pending_nodes(node, node, 1);
        Counters::bump(&self.counters.retired, 1);
        trace!("pop overlapped, node retired");
    }

    /// Put an exclusively owned run `first..=last` of `len` nodes on the
    /// retirement list.
    unsafe fn chain_pending_nodes(&self, first: *mut Node<T>, last: *mut Node<T>, len: u64) {
        // Counted before publishing, so a concurrent take never drives the
        // length below zero.
        let retired_len = Counters::bump(&self.counters.retired_len, len);
        self.warn_on_growth(retired_len);

        let backoff = Backoff::new();
        let mut current = self.to_be_deleted.load(Ordering::Relaxed);
        loop {
            (*last).next.store(current, Ordering::Relaxed);
            match self.to_be_deleted.compare_exchange_weak(
                current,
                first,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    fn warn_on_growth(&self, retired_len: u64) {
        let threshold = self.config.retired_warn_threshold as u64;
        if retired_len >= threshold && retired_len.is_power_of_two() {
            warn!(retired_len, threshold, "retirement list keeps growing under contention");
        }
    }

    /// Free a node whose payload has been moved out.
    unsafe fn free_node(&self, node: *mut Node<T>) {
        drop(Box::from_raw(node));
        Counters::bump(&self.counters.freed, 1);
    }

    unsafe fn free_list(&self, mut node: *mut Node<T>) {
        let mut freed = 0_u64;
        while !node.is_null() {
            let next = (*node).next.load(Ordering::Relaxed);
            self.free_node(node);
            node = next;
            freed += 1;
        }
        if freed > 0 {
            trace!(nodes = freed, "freed retired batch");
        }
    }
}

impl<T: Copy> ReclaimingStack<T> {
    /// Copy of the linked values, top to bottom.
    ///
    /// The walk registers as a pop without unlinking anything, so nodes it
    /// reaches stay allocated until it leaves. Under concurrency the result
    /// is a mix of states, not a linearizable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.threads_in_pop.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let mut values = Vec::new();
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            // SAFETY: registered in threads_in_pop, see `pop`. T is Copy, so
            // reading a payload a racing pop also reads is only a copy.
            unsafe {
                values.push(ptr::read(ptr::addr_of!((*current).value).cast::<T>()));
                current = (*current).next.load(Ordering::Acquire);
            }
        }

        self.try_reclaim(ptr::null_mut());
        values
    }
}

/// Last node and length of an exclusively owned list.
unsafe fn list_tail<T>(first: *mut Node<T>) -> (*mut Node<T>, u64) {
    if first.is_null() {
        return (first, 0);
    }
    let mut last = first;
    let mut len = 1;
    loop {
        let next = (*last).next.load(Ordering::Relaxed);
        if next.is_null() {
            return (last, len);
        }
        last = next;
        len += 1;
    }
}

impl<T> Default for ReclaimingStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ReclaimingStack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimingStack")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

// SAFETY: values move between threads through push and pop; nodes are only
// shared through atomics.
unsafe impl<T: Send> Send for ReclaimingStack<T> {}
unsafe impl<T: Send> Sync for ReclaimingStack<T> {}

impl<T> Drop for ReclaimingStack<T> {
    fn drop(&mut self) {
        // Linked nodes still own their payload.
        let mut current = self.head.load(Ordering::Relaxed);
        while !current.is_null() {
            // SAFETY: &mut self, no pop is in flight.
            unsafe {
                let mut node = Box::from_raw(current);
                current = node.next.load(Ordering::Relaxed);
                ManuallyDrop::drop(&mut node.value);
            }
        }

        // Retired nodes had their payload moved out by the pop.
        let retired = self.to_be_deleted.load(Ordering::Relaxed);
        // SAFETY: &mut self, nothing can still reference a retired node.
        unsafe { self.free_list(retired) };
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    struct DropCounter(Arc<StdAtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, StdOrdering::SeqCst);
        }
    }

    #[test]
    fn test_basic_push_pop() {
        let stack = ReclaimingStack::new();

        stack.push(1);
        stack.push(2);
        stack.push(3);

        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_solo_pops_free_immediately() {
        let stack = ReclaimingStack::new();
        for i in 0..10 {
            stack.push(i);
        }
        while stack.pop().is_some() {}

        let stats = stack.stats();
        assert_eq!(stats.nodes_allocated, 10);
        assert_eq!(stats.nodes_freed, 10);
        assert_eq!(stats.nodes_retired, 0);
        assert_eq!(stats.live_nodes(), 0);
        assert_eq!(stats.empty_pops, 1);
    }

    #[test]
    fn test_empty_pop_leaves_counter_balanced() {
        let stack: ReclaimingStack<u64> = ReclaimingStack::new();
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.pop(), None);
        assert_eq!(stack.threads_in_pop.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retired_nodes_drained_by_solo_pop() {
        let stack = ReclaimingStack::new();
        for i in 0..4 {
            stack.push(i);
        }

        // Pretend another pop is in flight.
        stack.threads_in_pop.fetch_add(1, Ordering::SeqCst);
        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.retired_len(), 2);
        assert_eq!(stack.stats().nodes_retired, 2);
        stack.threads_in_pop.fetch_sub(1, Ordering::SeqCst);

        // Alone again: the next pop frees its own node and the batch.
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.retired_len(), 0);
        let stats = stack.stats();
        assert_eq!(stats.live_nodes(), 1);
        assert_eq!(stats.live_nodes(), stack.len() as u64);
    }

    #[test]
    fn test_snapshot_top_to_bottom() {
        let stack = ReclaimingStack::new();
        stack.push(1_u64);
        stack.push(2);
        stack.push(3);

        assert_eq!(stack.snapshot(), vec![3, 2, 1]);
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.threads_in_pop.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_payload_dropped_exactly_once() {
        let drops = Arc::new(StdAtomicUsize::new(0));
        {
            let stack = ReclaimingStack::new();
            for _ in 0..5 {
                stack.push(DropCounter(Arc::clone(&drops)));
            }
            // popped payloads drop here, at the caller
            drop(stack.pop());
            drop(stack.pop());
            assert_eq!(drops.load(StdOrdering::SeqCst), 2);
        }
        // the three still linked drop with the stack
        assert_eq!(drops.load(StdOrdering::SeqCst), 5);
    }

    #[test]
    fn test_drop_with_retired_nodes_does_not_drop_payload_twice() {
        let drops = Arc::new(StdAtomicUsize::new(0));
        {
            let stack = ReclaimingStack::new();
            for _ in 0..3 {
                stack.push(DropCounter(Arc::clone(&drops)));
            }
            stack.threads_in_pop.fetch_add(1, Ordering::SeqCst);
            drop(stack.pop());
            stack.threads_in_pop.fetch_sub(1, Ordering::SeqCst);
            assert_eq!(stack.retired_len(), 1);
            assert_eq!(drops.load(StdOrdering::SeqCst), 1);
        }
        assert_eq!(drops.load(StdOrdering::SeqCst), 3);
    }

    #[test]
    fn test_concurrent_push_pop_conserves_elements() {
        const THREADS: usize = 4;
        const PER_THREAD: u64 = 2_000;

        let stack = Arc::new(ReclaimingStack::new());
        let barrier = Arc::new(Barrier::new(THREADS * 2));
        let mut handles = Vec::new();

        for t in 0..THREADS as u64 {
            let stack = Arc::clone(&stack);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    stack.push(t * PER_THREAD + i);
                }
                Vec::new()
            }));
        }
        for _ in 0..THREADS {
            let stack = Arc::clone(&stack);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut got = Vec::new();
                for _ in 0..PER_THREAD {
                    if let Some(v) = stack.pop() {
                        got.push(v);
                    }
                }
                got
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        while let Some(v) = stack.pop() {
            all.push(v);
        }
        all.sort_unstable();

        let expected: Vec<u64> = (0..THREADS as u64 * PER_THREAD).collect();
        assert_eq!(all, expected);

        // the final solo pop was empty and drained the retirement list
        let stats = stack.stats();
        assert_eq!(stack.retired_len(), 0);
        assert_eq!(stats.live_nodes(), 0);
    }

    #[test]
    fn test_config_threshold_floor() {
        let config = StackConfig::default().with_retired_warn_threshold(0);
        assert_eq!(config.retired_warn_threshold, 1);
        let stack: ReclaimingStack<u8> = ReclaimingStack::with_config(config);
        assert_eq!(stack.config().retired_warn_threshold, 1);
    }
}
