//! Single-producer single-consumer unbounded queue.
//!
//! A linked list with a dummy node at the tail. The producer fills the
//! dummy and appends a fresh one, then publishes the new tail; the consumer
//! owns the head and frees nodes as it pops. No CAS is needed because each
//! end has exactly one writer, which the split [`Producer`]/[`Consumer`]
//! handles enforce.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

struct Node<T> {
    /// `Some` once the producer has filled this node.
    value: Option<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn dummy() -> *mut Self {
        Box::into_raw(Box::new(Self {
            value: None,
            next: ptr::null_mut(),
        }))
    }
}

struct Inner<T> {
    /// Written by the consumer only.
    head: AtomicPtr<Node<T>>,
    /// Written by the producer only.
    tail: AtomicPtr<Node<T>>,
}

// SAFETY: values cross from the producer thread to the consumer thread.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: both handles are gone, the list is exclusively ours.
            let node = unsafe { Box::from_raw(current) };
            current = node.next;
        }
    }
}

/// Constructor namespace for the queue handles.
pub struct SpscQueue;

impl SpscQueue {
    /// Create an empty queue, returning its two ends.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new<T>() -> (Producer<T>, Consumer<T>) {
        let dummy = Node::dummy();
        let inner = Arc::new(Inner {
            head: AtomicPtr::new(dummy),
            tail: AtomicPtr::new(dummy),
        });
        (
            Producer {
                inner: Arc::clone(&inner),
            },
            Consumer { inner },
        )
    }
}

/// Sending end. Not `Clone`.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Producer<T> {
    pub fn push(&mut self, value: T) {
        let new_dummy = Node::dummy();
        let old_tail = self.inner.tail.load(Ordering::Relaxed);
        // SAFETY: the consumer never reads the tail node's fields until the
        // store below publishes a successor.
        unsafe {
            (*old_tail).value = Some(value);
            (*old_tail).next = new_dummy;
        }
        self.inner.tail.store(new_dummy, Ordering::Release);
    }
}

/// Receiving end. Not `Clone`.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Consumer<T> {
    /// Oldest value, or `None` if the queue is empty.
    pub fn try_pop(&mut self) -> Option<T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        if head == self.inner.tail.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: head is not the tail, so the producer published it and
        // will not touch it again.
        let mut node = unsafe { Box::from_raw(head) };
        self.inner.head.store(node.next, Ordering::Relaxed);
        node.value.take()
    }

    /// True if nothing is queued right now.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.head.load(Ordering::Relaxed) == self.inner.tail.load(Ordering::Acquire)
    }
}
