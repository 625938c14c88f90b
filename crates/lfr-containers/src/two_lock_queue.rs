//! Unbounded MPMC queue with separate head and tail locks.
//!
//! A dummy node always sits at the tail, so `push` only ever touches the
//! tail and `try_pop` only ever unlinks at the head. The two ends contend
//! on a shared lock only when `try_pop` peeks at the tail to detect an
//! empty queue.

use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Node<T> {
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

/// Raw node pointer guarded by one of the two mutexes.
struct End<T>(*mut Node<T>);

pub struct TwoLockQueue<T> {
    head: Mutex<End<T>>,
    tail: Mutex<End<T>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing below can panic while a guard is held.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> TwoLockQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        let dummy = Node::dummy();
        Self {
            head: Mutex::new(End(dummy)),
            tail: Mutex::new(End(dummy)),
        }
    }

    pub fn push(&self, value: T) {
        let new_dummy = Node::dummy();
        let mut tail = lock(&self.tail);
        // SAFETY: the tail node is only written under the tail lock, and no
        // pop unlinks it while it is the tail.
        unsafe {
            (*tail.0).value = Some(value);
            (*tail.0).next = new_dummy;
        }
        tail.0 = new_dummy;
    }

    /// Oldest value, or `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut head = lock(&self.head);
        if head.0 == self.current_tail() {
            return None;
        }
        // SAFETY: head is not the tail, so its fields were written under the
        // tail lock we just passed through, and it is now exclusively ours.
        let mut old = unsafe { Box::from_raw(head.0) };
        head.0 = old.next;
        drop(head);
        old.value.take()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let head = lock(&self.head);
        head.0 == self.current_tail()
    }

    fn current_tail(&self) -> *mut Node<T> {
        lock(&self.tail).0
    }
}

impl<T> Default for TwoLockQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: nodes are reached only under the locks.
unsafe impl<T: Send> Send for TwoLockQueue<T> {}
unsafe impl<T: Send> Sync for TwoLockQueue<T> {}

impl<T> Drop for TwoLockQueue<T> {
    fn drop(&mut self) {
        let mut current = self
            .head
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .0;
        while !current.is_null() {
            // SAFETY: &mut self.
            let node = unsafe { Box::from_raw(current) };
            current = node.next;
        }
    }
}
