//! Kani harnesses for sequential behavior of [`ReclaimingStack`].
//!
//! ```bash
//! cargo kani -p lfr-containers
//! cargo kani -p lfr-containers --harness proof_solo_pops_never_retire
//! ```
//!
//! Kani runs one thread, so every pop here is a solo pop. Interleavings
//! are covered by loom and the stateright model.
//!
//! [`ReclaimingStack`]: crate::ReclaimingStack

#[cfg(kani)]
mod proofs {
    use crate::reclaiming_stack::ReclaimingStack;

    #[kani::proof]
    #[kani::unwind(5)]
    fn proof_pop_returns_pushed_value() {
        let stack = ReclaimingStack::new();
        let value: u64 = kani::any();

        stack.push(value);
        kani::assert(stack.pop() == Some(value), "pop returns the pushed value");
        kani::assert(stack.is_empty(), "stack is empty again");
    }

    #[kani::proof]
    #[kani::unwind(4)]
    fn proof_lifo_order() {
        let stack = ReclaimingStack::new();
        let v1: u64 = kani::any();
        let v2: u64 = kani::any();

        stack.push(v1);
        stack.push(v2);

        kani::assert(stack.pop() == Some(v2), "last pushed pops first");
        kani::assert(stack.pop() == Some(v1), "first pushed pops last");
        kani::assert(stack.pop().is_none(), "then empty");
    }

    #[kani::proof]
    fn proof_empty_pop_balances_counter() {
        let stack: ReclaimingStack<u64> = ReclaimingStack::new();
        kani::assert(stack.pop().is_none(), "empty pop returns None");
        kani::assert(stack.threads_in_pop() == 0, "counter back to zero");
        kani::assert(stack.retired_len() == 0, "nothing retired");
    }

    /// Any push/pop sequence on one thread frees each popped node at once.
    #[kani::proof]
    #[kani::unwind(6)]
    fn proof_solo_pops_never_retire() {
        let stack = ReclaimingStack::new();
        let mut pushed = 0_u64;

        for _ in 0..4_u8 {
            if kani::any() {
                pushed += 1;
                stack.push(pushed);
            } else {
                stack.pop();
            }
        }

        let stats = stack.stats();
        kani::assert(stats.nodes_retired == 0, "no node was deferred");
        kani::assert(stats.nodes_freed == stats.pops, "every popped node freed");
        kani::assert(
            stats.live_nodes() == stack.len() as u64,
            "live nodes are exactly the linked ones",
        );
        kani::assert(stats.pops <= pushed, "never pops more than pushed");
    }
}
