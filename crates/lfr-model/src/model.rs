//! Step-level model of the pop-counting reclamation protocol.
//!
//! Each thread runs a small program of pushes and pops. Every atomic step
//! of `push`, `pop` and `try_reclaim` is one model action, so the checker
//! explores every interleaving of head CASes, counter updates and
//! retirement-list exchanges.
//!
//! Nodes are never reused: a node id is its allocation index. Freeing marks
//! the node; dereferencing a marked node sets `use_after_free`.
//!
//! Three reclamation variants share the push/pop steps:
//!
//! | Variant | After unlink | Expected |
//! |---------|--------------|----------|
//! | `Reclaiming` | counter check, defer or free | all properties hold |
//! | `FreeOnUnlink` | free at once | use-after-free reachable |
//! | `Leaking` | nothing | leak reachable |

use std::collections::{HashMap, HashSet};

use lfr_core::{
    PropertyChecker, ReclamationProperties, ReclamationPropertyChecker, StackHistory,
    StackProperties, StackPropertyChecker,
};
use stateright::{Model, Property};

/// Node identifier (allocation index).
pub type NodeId = usize;

/// What happens to a node once `pop` has unlinked it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Pop-in-progress counter plus retirement list
    Reclaiming,
    /// Free the node right after the successful CAS
    FreeOnUnlink,
    /// Never free popped nodes
    Leaking,
}

/// One operation of a thread program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelOp {
    Push(u64),
    Pop,
}

/// Bounds and shape of a model run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Values linked into the stack before any thread runs (bottom first)
    pub initial: Vec<u64>,
    /// One program per thread
    pub programs: Vec<Vec<ModelOp>>,
    pub variant: Variant,
}

impl ModelConfig {
    /// Two threads popping twice each from a three-deep stack. Reaches
    /// deferral, batch freeing and batch re-chaining.
    #[must_use]
    pub fn contended_pops(variant: Variant) -> Self {
        Self {
            initial: vec![1, 2, 3],
            programs: vec![vec![ModelOp::Pop, ModelOp::Pop], vec![ModelOp::Pop, ModelOp::Pop]],
            variant,
        }
    }

    /// One pusher racing one popper.
    #[must_use]
    pub fn push_pop_race(variant: Variant) -> Self {
        Self {
            initial: vec![1, 2, 3],
            programs: vec![vec![ModelOp::Push(100)], vec![ModelOp::Pop, ModelOp::Pop]],
            variant,
        }
    }

    /// A push-then-pop thread against a thread popping twice. The push can
    /// land between an unlink and its reclaim decision, and the pops still
    /// reach deferral, batch freeing and re-chaining.
    #[must_use]
    pub fn push_between_pops(variant: Variant) -> Self {
        Self {
            initial: vec![1, 2, 3],
            programs: vec![
                vec![ModelOp::Push(100), ModelOp::Pop],
                vec![ModelOp::Pop, ModelOp::Pop],
            ],
            variant,
        }
    }

    /// Three single-pop threads on a two-deep stack, so one of them finds
    /// it empty.
    #[must_use]
    pub fn three_poppers(variant: Variant) -> Self {
        Self {
            initial: vec![1, 2],
            programs: vec![vec![ModelOp::Pop], vec![ModelOp::Pop], vec![ModelOp::Pop]],
            variant,
        }
    }

    #[must_use]
    pub fn threads_count(&self) -> usize {
        self.programs.len()
    }
}

/// Program counter of a simulated thread. Names match the step about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pc {
    /// Between operations (or finished)
    Idle,
    PushReadHead,
    PushCas,
    PopReadHead,
    PopReadNext,
    PopCas,
    ReclaimCheck,
    TakeRetired,
    Decrement,
    FreeTaken,
    ChainTaken,
    FreeOwn,
    ChainOwn,
    DecrementAfterChain,
}

/// Model action: thread `thread` runs step `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReclaimAction {
    pub thread: usize,
    pub step: Step,
}

/// The atomic steps of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    PushAlloc(u64),
    PushReadHead,
    PushCas,
    PopEnter,
    PopReadHead,
    PopReadNext,
    PopCas,
    ReclaimCheck,
    TakeRetired,
    Decrement,
    FreeTaken,
    ChainTaken,
    FreeOwn,
    ChainOwn,
    DecrementAfterChain,
}

/// Per-node bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeState {
    pub value: u64,
    pub next: Option<NodeId>,
    /// Times this node was freed (more than one is a double free)
    pub frees: u8,
}

/// Per-thread registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadState {
    pub pc: Pc,
    /// Index of the next program operation
    pub op_index: usize,
    /// Push: the new node. Pop: the captured old head.
    pub node: Option<NodeId>,
    /// Pop: the next pointer read from `node`
    pub next: Option<NodeId>,
    /// True once the pop CAS succeeded and `node` is owned
    pub owns_node: bool,
    /// Batch captured by `TakeRetired`
    pub taken: Vec<NodeId>,
}

impl ThreadState {
    fn idle(op_index: usize) -> Self {
        Self {
            pc: Pc::Idle,
            op_index,
            node: None,
            next: None,
            owns_node: false,
            taken: Vec::new(),
        }
    }
}

/// Global model state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReclaimState {
    pub nodes: Vec<NodeState>,
    pub head: Option<NodeId>,
    pub threads_in_pop: u8,
    /// Retirement list, front first
    pub retired: Vec<NodeId>,
    pub threads: Vec<ThreadState>,
    /// Values whose push CAS succeeded
    pub pushed: Vec<u64>,
    /// Values returned by successful pops, in completion order
    pub popped: Vec<u64>,
    /// Sticky: some thread dereferenced a freed node
    pub use_after_free: bool,
    /// Sticky: a retired batch was freed
    pub batch_freed: bool,
    /// Sticky: a taken batch was put back on the retirement list
    pub batch_rechained: bool,
}

impl ReclaimState {
    /// Nodes reachable from head, top first.
    #[must_use]
    pub fn linked(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.head;
        while let Some(id) = cursor {
            if out.len() > self.nodes.len() {
                break;
            }
            out.push(id);
            cursor = self.nodes[id].next;
        }
        out
    }

    /// Unlinked nodes that are neither freed, retired nor held by a thread.
    #[must_use]
    pub fn leaked(&self) -> Vec<NodeId> {
        let linked: HashSet<NodeId> = self.linked().into_iter().collect();
        let retired: HashSet<NodeId> = self.retired.iter().copied().collect();
        let owned = self.owned_nodes();

        (0..self.nodes.len())
            .filter(|id| {
                self.nodes[*id].frees == 0
                    && !linked.contains(id)
                    && !retired.contains(id)
                    && !owned.contains(&(*id as u64))
            })
            .collect()
    }

    /// Every thread has run its whole program.
    #[must_use]
    pub fn is_finished(&self, config: &ModelConfig) -> bool {
        self.threads
            .iter()
            .zip(&config.programs)
            .all(|(t, p)| t.pc == Pc::Idle && t.op_index >= p.len())
    }

    fn free(&mut self, id: NodeId) {
        let node = &mut self.nodes[id];
        node.frees = node.frees.saturating_add(1);
    }
}

impl ReclamationProperties for ReclaimState {
    fn freed_nodes(&self) -> HashSet<u64> {
        (0..self.nodes.len())
            .filter(|id| self.nodes[*id].frees > 0)
            .map(|id| id as u64)
            .collect()
    }

    fn double_frees(&self) -> Vec<u64> {
        (0..self.nodes.len())
            .filter(|id| self.nodes[*id].frees > 1)
            .map(|id| id as u64)
            .collect()
    }

    fn thread_references(&self) -> HashMap<u64, HashSet<u64>> {
        // A captured old head is a raw reference until the CAS settles.
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t.pc, Pc::PopReadNext | Pc::PopCas))
            .filter_map(|(tid, t)| t.node.map(|n| (tid as u64, HashSet::from([n as u64]))))
            .collect()
    }

    fn retired_nodes(&self) -> HashSet<u64> {
        self.retired.iter().map(|id| *id as u64).collect()
    }

    fn owned_nodes(&self) -> HashSet<u64> {
        let mut owned = HashSet::new();
        for t in &self.threads {
            match t.pc {
                // allocated but not yet published
                Pc::PushReadHead | Pc::PushCas => {
                    if let Some(n) = t.node {
                        owned.insert(n as u64);
                    }
                }
                _ => {
                    if t.owns_node {
                        if let Some(n) = t.node {
                            owned.insert(n as u64);
                        }
                    }
                }
            }
            owned.extend(t.taken.iter().map(|id| *id as u64));
        }
        owned
    }

    fn live_nodes(&self) -> u64 {
        self.nodes.iter().filter(|n| n.frees == 0).count() as u64
    }

    fn linked_len(&self) -> u64 {
        self.linked().len() as u64
    }

    fn threads_in_pop(&self) -> u64 {
        u64::from(self.threads_in_pop)
    }
}

impl StackProperties for ReclaimState {
    fn pushed_elements(&self) -> HashSet<u64> {
        self.pushed.iter().copied().collect()
    }

    fn popped_elements(&self) -> Vec<u64> {
        self.popped.clone()
    }

    fn current_contents(&self) -> Vec<u64> {
        self.linked().into_iter().map(|id| self.nodes[id].value).collect()
    }

    fn history(&self) -> StackHistory {
        StackHistory::new()
    }
}

/// The model.
#[derive(Debug, Clone)]
pub struct ReclaimModel {
    pub config: ModelConfig,
}

impl ReclaimModel {
    #[must_use]
    pub fn new(config: ModelConfig) -> Self {
        debug_assert!(!config.programs.is_empty(), "model needs at least one thread");
        Self { config }
    }

    /// The initial state: `initial` linked bottom-first, all threads idle.
    #[must_use]
    pub fn initial_state(&self) -> ReclaimState {
        let mut nodes = Vec::with_capacity(self.config.initial.len());
        let mut head = None;
        for value in &self.config.initial {
            nodes.push(NodeState {
                value: *value,
                next: head,
                frees: 0,
            });
            head = Some(nodes.len() - 1);
        }

        ReclaimState {
            nodes,
            head,
            threads_in_pop: 0,
            retired: Vec::new(),
            threads: (0..self.config.threads_count())
                .map(|_| ThreadState::idle(0))
                .collect(),
            pushed: self.config.initial.clone(),
            popped: Vec::new(),
            use_after_free: false,
            batch_freed: false,
            batch_rechained: false,
        }
    }

    /// The step thread `tid` would run next, if it has anything left.
    #[must_use]
    pub fn next_step(&self, state: &ReclaimState, tid: usize) -> Option<Step> {
        let thread = &state.threads[tid];
        let step = match thread.pc {
            Pc::Idle => match self.config.programs[tid].get(thread.op_index)? {
                ModelOp::Push(v) => Step::PushAlloc(*v),
                ModelOp::Pop => Step::PopEnter,
            },
            Pc::PushReadHead => Step::PushReadHead,
            Pc::PushCas => Step::PushCas,
            Pc::PopReadHead => Step::PopReadHead,
            Pc::PopReadNext => Step::PopReadNext,
            Pc::PopCas => Step::PopCas,
            Pc::ReclaimCheck => Step::ReclaimCheck,
            Pc::TakeRetired => Step::TakeRetired,
            Pc::Decrement => Step::Decrement,
            Pc::FreeTaken => Step::FreeTaken,
            Pc::ChainTaken => Step::ChainTaken,
            Pc::FreeOwn => Step::FreeOwn,
            Pc::ChainOwn => Step::ChainOwn,
            Pc::DecrementAfterChain => Step::DecrementAfterChain,
        };
        Some(step)
    }

    /// Apply one step of thread `tid`.
    #[must_use]
    pub fn apply(&self, state: &ReclaimState, tid: usize) -> Option<ReclaimState> {
        let step = self.next_step(state, tid)?;
        let mut next = state.clone();
        let variant = self.config.variant;

        match step {
            Step::PushAlloc(value) => {
                next.nodes.push(NodeState {
                    value,
                    next: None,
                    frees: 0,
                });
                let t = &mut next.threads[tid];
                t.node = Some(next.nodes.len() - 1);
                t.pc = Pc::PushReadHead;
            }
            Step::PushReadHead => {
                let node = next.threads[tid].node?;
                next.nodes[node].next = next.head;
                next.threads[tid].pc = Pc::PushCas;
            }
            Step::PushCas => {
                let node = next.threads[tid].node?;
                if next.head == next.nodes[node].next {
                    next.head = Some(node);
                    next.pushed.push(next.nodes[node].value);
                    finish_op(&mut next, tid);
                } else {
                    next.threads[tid].pc = Pc::PushReadHead;
                }
            }
            Step::PopEnter => {
                if variant == Variant::Reclaiming {
                    next.threads_in_pop += 1;
                }
                next.threads[tid].pc = Pc::PopReadHead;
            }
            Step::PopReadHead => match next.head {
                Some(old) => {
                    let t = &mut next.threads[tid];
                    t.node = Some(old);
                    t.pc = Pc::PopReadNext;
                }
                None => {
                    let t = &mut next.threads[tid];
                    t.node = None;
                    // An empty pop still takes part in reclamation.
                    if variant == Variant::Reclaiming {
                        t.pc = Pc::ReclaimCheck;
                    } else {
                        finish_op(&mut next, tid);
                    }
                }
            },
            Step::PopReadNext => {
                let old = next.threads[tid].node?;
                if next.nodes[old].frees > 0 {
                    next.use_after_free = true;
                }
                let link = next.nodes[old].next;
                let t = &mut next.threads[tid];
                t.next = link;
                t.pc = Pc::PopCas;
            }
            Step::PopCas => {
                let old = next.threads[tid].node?;
                if next.head == Some(old) {
                    next.head = next.threads[tid].next;
                    next.popped.push(next.nodes[old].value);
                    let t = &mut next.threads[tid];
                    t.owns_node = true;
                    match variant {
                        Variant::Reclaiming => t.pc = Pc::ReclaimCheck,
                        Variant::FreeOnUnlink => t.pc = Pc::FreeOwn,
                        Variant::Leaking => finish_op(&mut next, tid),
                    }
                } else {
                    next.threads[tid].pc = Pc::PopReadHead;
                }
            }
            Step::ReclaimCheck => {
                let t = &mut next.threads[tid];
                t.pc = if next.threads_in_pop == 1 {
                    Pc::TakeRetired
                } else if t.owns_node {
                    Pc::ChainOwn
                } else {
                    Pc::DecrementAfterChain
                };
            }
            Step::TakeRetired => {
                let taken = std::mem::take(&mut next.retired);
                let t = &mut next.threads[tid];
                t.taken = taken;
                t.pc = Pc::Decrement;
            }
            Step::Decrement => {
                next.threads_in_pop = next.threads_in_pop.checked_sub(1)?;
                let last_out = next.threads_in_pop == 0;
                let t = &mut next.threads[tid];
                if last_out {
                    t.pc = Pc::FreeTaken;
                } else if !t.taken.is_empty() {
                    t.pc = Pc::ChainTaken;
                } else {
                    after_batch(&mut next, tid);
                }
            }
            Step::FreeTaken => {
                let taken = std::mem::take(&mut next.threads[tid].taken);
                if !taken.is_empty() {
                    next.batch_freed = true;
                }
                for id in taken {
                    next.free(id);
                }
                after_batch(&mut next, tid);
            }
            Step::ChainTaken => {
                let mut taken = std::mem::take(&mut next.threads[tid].taken);
                taken.append(&mut next.retired);
                next.retired = taken;
                next.batch_rechained = true;
                after_batch(&mut next, tid);
            }
            Step::FreeOwn => {
                let own = next.threads[tid].node?;
                next.free(own);
                finish_op(&mut next, tid);
            }
            Step::ChainOwn => {
                let own = next.threads[tid].node?;
                next.retired.insert(0, own);
                let t = &mut next.threads[tid];
                t.owns_node = false;
                t.node = None;
                t.pc = Pc::DecrementAfterChain;
            }
            Step::DecrementAfterChain => {
                next.threads_in_pop = next.threads_in_pop.checked_sub(1)?;
                finish_op(&mut next, tid);
            }
        }

        Some(next)
    }
}

/// After the taken batch is dealt with, free the own node if there is one.
fn after_batch(state: &mut ReclaimState, tid: usize) {
    if state.threads[tid].owns_node {
        state.threads[tid].pc = Pc::FreeOwn;
    } else {
        finish_op(state, tid);
    }
}

fn finish_op(state: &mut ReclaimState, tid: usize) {
    let op_index = state.threads[tid].op_index + 1;
    state.threads[tid] = ThreadState::idle(op_index);
}

impl Model for ReclaimModel {
    type State = ReclaimState;
    type Action = ReclaimAction;

    fn init_states(&self) -> Vec<Self::State> {
        vec![self.initial_state()]
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        for thread in 0..state.threads.len() {
            if let Some(step) = self.next_step(state, thread) {
                actions.push(ReclaimAction { thread, step });
            }
        }
    }

    fn next_state(&self, last_state: &Self::State, action: Self::Action) -> Option<Self::State> {
        self.apply(last_state, action.thread)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            Property::always("no use after free", |_, state: &ReclaimState| {
                !state.use_after_free
            }),
            Property::always("no double free", |_, state: &ReclaimState| {
                state.double_frees().is_empty()
            }),
            Property::always("no leak", |_, state: &ReclaimState| state.leaked().is_empty()),
            Property::always("reclamation invariants", |_, state: &ReclaimState| {
                ReclamationPropertyChecker::new(state).all_hold()
            }),
            Property::always("stack invariants", |_, state: &ReclaimState| {
                StackPropertyChecker::new(state).all_hold()
            }),
            Property::always(
                "counter balanced when finished",
                |model: &ReclaimModel, state: &ReclaimState| {
                    !state.is_finished(&model.config) || state.threads_in_pop == 0
                },
            ),
            Property::sometimes("retired batch freed", |_, state: &ReclaimState| {
                state.batch_freed
            }),
            Property::sometimes("taken batch re-chained", |_, state: &ReclaimState| {
                state.batch_rechained
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(model: &ReclaimModel, schedule: &[usize]) -> ReclaimState {
        let mut state = model.initial_state();
        for tid in schedule {
            state = model.apply(&state, *tid).unwrap();
        }
        state
    }

    #[test]
    fn test_initial_state() {
        let model = ReclaimModel::new(ModelConfig::contended_pops(Variant::Reclaiming));
        let state = model.initial_state();

        assert_eq!(state.current_contents(), vec![3, 2, 1]);
        assert_eq!(state.live_nodes(), 3);
        assert!(state.leaked().is_empty());
        assert!(ReclamationPropertyChecker::new(&state).all_hold());
    }

    #[test]
    fn test_solo_pop_frees_immediately() {
        let model = ReclaimModel::new(ModelConfig::contended_pops(Variant::Reclaiming));
        // enter, read head, read next, cas, check, take, decrement, free taken, free own
        let state = run(&model, &[0; 9]);

        assert_eq!(state.popped, vec![3]);
        assert_eq!(state.threads[0].pc, Pc::Idle);
        assert_eq!(state.threads_in_pop, 0);
        assert_eq!(state.freed_nodes(), HashSet::from([2]));
        assert!(state.retired.is_empty());
    }

    #[test]
    fn test_concurrent_pop_defers_node() {
        let model = ReclaimModel::new(ModelConfig::contended_pops(Variant::Reclaiming));
        // T0 enters and captures N2; T1 pops N2 completely.
        let state = run(&model, &[0, 0, 1, 1, 1, 1, 1, 1, 1]);

        assert_eq!(state.retired, vec![2]);
        assert_eq!(state.threads_in_pop, 1);
        assert!(state.freed_nodes().is_empty());

        // T0 dereferences the retired node safely.
        let state = model.apply(&state, 0).unwrap();
        assert!(!state.use_after_free);
        assert!(ReclamationPropertyChecker::new(&state).all_hold());
    }

    #[test]
    fn test_free_on_unlink_reaches_use_after_free() {
        let model = ReclaimModel::new(ModelConfig::contended_pops(Variant::FreeOnUnlink));
        // T0 captures N2; T1 enters, reads, reads next, cas, frees; T0 reads next.
        let state = run(&model, &[0, 0, 1, 1, 1, 1, 1, 0]);
        assert!(state.use_after_free);
    }

    #[test]
    fn test_leaking_variant_leaks() {
        let model = ReclaimModel::new(ModelConfig::contended_pops(Variant::Leaking));
        let state = run(&model, &[0, 0, 0, 0]);

        assert_eq!(state.popped, vec![3]);
        assert_eq!(state.leaked(), vec![2]);
        let failed: Vec<String> = ReclamationPropertyChecker::new(&state)
            .violations()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(failed, vec!["NodeAccounting".to_string()]);
    }

    #[test]
    fn test_empty_pop_balances_counter() {
        let model = ReclaimModel::new(ModelConfig {
            initial: Vec::new(),
            programs: vec![vec![ModelOp::Pop]],
            variant: Variant::Reclaiming,
        });
        // enter, read head (empty), check, take, decrement, free taken
        let state = run(&model, &[0; 6]);

        assert!(state.popped.is_empty());
        assert_eq!(state.threads_in_pop, 0);
        assert!(state.is_finished(&model.config));
        assert!(model.next_step(&state, 0).is_none());
    }
}
