//! DST runs against the real reclaiming stack.
//!
//! Simulated threads take turns at operation granularity, so the recorded
//! history is a valid linearization and every checker applies, LIFO
//! included. Reproduce a failure with `DST_SEED=<seed>`.
#![cfg(not(loom))]

use lfr_containers::TrackedStack;
use lfr_core::{PropertyChecker, StackPropertyChecker};
use lfr_dst::{
    get_or_generate_seed, random_ops, run_dst_scenario, DeterministicRng, DstHarness, DstOp,
    DstRunner, FaultConfig, HarnessConfig,
};

fn check(stack: &TrackedStack, seed: u64) -> Result<(), String> {
    let stack_checker = StackPropertyChecker::new(stack).with_seed(seed);
    let violations = stack_checker.violations();
    if !violations.is_empty() {
        return Err(format!("{:?}", violations));
    }
    // node ids are not observable here, so only the counter checks apply
    let violations = stack.counted_reclamation_violations();
    if !violations.is_empty() {
        return Err(format!("DST_SEED={} {:?}", seed, violations));
    }
    Ok(())
}

#[test]
fn test_harness_concurrent_invariants() {
    let seed = get_or_generate_seed();
    let config = HarnessConfig::from_env().unwrap_or_default();
    let mut harness = DstHarness::new(seed, config);
    let stack = TrackedStack::new();

    let result = harness.run_concurrent(
        |env, thread, step| {
            if env.rng().gen_bool(0.55) {
                Some(DstOp::Push((thread as u64) << 32 | (step + 1)))
            } else {
                Some(DstOp::Pop)
            }
        },
        |_, thread, op| {
            match op {
                DstOp::Push(v) => stack.push_from(thread as u64, v),
                DstOp::Pop => {
                    stack.pop_from(thread as u64);
                }
            }
            Ok(())
        },
        || check(&stack, seed),
    );

    println!("{}", result.format());
    assert!(result.all_invariants_held, "{}", result.format());
    assert_eq!(stack.inner().retired_len(), 0);
}

#[test]
fn test_harness_quick_and_stress_presets() {
    let seed = get_or_generate_seed();
    for config in [HarnessConfig::quick(), HarnessConfig::stress()] {
        let mut harness = DstHarness::new(seed, config);
        let stack = TrackedStack::new();
        let mut next = 1_u64;

        let result = harness.run_concurrent(
            |env, _, _| {
                if env.rng().gen_bool(0.5) {
                    next += 1;
                    Some(DstOp::Push(next))
                } else {
                    Some(DstOp::Pop)
                }
            },
            |_, thread, op| {
                match op {
                    DstOp::Push(v) => stack.push_from(thread as u64, v),
                    DstOp::Pop => {
                        stack.pop_from(thread as u64);
                    }
                }
                Ok(())
            },
            || check(&stack, seed),
        );
        assert!(result.all_invariants_held, "{}", result.format());
    }
}

#[test]
fn test_runner_with_faults() {
    let seed = get_or_generate_seed();
    let mut runner: DstRunner<TrackedStack> =
        DstRunner::with_fault_config(seed, FaultConfig::aggressive());
    let mut rng = DeterministicRng::new(seed);

    for op in random_ops(&mut rng, 2_000) {
        // faults are expected; the invariants must hold regardless
        let _ = match op {
            DstOp::Push(v) => runner.push(v),
            DstOp::Pop => runner.pop().map(|_| ()),
        };
    }

    let stats = runner.stats();
    println!("DST_SEED={} {}", seed, stats.format());
    assert!(runner.check_no_lost_elements(), "DST_SEED={}", seed);
    assert!(runner.check_no_duplicates(), "DST_SEED={}", seed);
    assert!(runner.check_pops_unique(), "DST_SEED={}", seed);
    assert_eq!(stats.retired_len_max, 0, "solo pops never defer");
}

#[test]
fn test_scenarios_many_seeds() {
    let base = get_or_generate_seed();
    for i in 0..50 {
        let seed = base.wrapping_add(i).max(1);
        let mut rng = DeterministicRng::new(seed);
        let result = run_dst_scenario::<TrackedStack>(seed, random_ops(&mut rng, 500));
        assert!(result.passed, "DST_SEED={} {}", seed, result.format());
    }
}

#[test]
fn test_quiesce_after_threaded_run() {
    let mut stack = TrackedStack::new();
    std::thread::scope(|s| {
        for t in 0..4_u64 {
            let stack = &stack;
            s.spawn(move || {
                for i in 0..1_000 {
                    stack.push_from(t, t * 10_000 + i);
                    if i % 3 == 0 {
                        stack.pop_from(t);
                    }
                }
            });
        }
    });

    let contents = stack.quiesce();
    assert_eq!(stack.inner().retired_len(), 0);

    // history order is not a linearization here, so only the set-based
    // checks and the counted reclamation accounting apply
    let results = StackPropertyChecker::new(&stack).check_all();
    for name in ["NoLostElements", "NoDuplicates", "PoppedWerePushed", "AtMostOncePop"] {
        let r = results.iter().find(|r| r.name == name).unwrap();
        assert!(r.holds, "{}: {:?}", name, r.violation);
    }
    let violations = stack.counted_reclamation_violations();
    assert!(violations.is_empty(), "{:?}", violations);
    assert_eq!(stack.stats().live_nodes(), contents.len() as u64);
}
