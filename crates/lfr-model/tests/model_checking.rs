//! Exhaustive checks of every variant.

use lfr_model::{check_model, ModelConfig, ReclaimModel, Variant};
use stateright::{Checker, Model};

#[test]
fn test_reclaiming_contended_pops_all_properties() {
    let model = ReclaimModel::new(ModelConfig::contended_pops(Variant::Reclaiming));
    let checker = model.checker().spawn_bfs().join();

    println!("states: {}", checker.unique_state_count());
    checker.assert_properties();
}

#[test]
fn test_reclaiming_three_poppers_all_properties() {
    let model = ReclaimModel::new(ModelConfig::three_poppers(Variant::Reclaiming));
    model.checker().spawn_bfs().join().assert_properties();
}

#[test]
fn test_reclaiming_push_pop_race_is_safe() {
    // A single popper never defers, so only safety is expected here.
    let report = check_model(ModelConfig::push_pop_race(Variant::Reclaiming));
    assert!(report.safe(), "{}", report.format());
    assert!(!report.result("taken batch re-chained").unwrap().holds);
}

#[test]
fn test_reclaiming_push_between_pops_all_properties() {
    let model = ReclaimModel::new(ModelConfig::push_between_pops(Variant::Reclaiming));
    let checker = model.checker().spawn_bfs().join();

    println!("states: {}", checker.unique_state_count());
    checker.assert_properties();
}

#[test]
fn test_free_on_unlink_reaches_use_after_free() {
    for config in [
        ModelConfig::contended_pops(Variant::FreeOnUnlink),
        ModelConfig::three_poppers(Variant::FreeOnUnlink),
        ModelConfig::push_between_pops(Variant::FreeOnUnlink),
    ] {
        let report = check_model(config);
        println!("{}", report.format());

        assert!(!report.result("no use after free").unwrap().holds);
        // it never leaks, and a node is still freed only once
        assert!(report.result("no leak").unwrap().holds);
        assert!(report.result("no double free").unwrap().holds);
    }
}

#[test]
fn test_leaking_reaches_leak_but_stays_memory_safe() {
    let report = check_model(ModelConfig::contended_pops(Variant::Leaking));
    println!("{}", report.format());

    assert!(!report.result("no leak").unwrap().holds);
    assert!(!report.result("reclamation invariants").unwrap().holds);
    assert!(report.result("no use after free").unwrap().holds);
    assert!(report.result("no double free").unwrap().holds);
    assert!(report.result("stack invariants").unwrap().holds);
}

#[test]
fn test_model_is_deterministic_in_state_count() {
    let a = check_model(ModelConfig::contended_pops(Variant::Reclaiming));
    let b = check_model(ModelConfig::contended_pops(Variant::Reclaiming));
    assert_eq!(a.state_count, b.state_count);
}
