//! Exception Unwinding Tests
//!
//! Managed throws unwind frame by frame, giving each installed handler a
//! chance and restoring the frame's operand depth, monitor holdings, and
//! pin accounting on entry to the catch block. These tests validate:
//! - Catching in the throwing frame and in a caller
//! - Handler-entry restoration of monitors and pins
//! - Unwinds that cross a continuation entry (the inner one completes,
//!   the outer frames keep unwinding)
//! - Uncaught exceptions surfacing as `EngineError::Uncaught` with an
//!   innermost-first trace
//! - Unwinding through frames a lazy thaw still holds frozen
//!
//! # Running Tests
//! ```bash
//! cargo test --test exception_tests
//! ```

mod common;

use std::sync::Arc;

use strand_engine::{
    Carrier, CarrierConfig, Continuation, ContinuationScope, EngineError, Method, MonitorRegistry,
    Op, Program, Value,
};

use common::run_to_completion;

// ===== Catching =====

#[test]
fn test_catch_in_throwing_frame() {
    let scope = ContinuationScope::named("exc");
    let mut program = Program::new();
    program.add_scope(scope.clone());
    let entry = program.add_method(Method {
        name: "catcher".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![
            Op::TryEnter { catch: 3 },
            Op::ConstI32(5),
            Op::Throw,
            // catch: the thrown value is on the operand stack
            Op::Return,
        ],
    });
    let cont = Continuation::new(scope, Arc::new(program), entry, vec![]);

    run_to_completion(&cont, &Carrier::new()).unwrap();
    assert_eq!(cont.result(), Some(Value::I32(5)));
}

#[test]
fn test_catch_in_caller() {
    let scope = ContinuationScope::named("exc");
    let mut program = Program::new();
    program.add_scope(scope.clone());
    let thrower = program.add_method(Method {
        name: "thrower".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::ConstI32(13), Op::Throw],
    });
    let entry = program.add_method(Method {
        name: "catcher".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![
            Op::TryEnter { catch: 3 },
            Op::Call { method: thrower, argc: 0 },
            Op::Return,
            Op::Return,
        ],
    });
    let cont = Continuation::new(scope, Arc::new(program), entry, vec![]);

    run_to_completion(&cont, &Carrier::new()).unwrap();
    assert_eq!(cont.result(), Some(Value::I32(13)));
}

// ===== Handler-Entry Restoration =====

#[test]
fn test_handler_restores_monitors_and_pins() {
    let scope = ContinuationScope::named("exc");
    let mut program = Program::new();
    let scope_slot = program.add_scope(scope.clone());
    let _ = program.add_monitor();
    let entry = program.add_method(Method {
        name: "restorer".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![
            Op::TryEnter { catch: 5 },
            Op::MonitorEnter { monitor: 0 },
            Op::Pin,
            Op::ConstI32(1),
            Op::Throw,
            // catch: the monitor and the pin taken since TryEnter are
            // rolled back, so this yield must go through.
            Op::Pop,
            Op::Yield { scope: scope_slot },
            Op::Pop,
            Op::ConstBool(true),
            Op::Return,
        ],
    });
    let program = Arc::new(program);
    let monitor = program.monitor(0).unwrap();
    let cont = Continuation::new(scope, Arc::clone(&program), entry, vec![]);
    let carrier = Carrier::new();

    cont.run(&carrier).unwrap();
    assert!(!cont.is_done(), "the post-catch yield suspends");
    assert_eq!(MonitorRegistry::global().held_count(monitor), 0);
    assert_eq!(cont.pin_count(), 0);
    assert_eq!(cont.stats().pinned_total(), 0);

    cont.run(&carrier).unwrap();
    assert_eq!(cont.result(), Some(Value::Bool(true)));
}

// ===== Uncaught =====

#[test]
fn test_uncaught_surfaces_with_trace() {
    let scope = ContinuationScope::named("exc");
    let mut program = Program::new();
    program.add_scope(scope.clone());
    let inner = program.add_method(Method {
        name: "inner".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::ConstI32(7), Op::Throw],
    });
    let entry = program.add_method(Method {
        name: "boom".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::Call { method: inner, argc: 0 }, Op::Return],
    });
    let cont = Continuation::new(scope, Arc::new(program), entry, vec![]);

    match cont.run(&Carrier::new()) {
        Err(EngineError::Uncaught { value, trace }) => {
            assert_eq!(value, Value::I32(7));
            assert_eq!(trace, vec!["inner".to_string(), "boom".to_string()]);
        }
        other => panic!("expected an uncaught exception, got {other:?}"),
    }
    assert!(cont.is_done());
    assert!(cont.result().is_none());
}

// ===== Crossing Continuation Entries =====

#[test]
fn test_unwind_crosses_nested_entry() {
    let outer_scope = ContinuationScope::named("exc-outer");
    let inner_scope = ContinuationScope::named("exc-inner");
    let mut program = Program::new();
    program.add_scope(outer_scope.clone());
    let child_entry = program.add_method(Method {
        name: "failing_child".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::ConstI32(21), Op::Throw],
    });
    let outer_entry = program.add_method(Method {
        name: "guardian".to_string(),
        param_count: 1,
        local_count: 1,
        code: vec![
            Op::TryEnter { catch: 4 },
            Op::LoadLocal(0),
            Op::RunCont,
            Op::Return,
            // catch: the child's exception lands here
            Op::Return,
        ],
    });
    let program = Arc::new(program);

    let child = Continuation::new(inner_scope, Arc::clone(&program), child_entry, vec![]);
    let outer = Continuation::new(
        outer_scope,
        Arc::clone(&program),
        outer_entry,
        vec![Value::Cont(Arc::clone(&child))],
    );

    run_to_completion(&outer, &Carrier::new()).unwrap();
    // The child completed exceptionally (no result); the outer caught
    // the value the child threw.
    assert!(child.is_done());
    assert!(child.result().is_none());
    assert_eq!(outer.result(), Some(Value::I32(21)));
}

// ===== Unwinding Through Frozen Frames =====

#[test]
fn test_unwind_thaws_frozen_handlers() {
    // A deep capture resumed with a one-record thaw batch: the throw at
    // the top must unwind through frames that are still frozen, thawing
    // them to find the handler near the bottom.
    let scope = ContinuationScope::named("exc-lazy");
    let mut program = Program::new();
    let scope_slot = program.add_scope(scope.clone());
    let dive = program.add_method(Method {
        name: "dive".to_string(),
        param_count: 1,
        local_count: 1,
        code: vec![
            Op::LoadLocal(0),
            Op::BranchIfZero(7),
            Op::LoadLocal(0),
            Op::ConstI32(1),
            Op::Sub,
            Op::Call { method: 0, argc: 1 },
            Op::Return,
            // bottom: suspend, then throw on resume
            Op::Yield { scope: scope_slot },
            Op::Pop,
            Op::ConstI32(99),
            Op::Throw,
        ],
    });
    let entry = program.add_method(Method {
        name: "entry".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![
            Op::TryEnter { catch: 4 },
            Op::ConstI32(12),
            Op::Call { method: dive, argc: 1 },
            Op::Return,
            Op::Return,
        ],
    });
    let program = Arc::new(program);
    let cont = Continuation::new(scope, Arc::clone(&program), entry, vec![]);
    let carrier = Carrier::new().with_config(CarrierConfig {
        thaw_batch: Some(1),
        ..CarrierConfig::default()
    });

    cont.run(&carrier).unwrap();
    assert!(!cont.is_done());

    cont.run(&carrier).unwrap();
    assert!(cont.is_done());
    assert_eq!(cont.result(), Some(Value::I32(99)));
}
