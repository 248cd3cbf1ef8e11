//! Stack Walker Tests
//!
//! The walker reports frames innermost first, reads frozen frames out of
//! storage without thawing them, and is transparent across nested
//! continuation boundaries. These tests validate:
//! - Walking a suspended capture
//! - Nested captures appearing in sequence at their mount point
//! - Live walks from native frames, including the native frame itself
//! - Bounding a live walk at a scope's entry
//!
//! # Running Tests
//! ```bash
//! cargo test --test walker_tests
//! ```

mod common;

use std::sync::Arc;

use strand_engine::{
    Carrier, Continuation, ContinuationScope, Method, NativeRegistry, Op, Program, ReprTag,
    StackWalker, Value,
};

use common::deep_yielder;

// ===== Suspended Captures =====

#[test]
fn test_walk_suspended_capture() {
    let tp = deep_yielder();
    let cont = Continuation::new(
        tp.scope.clone(),
        Arc::clone(&tp.program),
        tp.entry,
        vec![Value::I32(3)],
    );
    cont.run(&Carrier::new()).unwrap();

    let walker = StackWalker::of(&cont);
    assert_eq!(walker.len(), 4, "three recursive frames plus the bottom");
    for info in walker.iter() {
        assert_eq!(info.method, "dive");
        assert_eq!(info.repr, ReprTag::Interpreted);
        assert!(!info.native);
    }
}

#[test]
fn test_walk_empty_after_completion() {
    let tp = deep_yielder();
    let cont = Continuation::new(
        tp.scope.clone(),
        Arc::clone(&tp.program),
        tp.entry,
        vec![Value::I32(1)],
    );
    let carrier = Carrier::new();
    cont.run(&carrier).unwrap();
    cont.run(&carrier).unwrap();
    assert!(cont.is_done());

    let walker = StackWalker::of(&cont);
    assert!(walker.is_empty());
}

// ===== Nested Transparency =====

#[test]
fn test_walk_descends_nested_captures() {
    let outer_scope = ContinuationScope::named("walk-outer");
    let inner_scope = ContinuationScope::named("walk-inner");
    let mut program = Program::new();
    let outer_slot = program.add_scope(outer_scope.clone());
    let child_entry = program.add_method(Method {
        name: "leaf".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![
            Op::Yield { scope: outer_slot },
            Op::Pop,
            Op::ConstNull,
            Op::Return,
        ],
    });
    let outer_entry = program.add_method(Method {
        name: "trunk".to_string(),
        param_count: 1,
        local_count: 1,
        code: vec![Op::LoadLocal(0), Op::RunCont, Op::Return],
    });
    let program = Arc::new(program);

    let child = Continuation::new(inner_scope, Arc::clone(&program), child_entry, vec![]);
    let outer = Continuation::new(
        outer_scope,
        Arc::clone(&program),
        outer_entry,
        vec![Value::Cont(Arc::clone(&child))],
    );
    outer.run(&Carrier::new()).unwrap();

    // The child's frame appears exactly where the child is mounted,
    // innermost first.
    let names: Vec<String> = StackWalker::of(&outer)
        .into_iter()
        .map(|info| info.method)
        .collect();
    assert_eq!(names, vec!["leaf".to_string(), "trunk".to_string()]);
}

// ===== Live Walks =====

#[test]
fn test_live_walk_from_native() {
    let scope = ContinuationScope::named("walk-live");
    let mut program = Program::new();
    program.add_scope(scope.clone());
    let helper = program.add_method(Method {
        name: "helper".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::CallNative { native: 0, argc: 0 }, Op::Return],
    });
    let entry = program.add_method(Method {
        name: "entry".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::Call { method: helper, argc: 0 }, Op::Return],
    });
    let program = Arc::new(program);

    let mut natives = NativeRegistry::new();
    natives.register("snapshot", |ctx| {
        let infos = ctx.walk(None);
        // Innermost first: the native frame itself, then the managed
        // callers beneath it.
        assert!(infos[0].native);
        assert_eq!(infos[0].method, "snapshot");
        assert_eq!(infos[1].method, "helper");
        assert_eq!(infos[2].method, "entry");
        Ok(Value::I32(infos.len() as i32))
    });
    let carrier = Carrier::new().with_natives(Arc::new(natives));

    let cont = Continuation::new(scope, Arc::clone(&program), entry, vec![]);
    cont.run(&carrier).unwrap();
    assert_eq!(cont.result(), Some(Value::I32(3)));
}

#[test]
fn test_live_walk_bounded_by_scope() {
    let outer_scope = ContinuationScope::named("bound-outer");
    let inner_scope = ContinuationScope::named("bound-inner");
    let mut program = Program::new();
    program.add_scope(outer_scope.clone());
    let child_entry = program.add_method(Method {
        name: "inner_work".to_string(),
        param_count: 0,
        local_count: 0,
        code: vec![Op::CallNative { native: 0, argc: 0 }, Op::Return],
    });
    let outer_entry = program.add_method(Method {
        name: "outer_work".to_string(),
        param_count: 1,
        local_count: 1,
        code: vec![Op::LoadLocal(0), Op::RunCont, Op::Return],
    });
    let program = Arc::new(program);

    let bound = inner_scope.clone();
    let mut natives = NativeRegistry::new();
    natives.register("bounded_snapshot", move |ctx| {
        let all = ctx.walk(None);
        let bounded = ctx.walk(Some(&bound));
        // The bounded walk stops at the inner entry: the native frame
        // and the inner method, nothing of the outer mount.
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[1].method, "inner_work");
        assert!(all.len() > bounded.len());
        Ok(Value::I32(bounded.len() as i32))
    });
    let carrier = Carrier::new().with_natives(Arc::new(natives));

    let child = Continuation::new(inner_scope, Arc::clone(&program), child_entry, vec![]);
    let outer = Continuation::new(
        outer_scope,
        Arc::clone(&program),
        outer_entry,
        vec![Value::Cont(Arc::clone(&child))],
    );
    outer.run(&carrier).unwrap();
    assert_eq!(child.result(), Some(Value::I32(2)));
}
