//! Shared program builders for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use strand_engine::{
    Carrier, ContinuationScope, EngineResult, Method, MethodId, Op, Program,
};

/// A program plus the bits tests keep referring back to.
pub struct TestProgram {
    pub program: Arc<Program>,
    pub entry: MethodId,
    pub scope: ContinuationScope,
}

/// Entry `count(n)`: counts local 1 from zero to `n`, yielding once per
/// step, then returns the counter. One mount per yield plus the final
/// completing mount.
pub fn counting_yielder() -> TestProgram {
    let scope = ContinuationScope::named("count");
    let mut program = Program::new();
    let scope_slot = program.add_scope(scope.clone());
    let entry = program.add_method(Method {
        name: "count".to_string(),
        param_count: 1,
        local_count: 2,
        code: vec![
            Op::ConstI32(0),
            Op::StoreLocal(1),
            // loop head
            Op::LoadLocal(1),
            Op::LoadLocal(0),
            Op::Lt,
            Op::BranchIfZero(13),
            Op::Yield { scope: scope_slot },
            Op::Pop,
            Op::LoadLocal(1),
            Op::ConstI32(1),
            Op::Add,
            Op::StoreLocal(1),
            Op::Branch(2),
            // exit
            Op::LoadLocal(1),
            Op::Return,
        ],
    });
    TestProgram {
        program: Arc::new(program),
        entry,
        scope,
    }
}

/// Entry `dive(d)`: recurses `d` deep, yields once at the bottom, then
/// returns 42 up through every frame.
pub fn deep_yielder() -> TestProgram {
    let scope = ContinuationScope::named("dive");
    let mut program = Program::new();
    let scope_slot = program.add_scope(scope.clone());
    let entry = program.add_method(Method {
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
            // bottom
            Op::Yield { scope: scope_slot },
            Op::Pop,
            Op::ConstI32(42),
            Op::Return,
        ],
    });
    TestProgram {
        program: Arc::new(program),
        entry,
        scope,
    }
}

/// Mount `cont` until it completes; returns how many mounts it took.
pub fn run_to_completion(
    cont: &Arc<strand_engine::Continuation>,
    carrier: &Carrier,
) -> EngineResult<usize> {
    let mut mounts = 0;
    while !cont.is_done() {
        cont.run(carrier)?;
        mounts += 1;
    }
    Ok(mounts)
}
