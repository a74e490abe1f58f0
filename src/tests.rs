//! End-to-end scenarios exercising the full generator-less path: build a
//! `Script` directly (the shape `generator.rs` would have produced),
//! optimize it, emit it, and run the resulting `Action` tree against stub
//! `Runtime`/`Target`/`Thread` implementations. Mirrors the teacher's own
//! habit of testing the back half of the pipeline against hand-built IR
//! rather than only through the front end.

use crate::emitter::{emit_script, exec_actions, Action, EmittedScript, ExecOutcome, Expr};
use crate::error::ScriptKind;
use crate::ir::{HatKind, Input, InputOp, ProcedureVariantId, Script, StackBlock, StackOp, StopMode};
use crate::optimizer::Optimizer;
use crate::project::Scope;
use crate::runtime::{Runtime, RuntimeOptions, Target, Thread, YieldTag};
use crate::value::Value;
use std::collections::BTreeMap;

struct StubTarget {
    id: String,
    variables: BTreeMap<String, Value>,
    lists: BTreeMap<String, Vec<Value>>,
    x: f64,
    y: f64,
    direction: f64,
}

impl StubTarget {
    fn new(id: &str) -> Self {
        StubTarget { id: id.to_string(), variables: BTreeMap::new(), lists: BTreeMap::new(), x: 0.0, y: 0.0, direction: 90.0 }
    }
}

impl Target for StubTarget {
    fn id(&self) -> &str {
        &self.id
    }
    fn variable(&self, id: &str) -> Value {
        self.variables.get(id).cloned().unwrap_or(Value::Number(0.0))
    }
    fn set_variable(&mut self, id: &str, value: Value) {
        self.variables.insert(id.to_string(), value);
    }
    fn list(&self, id: &str) -> Vec<Value> {
        self.lists.get(id).cloned().unwrap_or_default()
    }
    fn set_list(&mut self, id: &str, values: Vec<Value>) {
        self.lists.insert(id.to_string(), values);
    }
    fn x(&self) -> f64 {
        self.x
    }
    fn y(&self) -> f64 {
        self.y
    }
    fn direction(&self) -> f64 {
        self.direction
    }
    fn size(&self) -> f64 {
        100.0
    }
    fn visible(&self) -> bool {
        true
    }
    fn set_xy(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }
    fn set_direction(&mut self, degrees: f64) {
        self.direction = degrees;
    }
    fn say(&mut self, _text: &str) {}
    fn think(&mut self, _text: &str) {}
    fn set_effect(&mut self, _name: &str, _value: f64) {}
    fn point_towards(&mut self, _x: f64, _y: f64) {}
    fn get_snapped_bounds(&self) -> (f64, f64, f64, f64) {
        (-240.0, 240.0, -180.0, 180.0)
    }
    fn make_clone(&mut self) -> Option<String> {
        None
    }
}

#[derive(Default)]
struct StubRuntime {
    stuck: bool,
    broadcasts: Vec<String>,
    timer: f64,
    pressed_keys: Vec<String>,
}

impl Runtime for StubRuntime {
    fn is_stuck(&self) -> bool {
        self.stuck
    }
    fn mouse_x(&self) -> f64 {
        0.0
    }
    fn mouse_y(&self) -> f64 {
        0.0
    }
    fn timer(&self) -> f64 {
        self.timer
    }
    fn scratch_to_screen_x(&self, x: f64) -> f64 {
        x
    }
    fn scratch_to_screen_y(&self, y: f64) -> f64 {
        y
    }
    fn get_sprite_target_by_name(&self, _name: &str) -> Option<String> {
        None
    }
    fn broadcast(&mut self, name: &str) {
        self.broadcasts.push(name.to_string());
    }
    fn add_target(&mut self, _target_id: &str) -> String {
        String::new()
    }
    fn delete_clone(&mut self, _target_id: &str) {}
    fn start_hat_blocks(&mut self, _hat_opcode: &str, _field_values: &[String]) {}
    fn clones_available(&self) -> bool {
        true
    }
    fn register_active_key(&mut self, _key: &str) {}
    fn is_key_pressed(&self, key: &str) -> bool {
        self.pressed_keys.iter().any(|k| k == key)
    }
    fn request_redraw(&mut self) {}
    fn stop_all(&mut self) {}
    fn stop_for_target(&mut self, _target_id: &str) {}
    fn options(&self) -> RuntimeOptions {
        RuntimeOptions::default()
    }
}

#[derive(Default)]
struct StubThread {
    tick_yields: usize,
    plain_yields: usize,
    waits: usize,
    terminate: bool,
}

impl Thread for StubThread {
    fn stop(&mut self) {
        self.terminate = true;
    }
    fn wait(&mut self, _seconds: f64) {
        self.waits += 1;
    }
    fn wait_for_timer(&mut self, _timer_id: u64) -> bool {
        true
    }
    fn suspend(&mut self, tag: YieldTag) {
        match tag {
            YieldTag::YieldTick => self.tick_yields += 1,
            YieldTag::Yield => self.plain_yields += 1,
            YieldTag::Wait => self.waits += 1,
        }
    }
    fn should_terminate(&self) -> bool {
        self.terminate
    }
}

fn entry_script(stack: Vec<StackBlock>) -> Script {
    Script {
        stack,
        procedure_code: None,
        argument_names: Vec::new(),
        argument_defaults: Vec::new(),
        yields: false,
        warp: false,
        warp_timer: false,
        hat: Some(HatKind::Executable),
        is_procedure: false,
        depended_procedures: Default::default(),
    }
}

fn compile(mut script: Script) -> EmittedScript {
    let mut optimizer = Optimizer::new();
    let hints = optimizer.optimize_script(&mut script);
    emit_script(&script, ScriptKind::Entry, Some(&hints)).expect("hand-built fixture should emit cleanly")
}

fn run(emitted: &EmittedScript, target: &mut StubTarget, runtime: &mut StubRuntime, thread: &mut StubThread) -> ExecOutcome {
    let procedures = BTreeMap::new();
    exec_actions(&emitted.actions, &[], target, runtime, thread, &procedures, emitted.warp, emitted.warp_timer)
}

// 1. Motion: `when-flag-clicked; move 10 steps` from (0,0) facing 90 degrees
// ends at (10, 0).
#[test]
fn motion_move_ten_steps_facing_east() {
    let mut inputs = BTreeMap::new();
    inputs.insert("STEPS".to_string(), Input::constant(Value::Number(10.0)));
    let script = entry_script(vec![StackBlock::new(StackOp::Simple { opcode: "motion_movesteps".to_string(), inputs }, "move1")]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert!((target.x - 10.0).abs() < 1e-9);
    assert!(target.y.abs() < 1e-9);
}

// 2. Repeat with variable: `repeat 5 { change i by 1 }`, non-warp yields
// once per tick (5 `YieldTick` suspensions), warp (and not stuck) yields
// zero times. Both end at `i = 5`.
#[test]
fn repeat_non_warp_yields_once_per_iteration() {
    let body = vec![StackBlock::new(
        StackOp::ChangeVariableBy { id: "i".into(), name: "i".into(), scope: Scope::TargetLocal, delta: Input::constant(Value::Number(1.0)) },
        "change1",
    )];
    let script = entry_script(vec![StackBlock::new(StackOp::RepeatCount { count: Input::constant(Value::Number(5.0)), do_body: body }, "rep1")]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(crate::value::cast_number(&target.variable("i")), 5.0);
    assert_eq!(thread.tick_yields, 5);
    // one plain yield for the executable hat's mandatory leading suspend,
    // none from the loop itself (that's what `tick_yields` counts here).
    assert_eq!(thread.plain_yields, 1);
}

#[test]
fn repeat_warp_without_stuck_runtime_never_yields() {
    let body = vec![StackBlock::new(
        StackOp::ChangeVariableBy { id: "i".into(), name: "i".into(), scope: Scope::TargetLocal, delta: Input::constant(Value::Number(1.0)) },
        "change1",
    )];
    let mut script = entry_script(vec![StackBlock::new(StackOp::RepeatCount { count: Input::constant(Value::Number(5.0)), do_body: body }, "rep1")]);
    script.warp = true;
    script.warp_timer = true;
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default(); // stuck == false
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(crate::value::cast_number(&target.variable("i")), 5.0);
    assert_eq!(thread.tick_yields, 0);
    // the leading executable-hat yield fires regardless of warp; the loop
    // itself contributes none since the runtime never reports stuck.
    assert_eq!(thread.plain_yields, 1);
}

#[test]
fn repeat_warp_while_runtime_is_stuck_yields_every_iteration() {
    let body = vec![StackBlock::new(
        StackOp::ChangeVariableBy { id: "i".into(), name: "i".into(), scope: Scope::TargetLocal, delta: Input::constant(Value::Number(1.0)) },
        "change1",
    )];
    let mut script = entry_script(vec![StackBlock::new(StackOp::RepeatCount { count: Input::constant(Value::Number(5.0)), do_body: body }, "rep1")]);
    script.warp = true;
    script.warp_timer = true;
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime { stuck: true, ..Default::default() };
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(crate::value::cast_number(&target.variable("i")), 5.0);
    // 5 loop-back-edge yields plus the leading executable-hat yield.
    assert_eq!(thread.plain_yields, 6);
    assert_eq!(thread.tick_yields, 0);
}

// 3. Conditional dead-branch: `if (1 = 1) then { set x to 42 } else { set x
// to -1 }` folds to the then-branch; the emitted tree never mentions -1.
#[test]
fn dead_branch_folds_away_the_else_arm() {
    let condition = Input::new(
        InputOp::Operator { opcode: "operator_equals".to_string(), operands: vec![Input::constant(Value::Number(1.0)), Input::constant(Value::Number(1.0))] },
        crate::value::Type::BOOLEAN,
    );
    let when_true = vec![StackBlock::new(
        StackOp::SetVariableTo { id: "x".into(), name: "x".into(), scope: Scope::TargetLocal, value: Input::constant(Value::Number(42.0)) },
        "set_true",
    )];
    let when_false = vec![StackBlock::new(
        StackOp::SetVariableTo { id: "x".into(), name: "x".into(), scope: Scope::TargetLocal, value: Input::constant(Value::Number(-1.0)) },
        "set_false",
    )];
    let script = entry_script(vec![StackBlock::new(StackOp::IfElse { condition, when_true, when_false }, "if1")]);
    let emitted = compile(script);

    assert!(!emitted.source.text.contains('-'), "folded source still references a negative literal: {}", emitted.source.text);
    // the leading executable-hat yield, then the folded If.
    assert_eq!(emitted.actions.len(), 2);
    assert!(matches!(emitted.actions[0], Action::Yield));
    match &emitted.actions[1] {
        Action::If { condition, when_true, when_false } => {
            assert!(matches!(condition, Expr::Constant(Value::Boolean(true))));
            assert!(when_false.is_empty());
            assert_eq!(when_true.len(), 1);
        }
        other => panic!("expected a spliced If, got {other:?}"),
    }

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);
    assert_eq!(crate::value::cast_number(&target.variable("x")), 42.0);
}

// 4. NaN propagation: `v = "abc"`; `change v by 1` yields `v = 1` because
// `cast_number("abc")` collapses to 0 before the add, never surfacing NaN.
#[test]
fn change_variable_by_coerces_non_numeric_string_through_zero() {
    let script = entry_script(vec![StackBlock::new(
        StackOp::ChangeVariableBy { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, delta: Input::constant(Value::Number(1.0)) },
        "change1",
    )]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    target.set_variable("v", Value::String("abc".to_string()));
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(crate::value::cast_number(&target.variable("v")), 1.0);
}

// 5. Negative zero: `0 - 0` is plain zero, `-1 * 0` is negative zero, and
// the distinction survives optimizer constant-folding and emission.
#[test]
fn subtraction_of_zero_from_zero_is_positive_zero() {
    let value = Input::new(
        InputOp::Operator { opcode: "operator_subtract".to_string(), operands: vec![Input::constant(Value::Number(0.0)), Input::constant(Value::Number(0.0))] },
        crate::value::Type::NUMBER,
    );
    let script = entry_script(vec![StackBlock::new(StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value }, "set1")]);
    let emitted = compile(script);
    match &emitted.actions[1] {
        Action::SetVariableTo { value: Expr::Constant(Value::Number(n)), .. } => {
            assert_eq!(*n, 0.0);
            assert!((1.0 / n).is_sign_positive());
        }
        other => panic!("expected a folded constant, got {other:?}"),
    }
}

#[test]
fn multiplication_by_zero_preserves_negative_zero() {
    let value = Input::new(
        InputOp::Operator { opcode: "operator_multiply".to_string(), operands: vec![Input::constant(Value::Number(-1.0)), Input::constant(Value::Number(0.0))] },
        crate::value::Type::NUMBER,
    );
    let script = entry_script(vec![StackBlock::new(StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value }, "set1")]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);
    let stored = target.variable("v");
    match stored {
        Value::Number(n) => {
            assert_eq!(n, 0.0);
            assert!((1.0 / n).is_sign_negative());
        }
        other => panic!("expected a number, got {other:?}"),
    }
}

// 6. Procedure call through broadcast-and-wait: `when-I-receive "go" {
// call P with 3 }`, `P x { set v to x }` a non-warp definition — the
// call suspends once (`Yield`, since the variant isn't warp) and the
// callee's own body runs to completion against the shared target.
#[test]
fn procedure_call_binds_argument_and_suspends_once() {
    let variant = ProcedureVariantId { proc_code: "P %n".to_string(), warp: false };
    let entry = entry_script(vec![StackBlock::new(
        StackOp::ProcedureCall { variant: variant.clone(), args: vec![Input::constant(Value::Number(3.0))] },
        "call1",
    )]);
    let emitted_entry = compile(entry);

    let mut proc_script = Script {
        stack: vec![StackBlock::new(
            StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value: Input::new(InputOp::ArgRef("x".into()), crate::value::Type::ANY) },
            "set_v",
        )],
        procedure_code: Some("P %n".to_string()),
        argument_names: vec!["x".to_string()],
        argument_defaults: vec![Value::Number(0.0)],
        yields: false,
        warp: false,
        warp_timer: false,
        hat: None,
        is_procedure: true,
        depended_procedures: Default::default(),
    };
    let mut optimizer = Optimizer::new();
    let hints = optimizer.optimize_script(&mut proc_script);
    let emitted_proc = emit_script(&proc_script, ScriptKind::Procedure, Some(&hints)).unwrap();

    let mut procedures = BTreeMap::new();
    procedures.insert(variant, emitted_proc);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    exec_actions(&emitted_entry.actions, &[], &mut target, &mut runtime, &mut thread, &procedures, emitted_entry.warp, emitted_entry.warp_timer);

    assert_eq!(crate::value::cast_number(&target.variable("v")), 3.0);
    // one for the entry's own leading executable-hat yield, one for the
    // non-warp call itself.
    assert_eq!(thread.plain_yields, 2);
}

#[test]
fn broadcast_and_wait_suspends_and_records_the_broadcast_name() {
    let script = entry_script(vec![StackBlock::new(
        StackOp::BroadcastAndWait { broadcast: Input::constant(Value::String("go".to_string())) },
        "baw1",
    )]);
    let emitted = compile(script);

    let mut target = StubTarget::new("Stage");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(runtime.broadcasts, vec!["go".to_string()]);
    assert_eq!(thread.waits, 1);
}

// Sensing: `sensing_timer` reads straight through to the runtime, and
// `sensing_keypressed` resolves its KEY_OPTION operand before asking the
// runtime whether that specific key is down.
#[test]
fn sensing_timer_and_keypressed_read_through_the_runtime() {
    let script = entry_script(vec![StackBlock::new(
        StackOp::SetVariableTo {
            id: "t".into(),
            name: "t".into(),
            scope: Scope::TargetLocal,
            value: Input::new(InputOp::SensingReporter { opcode: "sensing_timer".to_string(), operands: Vec::new() }, crate::value::Type::NUMBER),
        },
        "set_t",
    ), StackBlock::new(
        StackOp::SetVariableTo {
            id: "space_down".into(),
            name: "space_down".into(),
            scope: Scope::TargetLocal,
            value: Input::new(
                InputOp::SensingReporter { opcode: "sensing_keypressed".to_string(), operands: vec![Input::constant(Value::String("space".to_string()))] },
                crate::value::Type::BOOLEAN,
            ),
        },
        "set_space",
    )]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime { timer: 12.5, pressed_keys: vec!["space".to_string()], ..Default::default() };
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(crate::value::cast_number(&target.variable("t")), 12.5);
    assert_eq!(target.variable("space_down"), Value::Boolean(true));
}

// Fencing: `go to x: 1000 y: 1000` clamps to the stage bounds the target
// reports when `RuntimeOptions::fencing` is on (the stub runtime's default).
#[test]
fn motion_gotoxy_fences_to_stage_bounds() {
    let mut inputs = BTreeMap::new();
    inputs.insert("X".to_string(), Input::constant(Value::Number(1000.0)));
    inputs.insert("Y".to_string(), Input::constant(Value::Number(-1000.0)));
    let script = entry_script(vec![StackBlock::new(StackOp::Simple { opcode: "motion_gotoxy".to_string(), inputs }, "goto1")]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    run(&emitted, &mut target, &mut runtime, &mut thread);

    assert_eq!(target.x, 240.0);
    assert_eq!(target.y, -180.0);
}

// Universal invariant: `stop this script` only terminates the local
// action sequence, not anything beyond — `exec_actions` itself reports
// `StopThisScript` rather than silently swallowing it.
#[test]
fn stop_this_script_propagates_out_of_an_enclosing_forever() {
    let body = vec![StackBlock::new(StackOp::Stop { mode: StopMode::ThisScript }, "stop1")];
    let script = entry_script(vec![StackBlock::new(StackOp::Forever { do_body: body }, "forever1")]);
    let emitted = compile(script);

    let mut target = StubTarget::new("S");
    let mut runtime = StubRuntime::default();
    let mut thread = StubThread::default();
    let outcome = run(&emitted, &mut target, &mut runtime, &mut thread);
    assert_eq!(outcome, ExecOutcome::StopThisScript);
    assert_eq!(thread.tick_yields, 0);
}

// Idempotence: running the optimizer a second time over already-optimized
// output changes nothing further.
#[test]
fn optimizer_is_a_fixpoint_after_one_pass() {
    let condition = Input::new(
        InputOp::Operator { opcode: "operator_equals".to_string(), operands: vec![Input::constant(Value::Number(2.0)), Input::constant(Value::Number(2.0))] },
        crate::value::Type::BOOLEAN,
    );
    let when_true = vec![StackBlock::new(
        StackOp::SetVariableTo { id: "x".into(), name: "x".into(), scope: Scope::TargetLocal, value: Input::constant(Value::Number(1.0)) },
        "set_true",
    )];
    let mut script = entry_script(vec![StackBlock::new(StackOp::IfElse { condition, when_true, when_false: vec![] }, "if1")]);

    let mut optimizer = Optimizer::new();
    optimizer.optimize_script(&mut script);
    let once = script.clone();
    optimizer.optimize_script(&mut script);
    assert_eq!(format!("{:?}", once.stack), format!("{:?}", script.stack));
}

mod lattice_laws {
    use crate::value::{classify, Type};
    use proptest::prelude::*;

    fn finite_f64() -> impl Strategy<Value = f64> {
        prop_oneof![
            any::<f64>().prop_filter("finite", |n| n.is_finite()),
            Just(0.0),
            Just(-0.0),
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
        ]
    }

    proptest! {
        // classify always returns exactly one of the nine number atoms —
        // never the empty type.
        #[test]
        fn classify_is_total_and_always_numeric(n in finite_f64()) {
            let t = classify(n);
            prop_assert!(!t.is_empty());
            prop_assert!(t.is_always(Type::NUMBER_OR_NAN));
        }

        #[test]
        fn union_is_commutative(a in finite_f64(), b in finite_f64()) {
            let (ta, tb) = (classify(a), classify(b));
            prop_assert_eq!(ta.union(tb), tb.union(ta));
        }

        #[test]
        fn union_is_idempotent(a in finite_f64()) {
            let ta = classify(a);
            prop_assert_eq!(ta.union(ta), ta);
        }

        #[test]
        fn union_is_associative(a in finite_f64(), b in finite_f64(), c in finite_f64()) {
            let (ta, tb, tc) = (classify(a), classify(b), classify(c));
            prop_assert_eq!(ta.union(tb).union(tc), ta.union(tb.union(tc)));
        }

        // containment respects union: each operand is always contained in
        // their join.
        #[test]
        fn union_contains_both_operands(a in finite_f64(), b in finite_f64()) {
            let (ta, tb) = (classify(a), classify(b));
            let joined = ta.union(tb);
            prop_assert!(ta.is_always(joined));
            prop_assert!(tb.is_always(joined));
        }
    }
}

mod cast_laws {
    use crate::value::{cast_boolean, cast_number, cast_number_or_nan, cast_string, Value};
    use proptest::prelude::*;

    proptest! {
        // cast_number never produces NaN — that's exactly what
        // cast_number_or_nan is for.
        #[test]
        fn cast_number_never_nan(s in ".*") {
            let n = cast_number(&Value::String(s));
            prop_assert!(!n.is_nan());
        }

        // cast_number_or_nan(cast_number(v)) == cast_number(v): re-casting
        // an already-resolved number is a no-op on the happy path.
        #[test]
        fn cast_number_is_idempotent_through_cast_number_or_nan(s in ".*") {
            let v = Value::String(s);
            let once = cast_number(&v);
            let twice = cast_number_or_nan(&Value::Number(once));
            prop_assert_eq!(once, twice);
        }

        // Stringifying a finite number within safe-integer range and
        // re-parsing it recovers the same number.
        #[test]
        fn number_to_string_to_number_round_trips_when_finite(n in -9.0e15f64..9.0e15f64) {
            let s = cast_string(&Value::Number(n));
            let back = cast_number_or_nan(&Value::String(s));
            prop_assert_eq!(back, n);
        }

        #[test]
        fn cast_boolean_of_cast_string_of_boolean_round_trips(b in any::<bool>()) {
            let s = cast_string(&Value::Boolean(b));
            prop_assert_eq!(cast_boolean(&Value::String(s)), b);
        }
    }
}
