//! Code emitter (component E).
//!
//! Lowers an optimized `Script` into an `EmittedScript`: a textual
//! pseudo-source for inspection/debugging (`EmittedSource`, built with
//! `std::fmt::Write`, in the spirit of the teacher's `SmtEncoder`) built in
//! lockstep with an executable `Action` tree (generalizing `vm.rs`'s
//! tree-walking `Executor` from a stack-machine interpreter loop to a
//! direct recursive walk over control-flow-shaped nodes), so the two can
//! never drift out of sync with each other. Also assigns stable
//! variable/list cache slots (rewrite 6 of §4.D) and enforces the
//! warp/warp-timer yield discipline of §5.

use crate::error::{CompileError, ScriptKind, SourceExcerpt};
use crate::ir::{HatKind, Input, InputOp, ProcedureVariantId, Script, Stack, StackOp, StopMode};
use crate::optimizer::CacheHints;
use crate::project::Scope;
use crate::runtime::{Runtime, Target, Thread, YieldTag};
use crate::value::{self, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// A stable slot assigned to one variable or list a script touches, so the
/// host may hoist repeated lookups by id into a flat array instead of a
/// hash/string lookup per access (§4.D rewrite 6). The emitted `Action`
/// tree itself still addresses state by id through the `Target` trait —
/// `CacheSlot`s are metadata the host's own fast-path execution may use,
/// not something this crate's interpreter requires.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CacheSlot {
    Variable { scope: Scope, id: String, name: String },
    List { id: String },
}

/// Resolved expression tree — `ir::Input` with procedure-argument names
/// already turned into positional indices into the running call's argument
/// slice.
#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Value),
    Arg(usize),
    CastBoolean(Box<Expr>),
    CastNumber(Box<Expr>),
    CastNumberOrNan(Box<Expr>),
    CastString(Box<Expr>),
    Operator { opcode: String, operands: Vec<Expr> },
    VariableRead { id: String },
    ListReporter { opcode: String, list_id: String, operands: Vec<Expr> },
    SensingReporter { opcode: String, operands: Vec<Expr>, yields: bool },
    PropertyOf { property: String, target: Box<Expr> },
    UnknownNoOp,
}

/// The executable control-flow tree — one `Action` per emitted stack
/// block.
#[derive(Debug, Clone)]
pub enum Action {
    Simple { opcode: String, inputs: Vec<(String, Expr)> },
    SetVariableTo { id: String, value: Expr },
    ChangeVariableBy { id: String, delta: Expr },
    If { condition: Expr, when_true: Vec<Action>, when_false: Vec<Action> },
    RepeatCount { count: Expr, do_body: Vec<Action> },
    Forever { do_body: Vec<Action> },
    RepeatUntil { condition: Expr, do_body: Vec<Action> },
    Wait { seconds: Expr },
    WaitUntil { condition: Expr },
    Stop { mode: StopMode },
    BroadcastAndWait { broadcast: Expr },
    Call { variant: ProcedureVariantId, args: Vec<Expr> },
    Return { value: Expr },
    /// The unconditional leading yield §4.E mandates for has-hat ∧
    /// hat-is-executable scripts, so the event surfaces in the same tick it
    /// fired rather than being delayed until the next one.
    Yield,
    NoOp,
}

/// A fully emitted script: the executable tree, the debug source text it
/// was produced alongside, and the cache-slot metadata collected for it.
#[derive(Debug, Clone)]
pub struct EmittedScript {
    pub source: EmittedSource,
    pub actions: Vec<Action>,
    pub warp: bool,
    pub warp_timer: bool,
    pub cache_slots: Vec<CacheSlot>,
}

/// The textual pseudo-source built alongside `actions`, kept only for
/// inspection/debugging and for the reload-validation check below — never
/// re-parsed into an `Ir`.
#[derive(Debug, Clone)]
pub struct EmittedSource {
    pub text: String,
}

impl std::fmt::Display for EmittedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Emit one script (entry or procedure variant), producing both halves in
/// lockstep and then validating that the textual half is well-formed.
pub fn emit_script(script: &Script, kind: ScriptKind, hints: Option<&CacheHints>) -> Result<EmittedScript, CompileError> {
    let arg_names = &script.argument_names;
    let mut actions = build_actions(&script.stack, arg_names);
    if script.hat_is_executable() {
        actions.insert(0, Action::Yield);
    }

    let mut text = String::new();
    write_header(&mut text, kind, script);
    if script.hat_is_executable() {
        pad(&mut text, 1);
        writeln!(text, "yield").ok();
    }
    write_block_list(&mut text, &script.stack, 1);
    writeln!(text, "END {kind}").ok();

    validate_reload(&text).map_err(|reason| CompileError::EmitLoadFailure {
        script_kind: kind,
        warp: script.warp,
        source_len: text.len(),
        excerpt: SourceExcerpt::from_source(&text),
        reason,
    })?;

    let cache_slots = hints
        .map(|h| {
            let mut slots: Vec<CacheSlot> = h
                .variables
                .iter()
                .map(|(scope, id, name)| CacheSlot::Variable { scope: *scope, id: id.clone(), name: name.clone() })
                .chain(h.lists.iter().map(|id| CacheSlot::List { id: id.clone() }))
                .collect();
            slots.sort();
            slots
        })
        .unwrap_or_default();

    Ok(EmittedScript { source: EmittedSource { text }, actions, warp: script.warp, warp_timer: script.warp_timer, cache_slots })
}

fn write_header(out: &mut String, kind: ScriptKind, script: &Script) {
    match kind {
        ScriptKind::Entry => {
            let hat = match script.hat {
                Some(HatKind::Executable) => "executable",
                Some(HatKind::Condition) => "condition",
                None => "none",
            };
            writeln!(out, "BEGIN {kind} hat={hat}").ok();
        }
        ScriptKind::Procedure => {
            let code = script.procedure_code.as_deref().unwrap_or("<unknown>");
            writeln!(out, "BEGIN {kind} proccode={code:?} warp={} warp_timer={}", script.warp, script.warp_timer).ok();
        }
    }
}

fn write_block_list(out: &mut String, stack: &Stack, indent: usize) {
    for block in stack {
        write_block(out, &block.op, indent, block.yields);
    }
}

fn pad(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

fn write_block(out: &mut String, op: &StackOp, indent: usize, yields: bool) {
    pad(out, indent);
    match op {
        StackOp::Simple { opcode, inputs } => {
            writeln!(out, "{opcode}({}) yields={yields}", inputs.len()).ok();
        }
        StackOp::SetVariableTo { name, .. } => {
            writeln!(out, "set {name:?} yields={yields}").ok();
        }
        StackOp::ChangeVariableBy { name, .. } => {
            writeln!(out, "change {name:?} yields={yields}").ok();
        }
        StackOp::IfElse { when_true, when_false, .. } => {
            writeln!(out, "if yields={yields}").ok();
            write_block_list(out, when_true, indent + 1);
            pad(out, indent);
            writeln!(out, "else").ok();
            write_block_list(out, when_false, indent + 1);
            pad(out, indent);
            writeln!(out, "endif").ok();
        }
        StackOp::RepeatCount { do_body, .. } => {
            writeln!(out, "repeat yields={yields}").ok();
            write_block_list(out, do_body, indent + 1);
            pad(out, indent);
            writeln!(out, "endrepeat").ok();
        }
        StackOp::Forever { do_body } => {
            writeln!(out, "forever yields={yields}").ok();
            write_block_list(out, do_body, indent + 1);
            pad(out, indent);
            writeln!(out, "endforever").ok();
        }
        StackOp::RepeatUntil { do_body, .. } => {
            writeln!(out, "repeat_until yields={yields}").ok();
            write_block_list(out, do_body, indent + 1);
            pad(out, indent);
            writeln!(out, "endrepeat_until").ok();
        }
        StackOp::Wait { .. } => {
            writeln!(out, "wait yields={yields}").ok();
        }
        StackOp::WaitUntil { .. } => {
            writeln!(out, "wait_until yields={yields}").ok();
        }
        StackOp::Stop { mode } => {
            writeln!(out, "stop {mode:?} yields={yields}").ok();
        }
        StackOp::BroadcastAndWait { .. } => {
            writeln!(out, "broadcast_and_wait yields={yields}").ok();
        }
        StackOp::ProcedureCall { variant, args } => {
            writeln!(out, "call {:?} warp={} nargs={} yields={yields}", variant.proc_code, variant.warp, args.len()).ok();
        }
        StackOp::ProcedureReturn { .. } => {
            writeln!(out, "return yields={yields}").ok();
        }
        StackOp::UnknownNoOp { diagnostic_opcode } => {
            writeln!(out, "noop({diagnostic_opcode})").ok();
        }
    }
}

/// Every control-flow block above writes a matching `end...` line; a
/// well-formed source has exactly as many `end` lines as block-openers.
/// This is the whole of the reload-validation check — it catches a writer
/// bug (a missing `write_block_list` call, an unbalanced branch) without
/// needing a second parser for a language nothing else ever consumes.
fn validate_reload(text: &str) -> Result<(), String> {
    let openers = text.lines().filter(|l| {
        let l = l.trim_start();
        l.starts_with("if ") || l.starts_with("repeat ") || l.starts_with("forever ") || l.starts_with("repeat_until ")
    }).count();
    let closers = text
        .lines()
        .filter(|l| {
            let l = l.trim_start();
            l == "endif" || l == "endrepeat" || l == "endforever" || l == "endrepeat_until"
        })
        .count();
    if openers != closers {
        return Err(format!("unbalanced control-flow markers: {openers} openers, {closers} closers"));
    }
    if !text.starts_with("BEGIN ") {
        return Err("missing BEGIN header".to_string());
    }
    Ok(())
}

fn build_actions(stack: &Stack, arg_names: &[String]) -> Vec<Action> {
    stack.iter().map(|b| build_action(&b.op, arg_names)).collect()
}

fn build_action(op: &StackOp, arg_names: &[String]) -> Action {
    match op {
        StackOp::Simple { opcode, inputs } => Action::Simple {
            opcode: opcode.clone(),
            inputs: inputs.iter().map(|(k, v)| (k.clone(), build_expr(v, arg_names))).collect(),
        },
        StackOp::SetVariableTo { id, value, .. } => Action::SetVariableTo { id: id.clone(), value: build_expr(value, arg_names) },
        StackOp::ChangeVariableBy { id, delta, .. } => Action::ChangeVariableBy { id: id.clone(), delta: build_expr(delta, arg_names) },
        StackOp::IfElse { condition, when_true, when_false } => Action::If {
            condition: build_expr(condition, arg_names),
            when_true: build_actions(when_true, arg_names),
            when_false: build_actions(when_false, arg_names),
        },
        StackOp::RepeatCount { count, do_body } => {
            Action::RepeatCount { count: build_expr(count, arg_names), do_body: build_actions(do_body, arg_names) }
        }
        StackOp::Forever { do_body } => Action::Forever { do_body: build_actions(do_body, arg_names) },
        StackOp::RepeatUntil { condition, do_body } => {
            Action::RepeatUntil { condition: build_expr(condition, arg_names), do_body: build_actions(do_body, arg_names) }
        }
        StackOp::Wait { seconds } => Action::Wait { seconds: build_expr(seconds, arg_names) },
        StackOp::WaitUntil { condition } => Action::WaitUntil { condition: build_expr(condition, arg_names) },
        StackOp::Stop { mode } => Action::Stop { mode: *mode },
        StackOp::BroadcastAndWait { broadcast } => Action::BroadcastAndWait { broadcast: build_expr(broadcast, arg_names) },
        StackOp::ProcedureCall { variant, args } => {
            Action::Call { variant: variant.clone(), args: args.iter().map(|a| build_expr(a, arg_names)).collect() }
        }
        StackOp::ProcedureReturn { value } => Action::Return { value: build_expr(value, arg_names) },
        StackOp::UnknownNoOp { .. } => Action::NoOp,
    }
}

fn build_expr(input: &Input, arg_names: &[String]) -> Expr {
    match &input.op {
        InputOp::Constant(v) => Expr::Constant(v.clone()),
        InputOp::ArgRef(name) => match arg_names.iter().position(|n| n == name) {
            Some(idx) => Expr::Arg(idx),
            None => Expr::Constant(Value::Number(0.0)),
        },
        InputOp::CastBoolean(b) => Expr::CastBoolean(Box::new(build_expr(b, arg_names))),
        InputOp::CastNumber(b) => Expr::CastNumber(Box::new(build_expr(b, arg_names))),
        InputOp::CastNumberOrNan(b) => Expr::CastNumberOrNan(Box::new(build_expr(b, arg_names))),
        InputOp::CastString(b) => Expr::CastString(Box::new(build_expr(b, arg_names))),
        InputOp::Operator { opcode, operands } => {
            Expr::Operator { opcode: opcode.clone(), operands: operands.iter().map(|o| build_expr(o, arg_names)).collect() }
        }
        InputOp::VariableRead { id, .. } => Expr::VariableRead { id: id.clone() },
        InputOp::ListReporter { opcode, list_id, operands } => Expr::ListReporter {
            opcode: opcode.clone(),
            list_id: list_id.clone(),
            operands: operands.iter().map(|o| build_expr(o, arg_names)).collect(),
        },
        InputOp::SensingReporter { opcode, operands } => Expr::SensingReporter {
            opcode: opcode.clone(),
            operands: operands.iter().map(|o| build_expr(o, arg_names)).collect(),
            yields: input.yields,
        },
        InputOp::PropertyOf { property, target } => {
            Expr::PropertyOf { property: property.clone(), target: Box::new(build_expr(target, arg_names)) }
        }
        InputOp::UnknownNoOp(_) => Expr::UnknownNoOp,
    }
}

/// How an `Action` sequence finished: fell off the end, or was stopped at
/// some scope (propagated up through enclosing loops/branches but not
/// across a procedure-call boundary, matching Scratch's own stop-scope
/// rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Continue,
    StopThisScript,
    StopAll,
}

/// The warp/warp-timer flags in force for the script currently executing,
/// controlling loop back-edge suspension per §5's three-rule yield
/// discipline: non-warp always yields per iteration, warp+warp-timer checks
/// `Runtime::is_stuck` instead, warp-without-a-loop never reaches a loop
/// back-edge at all.
#[derive(Debug, Clone, Copy)]
struct ExecContext {
    warp: bool,
    warp_timer: bool,
}

impl ExecContext {
    fn of(script: &EmittedScript) -> Self {
        ExecContext { warp: script.warp, warp_timer: script.warp_timer }
    }

    /// Suspend at a loop back-edge per the governing rule, or don't.
    fn loop_tick(&self, runtime: &mut dyn Runtime, thread: &mut dyn Thread) {
        if !self.warp {
            thread.suspend(YieldTag::YieldTick);
        } else if self.warp_timer && runtime.is_stuck() {
            thread.suspend(YieldTag::Yield);
        }
    }
}

/// Execute one action sequence against a host's trait objects. `args` is
/// the current procedure call's bound argument values (empty for an entry
/// script). `procedures` is the compiled-artifact table the driver
/// produced, looked up by `ProcedureVariantId` on every `Action::Call`.
/// `warp`/`warp_timer` are this script's own flags (`EmittedScript::warp`,
/// `EmittedScript::warp_timer`), which the host threads through from
/// whichever entry or procedure artifact it is currently running.
pub fn exec_actions(
    actions: &[Action],
    args: &[Value],
    target: &mut dyn Target,
    runtime: &mut dyn Runtime,
    thread: &mut dyn Thread,
    procedures: &BTreeMap<ProcedureVariantId, EmittedScript>,
    warp: bool,
    warp_timer: bool,
) -> ExecOutcome {
    exec_actions_ctx(actions, args, target, runtime, thread, procedures, ExecContext { warp, warp_timer })
}

fn exec_actions_ctx(
    actions: &[Action],
    args: &[Value],
    target: &mut dyn Target,
    runtime: &mut dyn Runtime,
    thread: &mut dyn Thread,
    procedures: &BTreeMap<ProcedureVariantId, EmittedScript>,
    ctx: ExecContext,
) -> ExecOutcome {
    for action in actions {
        if thread.should_terminate() {
            return ExecOutcome::StopAll;
        }
        match exec_action(action, args, target, runtime, thread, procedures, ctx) {
            ExecOutcome::Continue => continue,
            other => return other,
        }
    }
    ExecOutcome::Continue
}

fn exec_action(
    action: &Action,
    args: &[Value],
    target: &mut dyn Target,
    runtime: &mut dyn Runtime,
    thread: &mut dyn Thread,
    procedures: &BTreeMap<ProcedureVariantId, EmittedScript>,
    ctx: ExecContext,
) -> ExecOutcome {
    match action {
        Action::Simple { opcode, inputs } => {
            exec_simple(opcode, inputs, args, target, runtime);
            ExecOutcome::Continue
        }
        Action::SetVariableTo { id, value } => {
            let v = eval_expr(value, args, target, runtime);
            target.set_variable(id, v);
            ExecOutcome::Continue
        }
        Action::ChangeVariableBy { id, delta } => {
            let d = value::cast_number_or_nan(&eval_expr(delta, args, target, runtime));
            let current = value::cast_number_or_nan(&target.variable(id));
            target.set_variable(id, Value::Number(current + d));
            ExecOutcome::Continue
        }
        Action::If { condition, when_true, when_false } => {
            let taken = if value::cast_boolean(&eval_expr(condition, args, target, runtime)) { when_true } else { when_false };
            exec_actions_ctx(taken, args, target, runtime, thread, procedures, ctx)
        }
        Action::RepeatCount { count, do_body } => {
            let n = value::cast_number(&eval_expr(count, args, target, runtime)).floor().max(0.0) as u64;
            for _ in 0..n {
                match exec_actions_ctx(do_body, args, target, runtime, thread, procedures, ctx) {
                    ExecOutcome::Continue => {}
                    other => return other,
                }
                ctx.loop_tick(runtime, thread);
            }
            ExecOutcome::Continue
        }
        Action::Forever { do_body } => loop {
            match exec_actions_ctx(do_body, args, target, runtime, thread, procedures, ctx) {
                ExecOutcome::Continue => {}
                other => return other,
            }
            if thread.should_terminate() {
                return ExecOutcome::StopAll;
            }
            ctx.loop_tick(runtime, thread);
        },
        Action::RepeatUntil { condition, do_body } => {
            while !value::cast_boolean(&eval_expr(condition, args, target, runtime)) {
                match exec_actions_ctx(do_body, args, target, runtime, thread, procedures, ctx) {
                    ExecOutcome::Continue => {}
                    other => return other,
                }
                ctx.loop_tick(runtime, thread);
            }
            ExecOutcome::Continue
        }
        Action::Wait { seconds } => {
            let s = value::cast_number(&eval_expr(seconds, args, target, runtime)).max(0.0);
            thread.wait(s);
            ExecOutcome::Continue
        }
        Action::WaitUntil { condition } => {
            while !value::cast_boolean(&eval_expr(condition, args, target, runtime)) {
                thread.suspend(YieldTag::Wait);
            }
            ExecOutcome::Continue
        }
        Action::Stop { mode } => match mode {
            StopMode::ThisScript => ExecOutcome::StopThisScript,
            StopMode::All => {
                runtime.stop_all();
                ExecOutcome::StopAll
            }
            StopMode::OtherScriptsInSprite => {
                runtime.stop_for_target(target.id());
                ExecOutcome::Continue
            }
        },
        Action::BroadcastAndWait { broadcast } => {
            let name = value::cast_string(&eval_expr(broadcast, args, target, runtime));
            runtime.broadcast(&name);
            thread.suspend(YieldTag::Wait);
            ExecOutcome::Continue
        }
        Action::Call { variant, args: call_args } => {
            let bound: Vec<Value> = call_args.iter().map(|a| eval_expr(a, args, target, runtime)).collect();
            if !variant.warp {
                thread.suspend(YieldTag::Yield);
            }
            if let Some(proc) = procedures.get(variant) {
                exec_actions_ctx(&proc.actions, &bound, target, runtime, thread, procedures, ExecContext::of(proc));
            }
            ExecOutcome::Continue
        }
        Action::Return { .. } => ExecOutcome::StopThisScript,
        Action::Yield => {
            thread.suspend(YieldTag::Yield);
            ExecOutcome::Continue
        }
        Action::NoOp => ExecOutcome::Continue,
    }
}

fn input_value(inputs: &[(String, Expr)], name: &str, args: &[Value], target: &mut dyn Target, runtime: &mut dyn Runtime) -> Value {
    match inputs.iter().find(|(k, _)| k == name) {
        Some((_, e)) => eval_expr(e, args, target, runtime),
        None => Value::Number(0.0),
    }
}

/// Clamp a candidate `(x, y)` to the stage bounds `Target::get_snapped_bounds`
/// reports, when `RuntimeOptions::fencing` is on (§4.E, §6).
fn fenced_xy(x: f64, y: f64, target: &dyn Target, runtime: &dyn Runtime) -> (f64, f64) {
    if !runtime.options().fencing {
        return (x, y);
    }
    let (min_x, max_x, min_y, max_y) = target.get_snapped_bounds();
    (x.clamp(min_x, max_x), y.clamp(min_y, max_y))
}

fn exec_simple(opcode: &str, inputs: &[(String, Expr)], args: &[Value], target: &mut dyn Target, runtime: &mut dyn Runtime) {
    match opcode {
        "motion_movesteps" => {
            let steps = value::cast_number(&input_value(inputs, "STEPS", args, target, runtime));
            let radians = target.direction().to_radians();
            let dx = radians.sin() * steps;
            let dy = radians.cos() * steps;
            let (x, y) = fenced_xy(target.x() + dx, target.y() + dy, target, runtime);
            target.set_xy(x, y);
        }
        "motion_setx" => {
            let x = value::cast_number(&input_value(inputs, "X", args, target, runtime));
            let (x, y) = fenced_xy(x, target.y(), target, runtime);
            target.set_xy(x, y);
        }
        "motion_sety" => {
            let y = value::cast_number(&input_value(inputs, "Y", args, target, runtime));
            let (x, y) = fenced_xy(target.x(), y, target, runtime);
            target.set_xy(x, y);
        }
        "motion_gotoxy" => {
            let x = value::cast_number(&input_value(inputs, "X", args, target, runtime));
            let y = value::cast_number(&input_value(inputs, "Y", args, target, runtime));
            let (x, y) = fenced_xy(x, y, target, runtime);
            target.set_xy(x, y);
        }
        "motion_setdir" => {
            let d = value::cast_number(&input_value(inputs, "DIRECTION", args, target, runtime));
            target.set_direction(d);
        }
        "motion_changexby" => {
            let dx = value::cast_number(&input_value(inputs, "X", args, target, runtime));
            let (x, y) = fenced_xy(target.x() + dx, target.y(), target, runtime);
            target.set_xy(x, y);
        }
        "motion_changeyby" => {
            let dy = value::cast_number(&input_value(inputs, "Y", args, target, runtime));
            let (x, y) = fenced_xy(target.x(), target.y() + dy, target, runtime);
            target.set_xy(x, y);
        }
        _ => {}
    }
}

fn eval_expr(expr: &Expr, args: &[Value], target: &mut dyn Target, runtime: &mut dyn Runtime) -> Value {
    match expr {
        Expr::Constant(v) => v.clone(),
        Expr::Arg(idx) => args.get(*idx).cloned().unwrap_or(Value::Number(0.0)),
        Expr::CastBoolean(inner) => Value::Boolean(value::cast_boolean(&eval_expr(inner, args, target, runtime))),
        Expr::CastNumber(inner) => Value::Number(value::cast_number(&eval_expr(inner, args, target, runtime))),
        Expr::CastNumberOrNan(inner) => Value::Number(value::cast_number_or_nan(&eval_expr(inner, args, target, runtime))),
        Expr::CastString(inner) => Value::String(value::cast_string(&eval_expr(inner, args, target, runtime))),
        Expr::Operator { opcode, operands } => eval_operator(opcode, operands, args, target, runtime),
        Expr::VariableRead { id } => target.variable(id),
        Expr::ListReporter { opcode, list_id, operands } => eval_list_reporter(opcode, list_id, operands, args, target, runtime),
        Expr::SensingReporter { opcode, operands, .. } => eval_sensing(opcode, operands, args, target, runtime),
        Expr::PropertyOf { target: inner, .. } => eval_expr(inner, args, target, runtime),
        Expr::UnknownNoOp => Value::Number(0.0),
    }
}

fn eval_operator(opcode: &str, operands: &[Expr], args: &[Value], target: &mut dyn Target, runtime: &mut dyn Runtime) -> Value {
    let vals: Vec<Value> = operands.iter().map(|o| eval_expr(o, args, target, runtime)).collect();
    let num = |i: usize| value::cast_number_or_nan(&vals[i]);
    match opcode {
        "operator_add" => Value::Number(num(0) + num(1)),
        "operator_subtract" => Value::Number(num(0) - num(1)),
        "operator_multiply" => Value::Number(num(0) * num(1)),
        "operator_divide" => Value::Number(num(0) / num(1)),
        "operator_mod" => Value::Number(scratch_mod(num(0), num(1))),
        "operator_equals" => Value::Boolean(value::compare(&vals[0], &vals[1]) == 0),
        "operator_gt" => Value::Boolean(value::compare(&vals[0], &vals[1]) > 0),
        "operator_lt" => Value::Boolean(value::compare(&vals[0], &vals[1]) < 0),
        "operator_and" => Value::Boolean(value::cast_boolean(&vals[0]) && value::cast_boolean(&vals[1])),
        "operator_or" => Value::Boolean(value::cast_boolean(&vals[0]) || value::cast_boolean(&vals[1])),
        "operator_not" => Value::Boolean(!value::cast_boolean(&vals[0])),
        "operator_join" => Value::String(format!("{}{}", value::cast_string(&vals[0]), value::cast_string(&vals[1]))),
        "operator_length" => Value::Number(value::cast_string(&vals[0]).chars().count() as f64),
        other if other.starts_with("operator_mathop:") => Value::Number(apply_mathop(&other["operator_mathop:".len()..], num(0))),
        _ => Value::Number(0.0),
    }
}

fn scratch_mod(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn apply_mathop(func: &str, n: f64) -> f64 {
    match func {
        "abs" => n.abs(),
        "floor" => n.floor(),
        "ceiling" => n.ceil(),
        "sqrt" => n.sqrt(),
        "sin" => n.to_radians().sin(),
        "cos" => n.to_radians().cos(),
        "tan" => n.to_radians().tan(),
        "ln" => n.ln(),
        "log" => n.log10(),
        "e ^" => n.exp(),
        "10 ^" => 10f64.powf(n),
        _ => f64::NAN,
    }
}

/// `data_itemoflist`: 1-based indexing, with `"last"`/`"random"` field
/// values and out-of-range indices (including negative ones) yielding the
/// empty string, matching the real runtime's reporter.
fn eval_list_reporter(opcode: &str, list_id: &str, operands: &[Expr], args: &[Value], target: &mut dyn Target, runtime: &mut dyn Runtime) -> Value {
    let items = target.list(list_id);
    match opcode {
        "data_itemoflist" => {
            let Some(index_expr) = operands.first() else { return Value::String(String::new()) };
            let index_value = eval_expr(index_expr, args, target, runtime);
            let index_str = value::cast_string(&index_value);
            let idx = match index_str.as_str() {
                "last" => items.len(),
                "random" => {
                    if items.is_empty() {
                        0
                    } else {
                        let seed = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.subsec_nanos())
                            .unwrap_or(0);
                        1 + (seed as usize % items.len())
                    }
                }
                _ => value::cast_number(&index_value).floor() as i64 as usize,
            };
            if idx == 0 || idx > items.len() {
                Value::String(String::new())
            } else {
                items[idx - 1].clone()
            }
        }
        "data_listcontents" => Value::String(items.iter().map(value::cast_string).collect::<Vec<_>>().join(" ")),
        _ => Value::String(String::new()),
    }
}

fn eval_sensing(opcode: &str, operands: &[Expr], args: &[Value], target: &mut dyn Target, runtime: &mut dyn Runtime) -> Value {
    match opcode {
        "sensing_mousex" => Value::Number(runtime.mouse_x()),
        "sensing_mousey" => Value::Number(runtime.mouse_y()),
        "sensing_timer" => Value::Number(runtime.timer()),
        "sensing_keypressed" => {
            let key = operands.first().map(|e| value::cast_string(&eval_expr(e, args, target, runtime))).unwrap_or_default();
            Value::Boolean(runtime.is_key_pressed(&key))
        }
        "sensing_distanceto" => {
            let (mx, my) = (runtime.mouse_x(), runtime.mouse_y());
            Value::Number(((target.x() - mx).powi(2) + (target.y() - my).powi(2)).sqrt())
        }
        _ => Value::Number(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{HatKind, StackBlock};
    use std::collections::BTreeSet;

    fn script(stack: Stack) -> Script {
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
            depended_procedures: BTreeSet::new(),
        }
    }

    #[test]
    fn emitted_source_balances_control_flow_markers() {
        let s = script(vec![StackBlock::new(
            StackOp::IfElse {
                condition: Input::constant(Value::Boolean(true)),
                when_true: vec![StackBlock::new(StackOp::Wait { seconds: Input::constant(Value::Number(1.0)) }, "w1")],
                when_false: vec![],
            },
            "if1",
        )]);
        let emitted = emit_script(&s, ScriptKind::Entry, None).expect("should emit cleanly");
        assert!(emitted.source.text.contains("BEGIN"));
        assert!(emitted.source.text.contains("endif"));
    }

    #[test]
    fn action_tree_mirrors_stack_shape() {
        let s = script(vec![StackBlock::new(
            StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value: Input::constant(Value::Number(1.0)) },
            "s1",
        )]);
        let emitted = emit_script(&s, ScriptKind::Entry, None).unwrap();
        assert_eq!(emitted.actions.len(), 2);
        assert!(matches!(emitted.actions[0], Action::Yield));
        assert!(matches!(emitted.actions[1], Action::SetVariableTo { .. }));
    }

    #[test]
    fn validate_reload_rejects_hand_built_unbalanced_text() {
        assert!(validate_reload("BEGIN entry script\nif foo\n").is_err());
        assert!(validate_reload("BEGIN entry script\nif foo\nendif\nEND entry script\n").is_ok());
    }
}
