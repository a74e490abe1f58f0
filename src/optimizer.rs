//! Type-directed optimizer (component D).
//!
//! A flat type-state map plus a one-fixed-point rewrite pass: cast
//! elimination, constant folding, dead-branch elimination, loop
//! simplification, comparison rewriting, and variable-caching hints.
//! Generalizes the teacher's `OptLevel`/`OptStats`/fused-instruction
//! shape (peephole passes over a flat `Vec<Stmt>`) into a fix-point pass
//! over the IR tree, reusing its "count each rewrite kind applied" stats
//! idea and its `types.rs` lattice-propagation shape for the type-state
//! map.

use crate::ir::*;
use crate::project::Scope;
use crate::typestate::{StateKey, TypeState};
use crate::value::{self, Type, Value};
use std::collections::BTreeSet;

/// Counts of each rewrite kind applied, for diagnostics — mirrors the
/// teacher's `OptStats`.
#[derive(Debug, Clone, Default)]
pub struct OptStats {
    pub casts_eliminated: usize,
    pub constants_folded: usize,
    pub dead_branches_removed: usize,
    pub loops_simplified: usize,
    pub passes_run: usize,
}

/// Variable/list references the final IR touches, annotated for the
/// emitter's variable-cache hoisting (§4.D rewrite 6).
#[derive(Debug, Clone, Default)]
pub struct CacheHints {
    pub variables: BTreeSet<(Scope, String, String)>,
    pub lists: BTreeSet<String>,
}

pub struct Optimizer {
    pub stats: OptStats,
}

impl Optimizer {
    pub fn new() -> Self {
        Optimizer { stats: OptStats::default() }
    }

    /// Run the rewrite pass to a fix-point (bounded — the lattice has
    /// finite height and every rewrite is monotonically type-narrowing or
    /// size-reducing, so this always terminates; in practice one or two
    /// iterations saturate it, matching §4.D's "one re-iteration is
    /// sufficient" note).
    pub fn optimize_script(&mut self, script: &mut Script) -> CacheHints {
        loop {
            self.stats.passes_run += 1;
            let entry = TypeState::top();
            let mut changed = false;
            let new_stack = self.optimize_stack(std::mem::take(&mut script.stack), entry, &mut changed);
            script.stack = new_stack;
            if !changed {
                break;
            }
        }
        let mut hints = CacheHints::default();
        collect_cache_hints(&script.stack, &mut hints);
        hints
    }

    fn optimize_stack(&mut self, stack: Stack, mut state: TypeState, changed: &mut bool) -> Stack {
        let mut out = Vec::with_capacity(stack.len());
        for mut block in stack {
            state = self.transfer(&mut block, state, changed);
            if is_effective_noop(&block.op) {
                continue;
            }
            out.push(block);
        }
        out
    }

    fn transfer(&mut self, block: &mut StackBlock, state: TypeState, changed: &mut bool) -> TypeState {
        let mut state = state;
        rewrite_op(&mut block.op, changed, &mut self.stats);
        match &mut block.op {
            StackOp::SetVariableTo { id, scope, value, .. } => {
                state.set(StateKey::Variable { scope: *scope, id: id.clone() }, value.ty);
            }
            StackOp::ChangeVariableBy { id, scope, .. } => {
                state.widen(StateKey::Variable { scope: *scope, id: id.clone() }, Type::NUMBER_OR_NAN);
            }
            StackOp::Simple { opcode, .. } => apply_simple_transfer(opcode, &mut state),
            StackOp::IfElse { when_true, when_false, .. } => {
                let true_state = state.clone();
                let false_state = state.clone();
                let mut true_changed = false;
                let mut false_changed = false;
                let new_true = self.optimize_stack(std::mem::take(when_true), true_state, &mut true_changed);
                let new_false = self.optimize_stack(std::mem::take(when_false), false_state, &mut false_changed);
                if true_changed || false_changed {
                    *changed = true;
                }
                let true_exit = body_exit_state(&new_true, &state);
                let false_exit = body_exit_state(&new_false, &state);
                *when_true = new_true;
                *when_false = new_false;
                state = true_exit.join(&false_exit);
            }
            StackOp::RepeatCount { do_body, .. } | StackOp::Forever { do_body } | StackOp::RepeatUntil { do_body, .. } => {
                // Loop-carried fix-point to one re-iteration (§4.D: joins
                // are idempotent once the lattice saturates, so a single
                // extra pass over the body is sufficient).
                let mut first_pass_changed = false;
                let once = self.optimize_stack(do_body.clone(), state.clone(), &mut first_pass_changed);
                let exit_once = body_exit_state(&once, &state);
                let loop_entry = state.join(&exit_once);
                let mut second_pass_changed = false;
                let twice = self.optimize_stack(once, loop_entry.clone(), &mut second_pass_changed);
                if first_pass_changed || second_pass_changed {
                    *changed = true;
                }
                let exit_twice = body_exit_state(&twice, &loop_entry);
                *do_body = twice;
                state = loop_entry.join(&exit_twice);
            }
            StackOp::ProcedureCall { .. } => {
                // Worst-case transfer: an unanalyzed callee may mutate any
                // slot (§4.D).
                state.clobber_all();
            }
            StackOp::Wait { .. }
            | StackOp::WaitUntil { .. }
            | StackOp::Stop { .. }
            | StackOp::BroadcastAndWait { .. }
            | StackOp::ProcedureReturn { .. }
            | StackOp::UnknownNoOp { .. } => {}
        }
        state
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// The type-state map only records per-slot types, not a full per-block
/// trace, so a body's exit state is recomputed by replaying its
/// already-rewritten blocks' transfer functions starting from the given
/// entry state, rather than threading a second return value through every
/// recursive call.
fn body_exit_state(body: &Stack, entry: &TypeState) -> TypeState {
    let mut state = entry.clone();
    for block in body {
        state = transfer_readonly(&block.op, state);
    }
    state
}

/// Same per-opcode transfer as `Optimizer::transfer`, without mutating the
/// op or attempting further rewrites.
fn transfer_readonly(op: &StackOp, mut state: TypeState) -> TypeState {
    match op {
        StackOp::SetVariableTo { id, scope, value, .. } => {
            state.set(StateKey::Variable { scope: *scope, id: id.clone() }, value.ty);
        }
        StackOp::ChangeVariableBy { id, scope, .. } => {
            state.widen(StateKey::Variable { scope: *scope, id: id.clone() }, Type::NUMBER_OR_NAN);
        }
        StackOp::Simple { opcode, .. } => apply_simple_transfer(opcode, &mut state),
        StackOp::IfElse { when_true, when_false, .. } => {
            state = body_exit_state(when_true, &state).join(&body_exit_state(when_false, &state));
        }
        StackOp::RepeatCount { do_body, .. } | StackOp::Forever { do_body } | StackOp::RepeatUntil { do_body, .. } => {
            let exit = body_exit_state(do_body, &state);
            state = state.join(&exit);
        }
        StackOp::ProcedureCall { .. } => state.clobber_all(),
        StackOp::Wait { .. }
        | StackOp::WaitUntil { .. }
        | StackOp::Stop { .. }
        | StackOp::BroadcastAndWait { .. }
        | StackOp::ProcedureReturn { .. }
        | StackOp::UnknownNoOp { .. } => {}
    }
    state
}

fn apply_simple_transfer(opcode: &str, state: &mut TypeState) {
    match opcode {
        "motion_setx" | "motion_gotoxy" => state.set(StateKey::SpriteX, Type::NUMBER),
        "motion_sety" => state.set(StateKey::SpriteY, Type::NUMBER),
        "motion_setdir" => state.set(StateKey::SpriteDirection, Type::NUMBER),
        "motion_changexby" => {
            if state.get(&StateKey::SpriteX).is_always(Type::NUMBER) {
                state.set(StateKey::SpriteX, Type::NUMBER);
            }
        }
        "motion_changeyby" => {
            if state.get(&StateKey::SpriteY).is_always(Type::NUMBER) {
                state.set(StateKey::SpriteY, Type::NUMBER);
            }
        }
        _ => {}
    }
}

/// A block that the rewrite pass has reduced to having no observable
/// effect: an if/if-else whose body is empty after dead-branch folding, or
/// a repeat whose count is statically non-positive.
fn is_effective_noop(op: &StackOp) -> bool {
    matches!(op, StackOp::UnknownNoOp { diagnostic_opcode } if diagnostic_opcode == "__folded_noop__")
}

fn mark_folded_noop(op: &mut StackOp) {
    *op = StackOp::UnknownNoOp { diagnostic_opcode: "__folded_noop__".to_string() };
}

/// Apply the per-block rewrites (1-5 of §4.D) to a single stack op, and
/// recursively to its input subtrees. Branch/loop bodies themselves are
/// rewritten by the caller (`Optimizer::transfer`), which carries the
/// type-state needed to recurse correctly; this only touches the op's own
/// inputs and folds/collapses the op's own shape.
fn rewrite_op(op: &mut StackOp, changed: &mut bool, stats: &mut OptStats) {
    match op {
        StackOp::Simple { inputs, .. } => {
            for input in inputs.values_mut() {
                rewrite_input(input, changed, stats);
            }
        }
        StackOp::SetVariableTo { value, .. } => rewrite_input(value, changed, stats),
        StackOp::ChangeVariableBy { delta, .. } => rewrite_input(delta, changed, stats),
        StackOp::IfElse { condition, when_true, when_false } => {
            rewrite_input(condition, changed, stats);
            // Already in splice_as_simple_block's canonical shape (constant-true
            // condition, no else arm) — folding again would be a no-op that
            // keeps reporting `changed`, which never lets the fix-point loop
            // in `optimize_script` settle.
            let already_folded = when_false.is_empty() && matches!(condition.as_constant(), Some(Value::Boolean(true)));
            if !already_folded {
                if let Some(v) = condition.as_constant() {
                    let taken = if value::cast_boolean(v) { std::mem::take(when_true) } else { std::mem::take(when_false) };
                    if taken.is_empty() {
                        mark_folded_noop(op);
                    } else {
                        *op = splice_as_simple_block(taken);
                    }
                    stats.dead_branches_removed += 1;
                    *changed = true;
                }
            }
        }
        StackOp::RepeatCount { count, do_body } => {
            rewrite_input(count, changed, stats);
            if let Some(Value::Number(n)) = count.as_constant() {
                if *n <= 0.0 {
                    mark_folded_noop(op);
                    stats.dead_branches_removed += 1;
                    *changed = true;
                    return;
                }
            }
            let _ = do_body;
        }
        StackOp::Forever { .. } => {}
        StackOp::RepeatUntil { condition, do_body } => {
            rewrite_input(condition, changed, stats);
            if let Some(v) = condition.as_constant() {
                if value::cast_boolean(v) {
                    // constant-true: loop body never runs.
                    mark_folded_noop(op);
                } else {
                    // constant-false: degenerates to an unconditional loop.
                    *op = StackOp::Forever { do_body: std::mem::take(do_body) };
                }
                stats.loops_simplified += 1;
                *changed = true;
            }
        }
        StackOp::Wait { seconds } => rewrite_input(seconds, changed, stats),
        StackOp::WaitUntil { condition } => rewrite_input(condition, changed, stats),
        StackOp::BroadcastAndWait { broadcast } => rewrite_input(broadcast, changed, stats),
        StackOp::ProcedureCall { args, .. } => {
            for arg in args {
                rewrite_input(arg, changed, stats);
            }
        }
        StackOp::ProcedureReturn { value } => rewrite_input(value, changed, stats),
        StackOp::Stop { .. } | StackOp::UnknownNoOp { .. } => {}
    }
}

/// `control_if`/`control_if_else` fold to "just run this body" — there is
/// no standalone "inline sub-stack" stack-op, so this is modeled as an
/// always-true `IfElse` whose condition is the constant `true` and whose
/// `when_false` is empty; the emitter recognizes the shape and emits the
/// body unconditionally, so no reference to the untaken branch ever
/// survives into the emitted output (§8.3's dead-branch scenario).
fn splice_as_simple_block(body: Stack) -> StackOp {
    StackOp::IfElse { condition: Input::constant(Value::Boolean(true)), when_true: body, when_false: Vec::new() }
}

fn rewrite_input(input: &mut Input, changed: &mut bool, stats: &mut OptStats) {
    match &mut input.op {
        InputOp::CastBoolean(inner) | InputOp::CastNumber(inner) | InputOp::CastNumberOrNan(inner) | InputOp::CastString(inner) => {
            rewrite_input(inner, changed, stats);
        }
        InputOp::Operator { operands, .. } | InputOp::SensingReporter { operands, .. } => {
            for operand in operands.iter_mut() {
                rewrite_input(operand, changed, stats);
            }
        }
        InputOp::ListReporter { operands, .. } => {
            for operand in operands.iter_mut() {
                rewrite_input(operand, changed, stats);
            }
        }
        InputOp::PropertyOf { target, .. } => rewrite_input(target, changed, stats),
        InputOp::Constant(_) | InputOp::ArgRef(_) | InputOp::VariableRead { .. } | InputOp::UnknownNoOp(_) => {}
    }

    // Cast elimination (rewrite 1): after recursing, the child may now be
    // narrow enough that the cast itself is redundant.
    if let Some(target) = cast_target(&input.op) {
        let inner_ty = cast_inner(&input.op).map(|i| i.ty);
        if let Some(inner_ty) = inner_ty {
            if inner_ty.is_always(target) {
                let inner = take_cast_inner(&mut input.op);
                *input = Input { ty: target, ..inner };
                stats.casts_eliminated += 1;
                *changed = true;
                return;
            }
        }
    }

    // Constant folding (rewrite 2). Comparisons between two statically
    // numeric (but non-literal) operands are left as `Operator` nodes: the
    // type already recorded on each operand tells the emitter it may use a
    // native numeric compare instead of the general string-fallback path
    // (rewrite 5), so no separate IR shape is needed for that case.
    if let Some(folded) = try_fold(&input.op) {
        *input = folded;
        stats.constants_folded += 1;
        *changed = true;
    }
}

fn cast_target(op: &InputOp) -> Option<Type> {
    match op {
        InputOp::CastBoolean(_) => Some(Type::BOOLEAN),
        InputOp::CastNumber(_) => Some(Type::NUMBER),
        InputOp::CastNumberOrNan(_) => Some(Type::NUMBER_OR_NAN),
        InputOp::CastString(_) => Some(Type::STRING),
        _ => None,
    }
}

fn cast_inner(op: &InputOp) -> Option<&Input> {
    match op {
        InputOp::CastBoolean(b) | InputOp::CastNumber(b) | InputOp::CastNumberOrNan(b) | InputOp::CastString(b) => Some(b),
        _ => None,
    }
}

fn take_cast_inner(op: &mut InputOp) -> Input {
    let placeholder = InputOp::Constant(Value::Number(0.0));
    match std::mem::replace(op, placeholder) {
        InputOp::CastBoolean(b) | InputOp::CastNumber(b) | InputOp::CastNumberOrNan(b) | InputOp::CastString(b) => *b,
        _ => unreachable!("take_cast_inner called on a non-cast op"),
    }
}

/// Evaluate an operator node whose every input is already constant, using
/// the exact value-semantics of component A, so the folded result agrees
/// bit-for-bit with what the runtime helper would produce (§8 universal
/// invariant).
fn try_fold(op: &InputOp) -> Option<Input> {
    match op {
        InputOp::CastBoolean(inner) => inner.as_constant().map(|v| Input::constant(Value::Boolean(value::cast_boolean(v)))),
        InputOp::CastNumber(inner) => inner.as_constant().map(|v| Input::constant(Value::Number(value::cast_number(v)))),
        InputOp::CastNumberOrNan(inner) => {
            inner.as_constant().map(|v| Input::constant(Value::Number(value::cast_number_or_nan(v))))
        }
        InputOp::CastString(inner) => inner.as_constant().map(|v| Input::constant(Value::String(value::cast_string(v)))),
        InputOp::Operator { opcode, operands } => fold_operator(opcode, operands),
        _ => None,
    }
}

fn fold_operator(opcode: &str, operands: &[Input]) -> Option<Input> {
    let values: Option<Vec<&Value>> = operands.iter().map(|i| i.as_constant()).collect();
    let values = values?;
    let num = |i: usize| value::cast_number_or_nan(values[i]);
    let result = match opcode {
        "operator_add" => Value::Number(num(0) + num(1)),
        "operator_subtract" => Value::Number(num(0) - num(1)),
        "operator_multiply" => Value::Number(num(0) * num(1)),
        "operator_divide" => Value::Number(num(0) / num(1)),
        "operator_mod" => Value::Number(scratch_mod(num(0), num(1))),
        "operator_equals" => Value::Boolean(value::compare(values[0], values[1]) == 0),
        "operator_gt" => Value::Boolean(value::compare(values[0], values[1]) > 0),
        "operator_lt" => Value::Boolean(value::compare(values[0], values[1]) < 0),
        "operator_and" => Value::Boolean(value::cast_boolean(values[0]) && value::cast_boolean(values[1])),
        "operator_or" => Value::Boolean(value::cast_boolean(values[0]) || value::cast_boolean(values[1])),
        "operator_not" => Value::Boolean(!value::cast_boolean(values[0])),
        "operator_join" => Value::String(format!("{}{}", value::cast_string(values[0]), value::cast_string(values[1]))),
        "operator_length" => Value::Number(value::cast_string(values[0]).chars().count() as f64),
        other if other.starts_with("operator_mathop:") => {
            let func = &other["operator_mathop:".len()..];
            Value::Number(apply_mathop(func, num(0)))
        }
        _ => return None,
    };
    Some(Input::constant(result))
}

/// Scratch's modulo: result takes the sign of the divisor, unlike Rust's
/// `%` which takes the sign of the dividend.
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

fn collect_cache_hints(stack: &Stack, hints: &mut CacheHints) {
    for block in stack {
        match &block.op {
            StackOp::SetVariableTo { id, name, scope, value } => {
                hints.variables.insert((*scope, id.clone(), name.clone()));
                collect_input_hints(value, hints);
            }
            StackOp::ChangeVariableBy { id, name, scope, delta } => {
                hints.variables.insert((*scope, id.clone(), name.clone()));
                collect_input_hints(delta, hints);
            }
            StackOp::Simple { inputs, .. } => inputs.values().for_each(|i| collect_input_hints(i, hints)),
            StackOp::IfElse { condition, when_true, when_false } => {
                collect_input_hints(condition, hints);
                collect_cache_hints(when_true, hints);
                collect_cache_hints(when_false, hints);
            }
            StackOp::RepeatCount { count, do_body } => {
                collect_input_hints(count, hints);
                collect_cache_hints(do_body, hints);
            }
            StackOp::Forever { do_body } => collect_cache_hints(do_body, hints),
            StackOp::RepeatUntil { condition, do_body } => {
                collect_input_hints(condition, hints);
                collect_cache_hints(do_body, hints);
            }
            StackOp::Wait { seconds } => collect_input_hints(seconds, hints),
            StackOp::WaitUntil { condition } => collect_input_hints(condition, hints),
            StackOp::BroadcastAndWait { broadcast } => collect_input_hints(broadcast, hints),
            StackOp::ProcedureCall { args, .. } => args.iter().for_each(|a| collect_input_hints(a, hints)),
            StackOp::ProcedureReturn { value } => collect_input_hints(value, hints),
            StackOp::Stop { .. } | StackOp::UnknownNoOp { .. } => {}
        }
    }
}

fn collect_input_hints(input: &Input, hints: &mut CacheHints) {
    match &input.op {
        InputOp::VariableRead { id, name, scope } => {
            hints.variables.insert((*scope, id.clone(), name.clone()));
        }
        InputOp::ListReporter { list_id, operands, .. } => {
            hints.lists.insert(list_id.clone());
            operands.iter().for_each(|o| collect_input_hints(o, hints));
        }
        InputOp::CastBoolean(b) | InputOp::CastNumber(b) | InputOp::CastNumberOrNan(b) | InputOp::CastString(b) => {
            collect_input_hints(b, hints)
        }
        InputOp::Operator { operands, .. } | InputOp::SensingReporter { operands, .. } => {
            operands.iter().for_each(|o| collect_input_hints(o, hints))
        }
        InputOp::PropertyOf { target, .. } => collect_input_hints(target, hints),
        InputOp::Constant(_) | InputOp::ArgRef(_) | InputOp::UnknownNoOp(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::HatKind;
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
    fn dead_branch_folds_to_then() {
        let cond = Input::constant(Value::Boolean(true));
        let then_body = vec![StackBlock::new(
            StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value: Input::constant(Value::Number(42.0)) },
            "b1",
        )];
        let else_body = vec![StackBlock::new(
            StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value: Input::constant(Value::Number(-1.0)) },
            "b2",
        )];
        let mut s = script(vec![StackBlock::new(StackOp::IfElse { condition: cond, when_true: then_body, when_false: else_body }, "if1")]);
        let mut opt = Optimizer::new();
        opt.optimize_script(&mut s);
        assert_eq!(s.stack.len(), 1);
        match &s.stack[0].op {
            StackOp::IfElse { when_true, when_false, .. } => {
                assert!(when_false.is_empty());
                assert_eq!(when_true.len(), 1);
            }
            other => panic!("expected spliced if, got {other:?}"),
        }
        assert!(opt.stats.dead_branches_removed >= 1);
    }

    #[test]
    fn repeat_non_positive_becomes_noop() {
        let mut s = script(vec![StackBlock::new(
            StackOp::RepeatCount { count: Input::constant(Value::Number(0.0)), do_body: vec![] },
            "r1",
        )]);
        let mut opt = Optimizer::new();
        opt.optimize_script(&mut s);
        assert!(s.stack.is_empty());
    }

    #[test]
    fn constant_operator_folds() {
        let add = Input::new(
            InputOp::Operator {
                opcode: "operator_add".into(),
                operands: vec![Input::constant(Value::Number(1.0)), Input::constant(Value::Number(2.0))],
            },
            Type::NUMBER_OR_NAN,
        );
        let mut s = script(vec![StackBlock::new(
            StackOp::SetVariableTo { id: "v".into(), name: "v".into(), scope: Scope::TargetLocal, value: add },
            "s1",
        )]);
        let mut opt = Optimizer::new();
        opt.optimize_script(&mut s);
        match &s.stack[0].op {
            StackOp::SetVariableTo { value, .. } => assert_eq!(value.as_constant(), Some(&Value::Number(3.0))),
            _ => panic!("expected SetVariableTo"),
        }
    }

    #[test]
    fn cast_elimination_removes_redundant_cast() {
        let input = to_type(Input::new(InputOp::ArgRef("x".into()), Type::NUMBER), Type::NUMBER_OR_NAN, InputOp::CastNumberOrNan);
        assert_eq!(input.op, InputOp::ArgRef("x".into()));
    }

    #[test]
    fn repeat_until_constant_false_degenerates_to_forever() {
        let mut s = script(vec![StackBlock::new(
            StackOp::RepeatUntil { condition: Input::constant(Value::Boolean(false)), do_body: vec![] },
            "ru1",
        )]);
        let mut opt = Optimizer::new();
        opt.optimize_script(&mut s);
        assert!(matches!(s.stack[0].op, StackOp::Forever { .. }));
    }
}
