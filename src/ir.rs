//! Intermediate representation (component B).
//!
//! A typed tree abstracting over the raw block graph's JSON shape, and the
//! optimizer's four primary tools: `is_constant`, `is_always_type`,
//! `is_sometimes_type`, `to_type`. Generalizes the teacher's flat
//! stack-machine `ast.rs` (`OpCode`/`Stmt`/`Program`) into a tree where
//! control flow carries its sub-stacks as named fields instead of `next`
//! links, and every input node carries a type bound (invariant 1 in §3).

use crate::project::Scope;
use crate::value::{classify, Type, Value};
use std::collections::BTreeMap;

/// The opcode space for *input* nodes (reporters, casts, literals) — kept
/// distinct from `StackOp` per §3, since an input and a stack block are
/// never interchangeable positions in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOp {
    Constant(Value),
    ArgRef(String),
    CastBoolean(Box<Input>),
    CastNumber(Box<Input>),
    CastNumberOrNan(Box<Input>),
    CastString(Box<Input>),
    /// `operator_*` arithmetic/string/comparison blocks and sensing/list
    /// reporters, keyed by opcode string with positional operand inputs.
    Operator {
        opcode: String,
        operands: Vec<Input>,
    },
    VariableRead { id: String, name: String, scope: Scope },
    /// `data_itemoflist`-style reporter needing the list id plus an index
    /// expression (which may itself be `"last"`/`"random"`/a number).
    ListReporter {
        opcode: String,
        list_id: String,
        operands: Vec<Input>,
    },
    /// `sensing_*` reporters that read host/runtime state (mouse position,
    /// timer, "distance to", etc.) — opaque to the optimizer beyond their
    /// declared output type.
    SensingReporter {
        opcode: String,
        operands: Vec<Input>,
    },
    /// `*_property_of` style reporters (e.g. `sensing_of`).
    PropertyOf {
        property: String,
        target: Box<Input>,
    },
    /// A reporter opcode the generator does not recognize. Type is always
    /// `ANY` (invariant 1's overapproximation) and the node is never
    /// treated as constant, so the optimizer leaves it alone.
    UnknownNoOp(String),
}

/// One input expression node: an opcode plus its static type bound.
/// Inputs form a tree — no sharing (§4.B contract).
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub op: InputOp,
    pub ty: Type,
    /// True iff evaluating this subtree may suspend the enclosing task
    /// (only true for a handful of blocking sensing reporters — see §4.C
    /// step 6; most input subtrees are pure and never yield).
    pub yields: bool,
}

impl Input {
    pub fn constant(v: Value) -> Self {
        let ty = match &v {
            Value::Number(n) => classify(*n),
            Value::String(_) => Type::STRING,
            Value::Boolean(_) => Type::BOOLEAN,
        };
        Input { op: InputOp::Constant(v), ty, yields: false }
    }

    pub fn new(op: InputOp, ty: Type) -> Self {
        Input { op, ty, yields: false }
    }

    pub fn yielding(mut self) -> Self {
        self.yields = true;
        self
    }

    /// `isConstant(input, value)`: true iff this node is exactly the
    /// literal `value`.
    pub fn is_constant(&self, value: &Value) -> bool {
        matches!(&self.op, InputOp::Constant(v) if v == value)
    }

    /// Any constant at all, regardless of which one.
    pub fn as_constant(&self) -> Option<&Value> {
        match &self.op {
            InputOp::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_always_type(&self, t: Type) -> bool {
        self.ty.is_always(t)
    }

    pub fn is_sometimes_type(&self, t: Type) -> bool {
        self.ty.is_sometimes(t)
    }
}

/// `toType(input, T)`: a no-op if already of type `T`, a folded constant if
/// the argument is itself constant, otherwise a wrapping cast node.
/// Invariant 2 (§3): the result's type is always exactly `T`.
pub fn to_type(input: Input, target: Type, cast_ctor: CastCtor) -> Input {
    if input.ty.is_always(target) {
        return Input { ty: target, ..input };
    }
    if let Some(folded) = fold_cast(&input, target) {
        return folded;
    }
    let yields = input.yields;
    let op = cast_ctor(Box::new(input));
    Input { op, ty: target, yields }
}

pub type CastCtor = fn(Box<Input>) -> InputOp;

fn fold_cast(input: &Input, target: Type) -> Option<Input> {
    let v = input.as_constant()?;
    if target.is_always(Type::BOOLEAN) {
        Some(Input::constant(Value::Boolean(crate::value::cast_boolean(v))))
    } else if target.is_always(Type::NUMBER_OR_NAN) && !target.is_always(Type::NUMBER) {
        Some(Input::constant(Value::Number(crate::value::cast_number_or_nan(v))))
    } else if target.is_always(Type::NUMBER) {
        Some(Input::constant(Value::Number(crate::value::cast_number(v))))
    } else if target.is_always(Type::STRING) {
        Some(Input::constant(Value::String(crate::value::cast_string(v))))
    } else {
        None
    }
}

/// The opcode space for *stack* blocks (statements): motion, looks,
/// control, data, sensing, sound, pen, events, procedures. Control-flow
/// blocks carry sub-stacks as named fields rather than `next` links
/// (§4.B contract).
#[derive(Debug, Clone, PartialEq)]
pub enum StackOp {
    /// A block with no special control-flow shape: opcode name plus
    /// positional/named inputs, lowered generically (motion, looks, sound,
    /// pen, most `data_*` and `event_*` blocks).
    Simple { opcode: String, inputs: BTreeMap<String, Input> },
    SetVariableTo { id: String, name: String, scope: Scope, value: Input },
    ChangeVariableBy { id: String, name: String, scope: Scope, delta: Input },
    IfElse { condition: Input, when_true: Stack, when_false: Stack },
    RepeatCount { count: Input, do_body: Stack },
    Forever { do_body: Stack },
    RepeatUntil { condition: Input, do_body: Stack },
    Wait { seconds: Input },
    WaitUntil { condition: Input },
    Stop { mode: StopMode },
    BroadcastAndWait { broadcast: Input },
    /// A resolved call to a procedure variant. `variant` is the memoized
    /// key the driver will look the compiled artifact up by.
    ProcedureCall { variant: ProcedureVariantId, args: Vec<Input> },
    ProcedureReturn { value: Input },
    /// A no-op substituted for an opcode the generator did not recognize,
    /// or for a block whose inputs were too malformed to lower (§7 kinds 1
    /// and 2). `diagnostic_opcode` is kept for the emitter's debug trace.
    UnknownNoOp { diagnostic_opcode: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    All,
    ThisScript,
    OtherScriptsInSprite,
}

/// One stack block: opcode, yield flag, and (after the optimizer has run)
/// the entry/exit type-state snapshots used to check invariant 3.
#[derive(Debug, Clone, PartialEq)]
pub struct StackBlock {
    pub op: StackOp,
    pub yields: bool,
    pub source_id: String,
}

impl StackBlock {
    pub fn new(op: StackOp, source_id: impl Into<String>) -> Self {
        StackBlock { op, yields: false, source_id: source_id.into() }
    }
}

/// An ordered sequence of stack blocks.
pub type Stack = Vec<StackBlock>;

/// `(procedure_code, warp_bool)` — a compile-time specialization key
/// (Design Notes: "use a small struct... not string concatenation").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct ProcedureVariantId {
    pub proc_code: String,
    pub warp: bool,
}

/// Whether a hat is re-evaluated every tick by the scheduler (`Condition`,
/// e.g. `control_when_greater_than`) or fires once per trigger and is
/// lowered into the script body (`Executable`, e.g. flag-clicked).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatKind {
    Executable,
    Condition,
}

/// A script: either a hat-rooted top-level stack, or a procedure variant's
/// body, plus the flags the emitter needs.
#[derive(Debug, Clone)]
pub struct Script {
    pub stack: Stack,
    pub procedure_code: Option<String>,
    pub argument_names: Vec<String>,
    pub argument_defaults: Vec<Value>,
    pub yields: bool,
    pub warp: bool,
    pub warp_timer: bool,
    pub hat: Option<HatKind>,
    pub is_procedure: bool,
    pub depended_procedures: std::collections::BTreeSet<ProcedureVariantId>,
}

impl Script {
    pub fn has_hat(&self) -> bool {
        self.hat.is_some()
    }

    pub fn hat_is_executable(&self) -> bool {
        matches!(self.hat, Some(HatKind::Executable))
    }
}

/// The full IR for one entry script: the entry itself plus every procedure
/// variant transitively reachable from it.
#[derive(Debug, Clone)]
pub struct Ir {
    pub entry: Script,
    pub procedures: BTreeMap<ProcedureVariantId, Script>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_type_is_noop_when_already_subtype() {
        let input = Input::new(InputOp::ArgRef("x".into()), Type::NUMBER);
        let out = to_type(input.clone(), Type::NUMBER_OR_NAN, InputOp::CastNumberOrNan);
        assert_eq!(out.ty, Type::NUMBER_OR_NAN);
        // still the same underlying op, just retyped — no cast wrapper
        assert_eq!(out.op, input.op);
    }

    #[test]
    fn to_type_folds_constants() {
        let input = Input::constant(Value::string("abc"));
        let out = to_type(input, Type::NUMBER_OR_NAN, InputOp::CastNumberOrNan);
        match out.op {
            InputOp::Constant(Value::Number(n)) => assert!(n.is_nan()),
            other => panic!("expected folded constant, got {other:?}"),
        }
    }

    #[test]
    fn to_type_wraps_non_constant_non_subtype() {
        let input = Input::new(InputOp::ArgRef("x".into()), Type::STRING);
        let out = to_type(input, Type::NUMBER, InputOp::CastNumber);
        assert!(matches!(out.op, InputOp::CastNumber(_)));
        assert_eq!(out.ty, Type::NUMBER);
    }
}
