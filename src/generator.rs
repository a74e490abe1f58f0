//! IR generator (component C).
//!
//! Walks a raw block graph for one entry hat and produces an `Ir`:
//! resolution of `next` links, input lowering, cast insertion, hat
//! classification, procedure-variant memoization, yield marking, and
//! warp-timer detection — the seven steps of §4.C.
//!
//! Generalizes the teacher's `parser.rs` (`Parser::parse_program`,
//! `register_procedures`) from a token stream into a block-dictionary walk,
//! and reuses its "seed a memo table before recursing" trick from
//! `ast.rs::inline_procedures` to break mutual procedure recursion.

use crate::error::{CompileError, Diagnostic};
use crate::ir::*;
use crate::project::{BlockDictionary, CompressedPrimitive, InputValue, ProjectModel, RawBlock, Scope};
use crate::value::{Type, Value};
use std::collections::{BTreeMap, BTreeSet};

const EXECUTABLE_HATS: &[&str] = &[
    "event_whenflagclicked",
    "event_whenkeypressed",
    "event_whenbroadcastreceived",
    "control_startasclone",
];

const CONDITION_HATS: &[&str] = &["control_whengreaterthan", "event_whenbackdropswitchesto"];

/// Blocks whose own evaluation yields, beyond the generic
/// loop/wait/stop/call cases handled structurally below.
const BLOCKING_SENSING_REPORTERS: &[&str] = &["sensing_askandwait"];

pub struct Generator<'p> {
    project: &'p ProjectModel,
    target: String,
    diagnostics: Vec<Diagnostic>,
    procedures: BTreeMap<ProcedureVariantId, Script>,
    in_progress: BTreeSet<ProcedureVariantId>,
}

/// Result of a successful generation pass: the `Ir` plus any non-fatal
/// diagnostics collected along the way (§7 kinds 1 and 2).
pub struct GenerationOutput {
    pub ir: Ir,
    pub diagnostics: Vec<Diagnostic>,
}

impl<'p> Generator<'p> {
    pub fn new(project: &'p ProjectModel, target: impl Into<String>) -> Self {
        Generator {
            project,
            target: target.into(),
            diagnostics: Vec::new(),
            procedures: BTreeMap::new(),
            in_progress: BTreeSet::new(),
        }
    }

    fn dict(&self) -> Option<&'p BlockDictionary> {
        self.project.targets.get(&self.target)
    }

    fn stage_dict(&self) -> Option<&'p BlockDictionary> {
        self.project.targets.get("Stage")
    }

    /// Generate the full `Ir` for one hat-rooted (or procedure-rooted, for
    /// testing in isolation) entry script.
    pub fn generate_entry(mut self, entry_block_id: &str) -> Result<GenerationOutput, CompileError> {
        let dict = self
            .dict()
            .ok_or_else(|| CompileError::ParseFault { message: format!("unknown target `{}`", self.target) })?;
        let entry_block = dict.get(entry_block_id).ok_or_else(|| CompileError::ParseFault {
            message: format!("unknown entry block `{entry_block_id}`"),
        })?;

        let hat = classify_hat(&entry_block.opcode);
        let first_stmt = entry_block.next.clone();
        let mut stack = Vec::new();
        if let Some(first) = first_stmt {
            self.lower_chain(dict, &first, false, &mut stack, &mut BTreeSet::new())?;
        }
        let yields = stack_yields(&stack);
        let warp_timer = false; // entry scripts are never warp (only procedures carry warp)
        let entry = Script {
            stack,
            procedure_code: None,
            argument_names: Vec::new(),
            argument_defaults: Vec::new(),
            yields,
            warp: false,
            warp_timer,
            hat,
            is_procedure: false,
            depended_procedures: self.procedures.keys().cloned().collect(),
        };

        Ok(GenerationOutput { ir: Ir { entry, procedures: self.procedures }, diagnostics: self.diagnostics })
    }

    /// Lower a procedure body directly, for unit testing the generator
    /// against a bare `procedures_definition` without an enclosing hat.
    pub fn generate_procedure(
        mut self,
        definition_block_id: &str,
        call_site_warp: bool,
    ) -> Result<GenerationOutput, CompileError> {
        let dict = self
            .dict()
            .ok_or_else(|| CompileError::ParseFault { message: format!("unknown target `{}`", self.target) })?;
        let def_block = dict.get(definition_block_id).ok_or_else(|| CompileError::ParseFault {
            message: format!("unknown definition block `{definition_block_id}`"),
        })?;
        let mutation = def_block.mutation.clone().ok_or_else(|| CompileError::ParseFault {
            message: "procedures_definition missing mutation".to_string(),
        })?;
        let variant = ProcedureVariantId { proc_code: mutation.proc_code.clone(), warp: call_site_warp };
        self.generate_procedure_variant(dict, def_block, &variant)?;
        let entry = self.procedures.get(&variant).cloned().ok_or_else(|| CompileError::ParseFault {
            message: "procedure generation did not populate its own variant".to_string(),
        })?;
        Ok(GenerationOutput { ir: Ir { entry, procedures: self.procedures.clone() }, diagnostics: self.diagnostics })
    }

    /// Resolve and (if needed) generate a procedure variant, memoizing
    /// before recursing so direct/mutual recursion terminates (invariant 6).
    fn resolve_variant(&mut self, proc_code: &str, call_site_warp: bool) -> Result<ProcedureVariantId, CompileError> {
        let variant = ProcedureVariantId { proc_code: proc_code.to_string(), warp: call_site_warp };
        if self.procedures.contains_key(&variant) || self.in_progress.contains(&variant) {
            return Ok(variant);
        }
        let (dict, def_block) = self
            .find_definition(proc_code)
            .ok_or_else(|| CompileError::ParseFault { message: format!("no definition for proccode `{proc_code}`") })?;
        self.generate_procedure_variant(dict, &def_block, &variant)?;
        Ok(variant)
    }

    fn find_definition(&self, proc_code: &str) -> Option<(&'p BlockDictionary, RawBlock)> {
        for dict in [self.dict(), self.stage_dict()].into_iter().flatten() {
            for block in dict.in_declaration_order() {
                if block.opcode == "procedures_definition" {
                    if let Some(m) = &block.mutation {
                        if m.proc_code == proc_code {
                            return Some((dict, block.clone()));
                        }
                    }
                }
            }
        }
        None
    }

    fn generate_procedure_variant(
        &mut self,
        dict: &'p BlockDictionary,
        def_block: &RawBlock,
        variant: &ProcedureVariantId,
    ) -> Result<(), CompileError> {
        self.in_progress.insert(variant.clone());
        let mutation = def_block.mutation.clone().ok_or_else(|| CompileError::ParseFault {
            message: "procedures_definition missing mutation".to_string(),
        })?;
        let effective_warp = variant.warp || mutation.warp;

        let mut stack = Vec::new();
        if let Some(first) = &def_block.next {
            self.lower_chain(dict, first, effective_warp, &mut stack, &mut BTreeSet::new())?;
        }
        let yields = stack_yields(&stack);
        let warp_timer = effective_warp && contains_loop(&stack);
        let depended: BTreeSet<ProcedureVariantId> = self.procedures.keys().cloned().collect();

        let script = Script {
            stack,
            procedure_code: Some(mutation.proc_code.clone()),
            argument_names: mutation.argument_names.clone(),
            argument_defaults: mutation
                .argument_defaults
                .iter()
                .map(|d| Value::String(d.clone()))
                .collect(),
            yields,
            warp: effective_warp,
            warp_timer,
            hat: None,
            is_procedure: true,
            depended_procedures: depended,
        };
        self.in_progress.remove(variant);
        self.procedures.insert(variant.clone(), script);
        Ok(())
    }

    /// Follow `next` links starting at `block_id`, lowering each stack
    /// block in turn. `visited` guards against a circular `next` chain
    /// (§4.C failure mode: "circular parent/next links are rejected").
    fn lower_chain(
        &mut self,
        dict: &'p BlockDictionary,
        block_id: &str,
        warp: bool,
        out: &mut Stack,
        visited: &mut BTreeSet<String>,
    ) -> Result<(), CompileError> {
        let mut cursor = Some(block_id.to_string());
        while let Some(id) = cursor {
            if !visited.insert(id.clone()) {
                return Err(CompileError::ParseFault { message: format!("circular next-link at block `{id}`") });
            }
            let Some(block) = dict.get(&id) else {
                self.diagnostics.push(Diagnostic::MalformedInput {
                    detail: "next pointer referenced a missing block".to_string(),
                    source_id: id.clone(),
                });
                break;
            };
            let lowered = self.lower_stack_block(dict, block, warp)?;
            out.push(lowered);
            cursor = block.next.clone();
        }
        Ok(())
    }

    fn lower_substack(&mut self, dict: &'p BlockDictionary, id: &Option<String>, warp: bool) -> Result<Stack, CompileError> {
        let mut stack = Vec::new();
        if let Some(id) = id {
            self.lower_chain(dict, id, warp, &mut stack, &mut BTreeSet::new())?;
        }
        Ok(stack)
    }

    fn substack_ref(&self, block: &RawBlock, name: &str) -> Option<String> {
        match block.inputs.get(name).map(|i| &i.value) {
            Some(InputValue::BlockRef(id)) => Some(id.clone()),
            _ => None,
        }
    }

    fn lower_stack_block(&mut self, dict: &'p BlockDictionary, block: &RawBlock, warp: bool) -> Result<StackBlock, CompileError> {
        let op = self.lower_stack_op(dict, block, warp)?;
        let own_yields = stack_op_self_yields(&op, warp);
        let subtree_yields = stack_op_subtree_yields(&op);
        Ok(StackBlock { op, yields: own_yields || subtree_yields, source_id: block.id.clone() })
    }

    fn lower_stack_op(&mut self, dict: &'p BlockDictionary, block: &RawBlock, warp: bool) -> Result<StackOp, CompileError> {
        let opcode = block.opcode.as_str();
        match opcode {
            "motion_movesteps" => Ok(StackOp::Simple {
                opcode: opcode.to_string(),
                inputs: self.one_input(dict, block, "STEPS", Type::NUMBER)?,
            }),
            "motion_setx" | "motion_sety" | "motion_setdir" | "motion_changexby" | "motion_changeyby" => {
                let key = match opcode {
                    "motion_setx" | "motion_changexby" => "X",
                    "motion_sety" | "motion_changeyby" => "Y",
                    _ => "DIRECTION",
                };
                Ok(StackOp::Simple { opcode: opcode.to_string(), inputs: self.one_input(dict, block, key, Type::NUMBER)? })
            }
            "motion_gotoxy" => {
                let mut inputs = BTreeMap::new();
                inputs.insert("X".to_string(), self.lower_input_slot(dict, block, "X", Type::NUMBER)?);
                inputs.insert("Y".to_string(), self.lower_input_slot(dict, block, "Y", Type::NUMBER)?);
                Ok(StackOp::Simple { opcode: opcode.to_string(), inputs })
            }
            "data_setvariableto" => {
                let (id, name) = self.variable_field(block)?;
                let scope = self.project.scope_of(&id);
                let value = self.lower_input_slot(dict, block, "VALUE", Type::ANY)?;
                Ok(StackOp::SetVariableTo { id, name, scope, value })
            }
            "data_changevariableby" => {
                let (id, name) = self.variable_field(block)?;
                let scope = self.project.scope_of(&id);
                let delta = self.lower_input_slot(dict, block, "VALUE", Type::NUMBER_OR_NAN)?;
                Ok(StackOp::ChangeVariableBy { id, name, scope, delta })
            }
            "control_if" => {
                let condition = self.lower_input_slot(dict, block, "CONDITION", Type::BOOLEAN)?;
                let body_id = self.substack_ref(block, "SUBSTACK");
                let when_true = self.lower_substack(dict, &body_id, warp)?;
                Ok(StackOp::IfElse { condition, when_true, when_false: Vec::new() })
            }
            "control_if_else" => {
                let condition = self.lower_input_slot(dict, block, "CONDITION", Type::BOOLEAN)?;
                let then_id = self.substack_ref(block, "SUBSTACK");
                let else_id = self.substack_ref(block, "SUBSTACK2");
                let when_true = self.lower_substack(dict, &then_id, warp)?;
                let when_false = self.lower_substack(dict, &else_id, warp)?;
                Ok(StackOp::IfElse { condition, when_true, when_false })
            }
            "control_repeat" => {
                let count = self.lower_input_slot(dict, block, "TIMES", Type::NUMBER)?;
                let body_id = self.substack_ref(block, "SUBSTACK");
                let do_body = self.lower_substack(dict, &body_id, warp)?;
                Ok(StackOp::RepeatCount { count, do_body })
            }
            "control_forever" => {
                let body_id = self.substack_ref(block, "SUBSTACK");
                let do_body = self.lower_substack(dict, &body_id, warp)?;
                Ok(StackOp::Forever { do_body })
            }
            "control_repeat_until" => {
                let condition = self.lower_input_slot(dict, block, "CONDITION", Type::BOOLEAN)?;
                let body_id = self.substack_ref(block, "SUBSTACK");
                let do_body = self.lower_substack(dict, &body_id, warp)?;
                Ok(StackOp::RepeatUntil { condition, do_body })
            }
            "control_wait" => Ok(StackOp::Wait { seconds: self.lower_input_slot(dict, block, "DURATION", Type::NUMBER)? }),
            "control_wait_until" => {
                Ok(StackOp::WaitUntil { condition: self.lower_input_slot(dict, block, "CONDITION", Type::BOOLEAN)? })
            }
            "control_stop" => {
                let mode = match self.field_value(block, "STOP_OPTION").as_deref() {
                    Some("this script") => StopMode::ThisScript,
                    Some("other scripts in sprite") => StopMode::OtherScriptsInSprite,
                    _ => StopMode::All,
                };
                Ok(StackOp::Stop { mode })
            }
            "event_broadcastandwait" => {
                Ok(StackOp::BroadcastAndWait { broadcast: self.lower_input_slot(dict, block, "BROADCAST_INPUT", Type::STRING)? })
            }
            "procedures_call" => {
                let mutation = block.mutation.clone().ok_or_else(|| CompileError::ParseFault {
                    message: format!("procedures_call `{}` missing mutation", block.id),
                })?;
                let variant = self.resolve_variant(&mutation.proc_code, warp)?;
                let mut args = Vec::new();
                for arg_id in &mutation.argument_ids {
                    args.push(self.lower_input_slot(dict, block, arg_id, Type::ANY)?);
                }
                Ok(StackOp::ProcedureCall { variant, args })
            }
            "procedures_return" => Ok(StackOp::ProcedureReturn { value: self.lower_input_slot(dict, block, "VALUE", Type::ANY)? }),
            _ => {
                self.diagnostics.push(Diagnostic::UnknownOpcode { opcode: opcode.to_string(), source_id: block.id.clone() });
                Ok(StackOp::UnknownNoOp { diagnostic_opcode: opcode.to_string() })
            }
        }
    }

    fn variable_field(&self, block: &RawBlock) -> Result<(String, String), CompileError> {
        let field = block.fields.get("VARIABLE").ok_or_else(|| CompileError::ParseFault {
            message: format!("block `{}` missing VARIABLE field", block.id),
        })?;
        let id = field.id.clone().ok_or_else(|| CompileError::ParseFault {
            message: format!("block `{}` VARIABLE field missing id", block.id),
        })?;
        Ok((id, field.value.clone()))
    }

    fn field_value(&self, block: &RawBlock, name: &str) -> Option<String> {
        block.fields.get(name).map(|f| f.value.clone())
    }

    fn one_input(&mut self, dict: &'p BlockDictionary, block: &RawBlock, name: &str, ty: Type) -> Result<BTreeMap<String, Input>, CompileError> {
        let mut map = BTreeMap::new();
        map.insert(name.to_string(), self.lower_input_slot(dict, block, name, ty)?);
        Ok(map)
    }

    fn lower_input_slot(&mut self, dict: &'p BlockDictionary, block: &RawBlock, name: &str, expected: Type) -> Result<Input, CompileError> {
        let raw = match block.inputs.get(name) {
            Some(r) => r,
            None => {
                self.diagnostics.push(Diagnostic::MalformedInput {
                    detail: format!("missing input slot `{name}`"),
                    source_id: block.id.clone(),
                });
                return Ok(self.default_for(expected));
            }
        };
        let lowered = match &raw.value {
            InputValue::BlockRef(id) => self.lower_reporter(dict, id)?,
            InputValue::Primitive(p) => self.lower_primitive(p),
            InputValue::Empty => self.default_for(expected),
        };
        self.cast_to(lowered, expected, &block.opcode)
    }

    fn default_for(&self, expected: Type) -> Input {
        if expected.is_always(Type::BOOLEAN) {
            Input::constant(Value::Boolean(false))
        } else if expected.is_always(Type::NUMBER_OR_NAN) {
            Input::constant(Value::Number(0.0))
        } else if expected.is_always(Type::STRING) {
            Input::constant(Value::String(String::new()))
        } else {
            Input::constant(Value::Number(0.0))
        }
    }

    fn cast_to(&self, input: Input, expected: Type, opcode: &str) -> Result<Input, CompileError> {
        if expected.is_always(Type::BOOLEAN) {
            Ok(to_type(input, Type::BOOLEAN, InputOp::CastBoolean))
        } else if expected.is_always(Type::NUMBER) {
            Ok(to_type(input, Type::NUMBER, InputOp::CastNumber))
        } else if expected.is_always(Type::NUMBER_OR_NAN) {
            Ok(to_type(input, Type::NUMBER_OR_NAN, InputOp::CastNumberOrNan))
        } else if expected.is_always(Type::STRING) {
            Ok(to_type(input, Type::STRING, InputOp::CastString))
        } else if expected == Type::ANY {
            // No cast is ever inserted (to_type is a no-op whenever the
            // target already contains the whole lattice).
            Ok(to_type(input, Type::ANY, InputOp::CastString))
        } else {
            Err(CompileError::UnknownCastTarget { opcode: opcode.to_string(), target: format!("{expected:?}") })
        }
    }

    fn lower_primitive(&self, p: &CompressedPrimitive) -> Input {
        match p {
            CompressedPrimitive::Math(n) => Input::constant(Value::Number(*n)),
            CompressedPrimitive::Text(s) => Input::constant(Value::String(s.clone())),
            CompressedPrimitive::Color(s) => Input::new(InputOp::Constant(Value::String(s.clone())), Type::COLOR),
            CompressedPrimitive::Broadcast { name, .. } => Input::constant(Value::String(name.clone())),
            CompressedPrimitive::Variable { id, name } => {
                Input::new(InputOp::VariableRead { id: id.clone(), name: name.clone(), scope: self.project.scope_of(id) }, Type::ANY)
            }
            CompressedPrimitive::List { id, .. } => {
                Input::new(InputOp::ListReporter { opcode: "data_listcontents".to_string(), list_id: id.clone(), operands: Vec::new() }, Type::STRING)
            }
        }
    }

    fn lower_reporter(&mut self, dict: &'p BlockDictionary, id: &str) -> Result<Input, CompileError> {
        let Some(block) = dict.get(id) else {
            self.diagnostics
                .push(Diagnostic::MalformedInput { detail: "input block-ref to missing block".to_string(), source_id: id.to_string() });
            return Ok(Input::new(InputOp::UnknownNoOp(id.to_string()), Type::ANY));
        };
        let opcode = block.opcode.as_str();
        let numeric_binop = |this: &mut Self, op1: &str, op2: &str| -> Result<(Box<Input>, Box<Input>), CompileError> {
            let a = this.lower_input_slot(dict, block, op1, Type::NUMBER_OR_NAN)?;
            let b = this.lower_input_slot(dict, block, op2, Type::NUMBER_OR_NAN)?;
            Ok((Box::new(a), Box::new(b)))
        };
        match opcode {
            "operator_add" | "operator_subtract" | "operator_multiply" | "operator_divide" | "operator_mod" => {
                let (a, b) = numeric_binop(self, "NUM1", "NUM2")?;
                let operands = vec![*a, *b];
                Ok(fold_or_wrap_operator(opcode, operands, Type::NUMBER_OR_NAN))
            }
            "operator_equals" | "operator_gt" | "operator_lt" => {
                let a = self.lower_input_slot(dict, block, "OPERAND1", Type::ANY)?;
                let b = self.lower_input_slot(dict, block, "OPERAND2", Type::ANY)?;
                Ok(fold_or_wrap_operator(opcode, vec![a, b], Type::BOOLEAN))
            }
            "operator_and" | "operator_or" => {
                let a = self.lower_input_slot(dict, block, "OPERAND1", Type::BOOLEAN)?;
                let b = self.lower_input_slot(dict, block, "OPERAND2", Type::BOOLEAN)?;
                Ok(fold_or_wrap_operator(opcode, vec![a, b], Type::BOOLEAN))
            }
            "operator_not" => {
                let a = self.lower_input_slot(dict, block, "OPERAND", Type::BOOLEAN)?;
                Ok(fold_or_wrap_operator(opcode, vec![a], Type::BOOLEAN))
            }
            "operator_join" => {
                let a = self.lower_input_slot(dict, block, "STRING1", Type::STRING)?;
                let b = self.lower_input_slot(dict, block, "STRING2", Type::STRING)?;
                Ok(fold_or_wrap_operator(opcode, vec![a, b], Type::STRING))
            }
            "operator_length" => {
                let a = self.lower_input_slot(dict, block, "STRING", Type::STRING)?;
                Ok(fold_or_wrap_operator(opcode, vec![a], Type::NUMBER_POS_INT | Type::NUMBER_ZERO))
            }
            "operator_mathop" => {
                let a = self.lower_input_slot(dict, block, "NUM", Type::NUMBER_OR_NAN)?;
                let func = self.field_value(block, "OPERATOR").unwrap_or_default();
                Ok(fold_or_wrap_operator(&format!("operator_mathop:{func}"), vec![a], Type::NUMBER_OR_NAN))
            }
            "data_variable" => {
                let (id, name) = self.variable_field(block)?;
                Ok(Input::new(InputOp::VariableRead { id: id.clone(), name, scope: self.project.scope_of(&id) }, Type::ANY))
            }
            "data_itemoflist" => {
                let field = block.fields.get("LIST").ok_or_else(|| CompileError::ParseFault {
                    message: format!("data_itemoflist `{}` missing LIST field", block.id),
                })?;
                let list_id = field.id.clone().unwrap_or_default();
                let index = self.lower_input_slot(dict, block, "INDEX", Type::ANY)?;
                Ok(Input::new(InputOp::ListReporter { opcode: opcode.to_string(), list_id, operands: vec![index] }, Type::ANY))
            }
            "sensing_mousex" | "sensing_mousey" | "sensing_timer" | "sensing_distanceto" => {
                let yields_reporter = BLOCKING_SENSING_REPORTERS.contains(&opcode);
                let mut input = Input::new(InputOp::SensingReporter { opcode: opcode.to_string(), operands: Vec::new() }, Type::NUMBER);
                if yields_reporter {
                    input = input.yielding();
                }
                Ok(input)
            }
            "sensing_keypressed" => {
                let key = self.lower_input_slot(dict, block, "KEY_OPTION", Type::STRING)?;
                Ok(Input::new(InputOp::SensingReporter { opcode: opcode.to_string(), operands: vec![key] }, Type::BOOLEAN))
            }
            _ => {
                self.diagnostics
                    .push(Diagnostic::UnknownOpcode { opcode: opcode.to_string(), source_id: block.id.clone() });
                Ok(Input::new(InputOp::UnknownNoOp(opcode.to_string()), Type::ANY))
            }
        }
    }
}

/// Constant-fold an operator node at generation time when every operand is
/// already a literal (a cheap, purely-local special case of the
/// optimizer's own constant folding — safe because it can only ever narrow
/// a type, never widen one). Otherwise wraps the operands in a generic
/// `InputOp::Operator` node for the optimizer to fold or rewrite later.
fn fold_or_wrap_operator(opcode: &str, operands: Vec<Input>, output_ty: Type) -> Input {
    Input::new(InputOp::Operator { opcode: opcode.to_string(), operands }, output_ty)
}

fn classify_hat(opcode: &str) -> Option<HatKind> {
    if EXECUTABLE_HATS.contains(&opcode) {
        Some(HatKind::Executable)
    } else if CONDITION_HATS.contains(&opcode) {
        Some(HatKind::Condition)
    } else {
        None
    }
}

fn input_yields(input: &Input) -> bool {
    if input.yields {
        return true;
    }
    match &input.op {
        InputOp::CastBoolean(b) | InputOp::CastNumber(b) | InputOp::CastNumberOrNan(b) | InputOp::CastString(b) => input_yields(b),
        InputOp::Operator { operands, .. } | InputOp::SensingReporter { operands, .. } => operands.iter().any(input_yields),
        InputOp::ListReporter { operands, .. } => operands.iter().any(input_yields),
        InputOp::PropertyOf { target, .. } => input_yields(target),
        _ => false,
    }
}

/// Whether the stack op's own nature contributes a yield, independent of
/// its children: loops (every iteration), waits, a non-warp procedure
/// call, and terminal `stop "this script"` (§4.C step 6).
fn stack_op_self_yields(op: &StackOp, warp: bool) -> bool {
    match op {
        StackOp::Forever { .. } | StackOp::RepeatCount { .. } | StackOp::RepeatUntil { .. } => true,
        StackOp::Wait { .. } | StackOp::WaitUntil { .. } | StackOp::BroadcastAndWait { .. } => true,
        StackOp::Stop { mode: StopMode::ThisScript } => true,
        StackOp::ProcedureCall { variant, .. } => !(warp || variant.warp),
        _ => false,
    }
}

fn stack_op_subtree_yields(op: &StackOp) -> bool {
    match op {
        StackOp::Simple { inputs, .. } => inputs.values().any(input_yields),
        StackOp::SetVariableTo { value, .. } => input_yields(value),
        StackOp::ChangeVariableBy { delta, .. } => input_yields(delta),
        StackOp::IfElse { condition, when_true, when_false } => {
            input_yields(condition) || stack_yields(when_true) || stack_yields(when_false)
        }
        StackOp::RepeatCount { count, do_body } => input_yields(count) || stack_yields(do_body),
        StackOp::Forever { do_body } => stack_yields(do_body),
        StackOp::RepeatUntil { condition, do_body } => input_yields(condition) || stack_yields(do_body),
        StackOp::Wait { seconds } => input_yields(seconds),
        StackOp::WaitUntil { condition } => input_yields(condition),
        StackOp::BroadcastAndWait { broadcast } => input_yields(broadcast),
        StackOp::ProcedureCall { args, .. } => args.iter().any(input_yields),
        StackOp::ProcedureReturn { value } => input_yields(value),
        StackOp::Stop { .. } | StackOp::UnknownNoOp { .. } => false,
    }
}

fn stack_yields(stack: &Stack) -> bool {
    stack.iter().any(|b| b.yields)
}

fn contains_loop(stack: &Stack) -> bool {
    stack.iter().any(|b| match &b.op {
        StackOp::Forever { .. } | StackOp::RepeatCount { .. } | StackOp::RepeatUntil { .. } => true,
        StackOp::IfElse { when_true, when_false, .. } => contains_loop(when_true) || contains_loop(when_false),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectModel;
    use std::collections::BTreeMap as Map;

    #[test]
    fn cast_to_rejects_a_target_matching_no_known_cast_kind() {
        let project = ProjectModel { targets: Map::new(), global_ids: Default::default() };
        let generator = Generator::new(&project, "Sprite1");
        let input = Input::constant(Value::Number(1.0));
        let err = generator.cast_to(input, Type::COLOR, "looks_setcoloreffectto").unwrap_err();
        assert!(matches!(err, CompileError::UnknownCastTarget { .. }));
    }

    #[test]
    fn cast_to_leaves_any_uncast() {
        let project = ProjectModel { targets: Map::new(), global_ids: Default::default() };
        let generator = Generator::new(&project, "Sprite1");
        let input = Input::new(InputOp::ArgRef("x".into()), Type::ANY);
        let out = generator.cast_to(input.clone(), Type::ANY, "procedures_call").unwrap();
        assert_eq!(out.op, input.op);
    }
}
