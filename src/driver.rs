//! Compile driver (component F).
//!
//! Orchestrates A-E into one entry point: `CompileDriver::compile` walks
//! the generator, optimizer, and emitter over one entry hat and every
//! procedure variant it transitively reaches, producing a
//! `CompiledProgram`. Generalizes `timeloop.rs`'s `TimeLoop`
//! (owns configuration, repeatedly invokes the lower pipeline stages until
//! the run is done) from iterating epochs to iterating procedure variants,
//! and reuses `ArtifactCache` (itself grounded on `memo.rs`'s `EpochCache`)
//! so a variant reached from two call sites is generated, optimized, and
//! emitted exactly once.

use crate::cache::{ArtifactCache, CacheStats};
use crate::error::{CompileError, ScriptKind};
use crate::emitter::{self, Action, EmittedScript, Expr};
use crate::generator::Generator;
use crate::ir::{HatKind, ProcedureVariantId};
use crate::optimizer::Optimizer;
use crate::project::ProjectModel;
use std::collections::{BTreeMap, BTreeSet};

/// The full output of compiling one entry hat: the entry artifact, every
/// procedure variant it depends on (transitively), the hat classification
/// the host needs to know how to schedule it, and the set of distinct
/// opcodes the compiled program actually invokes (so the host can check it
/// supports everything before running it).
#[derive(Debug)]
pub struct CompiledProgram {
    pub entry: EmittedScript,
    pub procedures: BTreeMap<ProcedureVariantId, EmittedScript>,
    pub hat: Option<HatKind>,
    pub used_opcodes: BTreeSet<String>,
}

pub struct CompileDriver<'p> {
    project: &'p ProjectModel,
    cache: ArtifactCache,
}

impl<'p> CompileDriver<'p> {
    pub fn new(project: &'p ProjectModel) -> Self {
        CompileDriver { project, cache: ArtifactCache::new() }
    }

    /// Cache hit/miss counters accumulated across every `compile` call made
    /// against this driver instance — useful when a project's entries share
    /// procedures, the common case for any sprite with more than one
    /// script.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Compile one entry hat on `target`, starting generation at
    /// `entry_block_id`.
    pub fn compile(&mut self, target: &str, entry_block_id: &str) -> Result<CompiledProgram, CompileError> {
        let generator = Generator::new(self.project, target);
        let output = generator.generate_entry(entry_block_id)?;
        for diagnostic in &output.diagnostics {
            tracing::warn!(%diagnostic, "non-fatal generation diagnostic");
        }

        let mut entry_script = output.ir.entry;
        let mut optimizer = Optimizer::new();
        let entry_hints = optimizer.optimize_script(&mut entry_script);
        let entry_artifact = emitter::emit_script(&entry_script, ScriptKind::Entry, Some(&entry_hints))?;

        // Procedures reached unconditionally in this compile (the generator
        // already dedups by variant key) — each is optimized and emitted in
        // isolation, and never twice, via `ArtifactCache`'s write-once
        // semantics. Order is unspecified (§4.F) — iteration is in key
        // order purely because `BTreeMap` is what the generator hands back,
        // not because ordering is meaningful here.
        for (variant, mut proc_script) in output.ir.procedures {
            if self.cache.get(&variant).is_some() {
                continue;
            }
            let hints = optimizer.optimize_script(&mut proc_script);
            let artifact = emitter::emit_script(&proc_script, ScriptKind::Procedure, Some(&hints))?;
            self.cache.insert(variant, artifact);
        }

        let mut used_opcodes = BTreeSet::new();
        for action in &entry_artifact.actions {
            collect_used_opcodes_action(action, &mut used_opcodes);
        }

        let mut procedures = BTreeMap::new();
        for variant in entry_script.depended_procedures.iter() {
            if let Some(artifact) = self.cache.get(variant) {
                for action in &artifact.actions {
                    collect_used_opcodes_action(action, &mut used_opcodes);
                }
                procedures.insert(variant.clone(), artifact.clone());
            }
        }

        Ok(CompiledProgram { entry: entry_artifact, procedures, hat: entry_script.hat, used_opcodes })
    }
}

/// Walks an already-built `Action`/`Expr` tree collecting every distinct
/// opcode it touches — used for both the entry artifact and every
/// procedure artifact pulled from the cache, where only the emitted
/// `Action` tree (not the optimized `Script` it came from) is in scope.
fn collect_used_opcodes_action(action: &Action, out: &mut BTreeSet<String>) {
    match action {
        Action::Simple { opcode, inputs } => {
            out.insert(opcode.clone());
            inputs.iter().for_each(|(_, e)| collect_used_opcodes_expr(e, out));
        }
        Action::SetVariableTo { value, .. } => {
            out.insert("data_setvariableto".to_string());
            collect_used_opcodes_expr(value, out);
        }
        Action::ChangeVariableBy { delta, .. } => {
            out.insert("data_changevariableby".to_string());
            collect_used_opcodes_expr(delta, out);
        }
        Action::If { condition, when_true, when_false } => {
            out.insert("control_if_else".to_string());
            collect_used_opcodes_expr(condition, out);
            when_true.iter().for_each(|a| collect_used_opcodes_action(a, out));
            when_false.iter().for_each(|a| collect_used_opcodes_action(a, out));
        }
        Action::RepeatCount { count, do_body } => {
            out.insert("control_repeat".to_string());
            collect_used_opcodes_expr(count, out);
            do_body.iter().for_each(|a| collect_used_opcodes_action(a, out));
        }
        Action::Forever { do_body } => {
            out.insert("control_forever".to_string());
            do_body.iter().for_each(|a| collect_used_opcodes_action(a, out));
        }
        Action::RepeatUntil { condition, do_body } => {
            out.insert("control_repeat_until".to_string());
            collect_used_opcodes_expr(condition, out);
            do_body.iter().for_each(|a| collect_used_opcodes_action(a, out));
        }
        Action::Wait { seconds } => {
            out.insert("control_wait".to_string());
            collect_used_opcodes_expr(seconds, out);
        }
        Action::WaitUntil { condition } => {
            out.insert("control_wait_until".to_string());
            collect_used_opcodes_expr(condition, out);
        }
        Action::Stop { .. } => {
            out.insert("control_stop".to_string());
        }
        Action::BroadcastAndWait { broadcast } => {
            out.insert("event_broadcastandwait".to_string());
            collect_used_opcodes_expr(broadcast, out);
        }
        Action::Call { args, .. } => {
            out.insert("procedures_call".to_string());
            args.iter().for_each(|a| collect_used_opcodes_expr(a, out));
        }
        Action::Return { value } => {
            out.insert("procedures_return".to_string());
            collect_used_opcodes_expr(value, out);
        }
        Action::Yield => {}
        Action::NoOp => {}
    }
}

fn collect_used_opcodes_expr(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Operator { opcode, operands } => {
            out.insert(opcode.clone());
            operands.iter().for_each(|o| collect_used_opcodes_expr(o, out));
        }
        Expr::SensingReporter { opcode, operands, .. } => {
            out.insert(opcode.clone());
            operands.iter().for_each(|o| collect_used_opcodes_expr(o, out));
        }
        Expr::ListReporter { opcode, operands, .. } => {
            out.insert(opcode.clone());
            operands.iter().for_each(|o| collect_used_opcodes_expr(o, out));
        }
        Expr::CastBoolean(b) | Expr::CastNumber(b) | Expr::CastNumberOrNan(b) | Expr::CastString(b) => {
            collect_used_opcodes_expr(b, out)
        }
        Expr::PropertyOf { target, .. } => collect_used_opcodes_expr(target, out),
        Expr::VariableRead { .. } => {
            out.insert("data_variable".to_string());
        }
        Expr::Constant(_) | Expr::Arg(_) | Expr::UnknownNoOp => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{BlockDictionary, RawBlock};
    use std::collections::BTreeMap as Map;

    fn flag_hat_project() -> ProjectModel {
        let mut dict = BlockDictionary::new();
        dict.insert(RawBlock {
            id: "hat1".to_string(),
            opcode: "event_whenflagclicked".to_string(),
            next: Some("move1".to_string()),
            parent: None,
            inputs: Map::new(),
            fields: Map::new(),
            shadow: false,
            top_level: true,
            mutation: None,
        });
        let mut inputs = Map::new();
        inputs.insert(
            "STEPS".to_string(),
            crate::project::RawInput {
                kind: crate::project::ShadowKind::Shadow,
                value: crate::project::InputValue::Primitive(crate::project::CompressedPrimitive::Math(10.0)),
                obscured_shadow: None,
            },
        );
        dict.insert(RawBlock {
            id: "move1".to_string(),
            opcode: "motion_movesteps".to_string(),
            next: None,
            parent: Some("hat1".to_string()),
            inputs,
            fields: Map::new(),
            shadow: false,
            top_level: false,
            mutation: None,
        });
        let mut targets = Map::new();
        targets.insert("Sprite1".to_string(), dict);
        ProjectModel { targets, global_ids: Default::default() }
    }

    #[test]
    fn compiles_a_flag_hat_with_one_move_block() {
        let project = flag_hat_project();
        let mut driver = CompileDriver::new(&project);
        let program = driver.compile("Sprite1", "hat1").expect("should compile");
        assert_eq!(program.hat, Some(HatKind::Executable));
        assert!(program.procedures.is_empty());
        assert!(program.used_opcodes.contains("motion_movesteps"));
        // the leading executable-hat yield plus the move action.
        assert_eq!(program.entry.actions.len(), 2);
    }
}
