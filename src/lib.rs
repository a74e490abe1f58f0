//! Block-graph compiler core for the ScratchLove native Scratch 3.0 runtime.
//!
//! Six components, front to back: the value & type lattice (`value`), the
//! parsed project model the host hands in (`project`), the typed IR
//! (`ir`), the generator that builds it (`generator`), the type-directed
//! optimizer (`optimizer`), the code emitter (`emitter`), the artifact
//! cache (`cache`), and the driver that orchestrates all of the above
//! (`driver`). `runtime` is the trait boundary a host implements to run
//! what the emitter produces.

pub mod error;
pub mod value;
pub mod project;
pub mod ir;
pub mod runtime;
pub mod typestate;
pub mod generator;
pub mod optimizer;
pub mod emitter;
pub mod cache;
pub mod driver;

pub use error::{CompileError, Diagnostic, ScriptKind, SourceExcerpt};
pub use value::{Type, Value};
pub use project::{
    BlockDictionary, CompressedPrimitive, InputValue, Mutation, ProjectModel, RawBlock, RawField,
    RawInput, Scope, ShadowKind, TargetId,
};
pub use ir::{
    CastCtor, HatKind, Input, InputOp, Ir, ProcedureVariantId, Script, Stack, StackBlock, StackOp,
    StopMode,
};
pub use runtime::{Runtime, RuntimeOptions, Target, Thread, YieldTag};
pub use typestate::{StateKey, TypeState};
pub use generator::{GenerationOutput, Generator};
pub use optimizer::{CacheHints, OptStats, Optimizer};
pub use emitter::{
    emit_script, exec_actions, Action, CacheSlot, EmittedScript, EmittedSource, ExecOutcome, Expr,
};
pub use cache::{ArtifactCache, CacheStats};
pub use driver::{CompileDriver, CompiledProgram};

#[cfg(test)]
mod tests;
