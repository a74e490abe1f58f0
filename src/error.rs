//! Error kinds for the block-graph compiler core.
//!
//! Every fallible stage returns `Result<T, CompileError>`. Non-fatal kinds
//! (unknown opcode, malformed input) are collected as diagnostics on the
//! generator rather than returned as `Err`; only the fatal kinds below ever
//! abort a script's compilation.

use std::fmt;

/// What the emitter was compiling when it failed to reload its own output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// A top-level hat-rooted script.
    Entry,
    /// A custom-block procedure variant.
    Procedure,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::Entry => write!(f, "entry script"),
            ScriptKind::Procedure => write!(f, "procedure"),
        }
    }
}

/// A compile-time fault.
///
/// Mirrors the teacher's own `TypeError { message, location }` shape: a
/// human-readable message plus whatever contextual fields the variant needs,
/// with a manual `Display` rather than a derive-macro-generated one.
#[derive(Debug, Clone)]
pub enum CompileError {
    /// The cast target named by a block's declared input type does not
    /// exist in the type lattice. Always a generator bug, never caused by
    /// project data — aborts this script's compilation.
    UnknownCastTarget {
        opcode: String,
        target: String,
    },
    /// The emitter produced source text it could not itself reload. Fatal;
    /// surfaces with enough context to reproduce without re-running the
    /// whole driver.
    EmitLoadFailure {
        script_kind: ScriptKind,
        warp: bool,
        source_len: usize,
        excerpt: SourceExcerpt,
        reason: String,
    },
    /// The project model boundary rejected malformed or circular input
    /// before generation could even begin.
    ParseFault { message: String },
}

/// Prefix/suffix excerpt of a too-long source string, for error reports.
#[derive(Debug, Clone)]
pub struct SourceExcerpt {
    pub prefix: String,
    pub suffix: String,
}

impl SourceExcerpt {
    const EDGE_LEN: usize = 160;

    /// Build an excerpt from the full emitted source. Short sources are
    /// shown whole in `prefix` with an empty `suffix`.
    pub fn from_source(source: &str) -> Self {
        if source.len() <= Self::EDGE_LEN * 2 {
            return SourceExcerpt {
                prefix: source.to_string(),
                suffix: String::new(),
            };
        }
        let prefix: String = source.chars().take(Self::EDGE_LEN).collect();
        let suffix: String = source
            .chars()
            .rev()
            .take(Self::EDGE_LEN)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        SourceExcerpt { prefix, suffix }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownCastTarget { opcode, target } => write!(
                f,
                "unknown cast target `{target}` requested by opcode `{opcode}`"
            ),
            CompileError::EmitLoadFailure {
                script_kind,
                warp,
                source_len,
                excerpt,
                reason,
            } => write!(
                f,
                "emitted source for {script_kind} (warp={warp}, {source_len} bytes) failed to \
                 load: {reason}\n--- prefix ---\n{}\n--- suffix ---\n{}",
                excerpt.prefix, excerpt.suffix
            ),
            CompileError::ParseFault { message } => write!(f, "project model fault: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// A non-fatal fault recorded during generation: the script still compiles,
/// but the block in question becomes a no-op and the host is told why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// `opcode` has no lowering; the generator emitted a no-op stack block
    /// (or an `ANY`-typed constant for an input position) in its place.
    UnknownOpcode { opcode: String, source_id: String },
    /// An input's shadow-type tag, field, or mutation JSON was malformed;
    /// the offending node was skipped.
    MalformedInput { detail: String, source_id: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownOpcode { opcode, source_id } => {
                write!(f, "unknown opcode `{opcode}` at block `{source_id}`")
            }
            Diagnostic::MalformedInput { detail, source_id } => {
                write!(f, "malformed input at block `{source_id}`: {detail}")
            }
        }
    }
}
