//! Per-script compiled-artifact cache.
//!
//! Generalizes `memo.rs`'s `EpochCache` (hash-keyed cache with hit/miss
//! counters and a `CacheStats` summary) from epoch-state hashes to
//! `ProcedureVariantId` keys: a write-once cache of `EmittedScript`s so the
//! driver never re-generates, re-optimizes, or re-emits the same procedure
//! variant twice within one compile, even when it is reached from several
//! call sites.

use crate::emitter::EmittedScript;
use crate::ir::ProcedureVariantId;
use std::collections::BTreeMap;

/// Hit/miss counters for one compile's procedure-variant cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hits: usize,
    pub misses: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Write-once per-procedure-variant artifact cache for a single compile.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    entries: BTreeMap<ProcedureVariantId, EmittedScript>,
    hits: usize,
    misses: usize,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an already-compiled variant. Counts toward the hit/miss
    /// stats, mirroring `EpochCache::get`.
    pub fn get(&mut self, variant: &ProcedureVariantId) -> Option<&EmittedScript> {
        if self.entries.contains_key(variant) {
            self.hits += 1;
            self.entries.get(variant)
        } else {
            self.misses += 1;
            None
        }
    }

    pub fn contains(&self, variant: &ProcedureVariantId) -> bool {
        self.entries.contains_key(variant)
    }

    /// Insert a freshly compiled variant. Never overwrites — once a
    /// variant is compiled for this run, it is final (§4.F: "compile each
    /// reachable procedure variant exactly once").
    pub fn insert(&mut self, variant: ProcedureVariantId, script: EmittedScript) {
        self.entries.entry(variant).or_insert(script);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats { size: self.entries.len(), hits: self.hits, misses: self.misses }
    }

    pub fn into_map(self) -> BTreeMap<ProcedureVariantId, EmittedScript> {
        self.entries
    }

    pub fn as_map(&self) -> &BTreeMap<ProcedureVariantId, EmittedScript> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptKind;
    use crate::emitter::emit_script;
    use crate::ir::{HatKind, Script};
    use std::collections::BTreeSet;

    fn empty_script() -> Script {
        Script {
            stack: Vec::new(),
            procedure_code: Some("test %s".to_string()),
            argument_names: Vec::new(),
            argument_defaults: Vec::new(),
            yields: false,
            warp: false,
            warp_timer: false,
            hat: None,
            is_procedure: true,
            depended_procedures: BTreeSet::new(),
        }
    }

    #[test]
    fn insert_then_get_is_a_hit() {
        let mut cache = ArtifactCache::new();
        let variant = ProcedureVariantId { proc_code: "test %s".to_string(), warp: false };
        assert!(cache.get(&variant).is_none());
        let emitted = emit_script(&empty_script(), ScriptKind::Procedure, None).unwrap();
        cache.insert(variant.clone(), emitted);
        assert!(cache.get(&variant).is_some());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn insert_never_overwrites() {
        let mut cache = ArtifactCache::new();
        let variant = ProcedureVariantId { proc_code: "test %s".to_string(), warp: true };
        let first = emit_script(&empty_script(), ScriptKind::Procedure, None).unwrap();
        cache.insert(variant.clone(), first);
        let mut second_script = empty_script();
        second_script.warp = true;
        let second = emit_script(&second_script, ScriptKind::Procedure, None).unwrap();
        cache.insert(variant.clone(), second);
        assert_eq!(cache.stats().size, 1);
    }
}
