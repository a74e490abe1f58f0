//! Type-state map used by the optimizer (component D).
//!
//! Generalizes `types.rs`'s `TemporalType`/join/`HashMap<Address,
//! TemporalType>` machinery from a single running 3-state lattice value to
//! a flat map from observable *slots* to bitmask `Type`s, per §4.D. The
//! entry state of a script is the top element (every slot `ANY`); join at
//! control-flow merges takes the bitmask union per slot, matching the type
//! lattice's own join (`Type::union`) rather than needing a second lattice.

use crate::project::Scope;
use crate::value::Type;
use std::collections::BTreeMap;
use std::fmt;

/// An observable slot the optimizer tracks a type for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum StateKey {
    Variable { scope: Scope, id: String },
    List { id: String },
    SpriteX,
    SpriteY,
    SpriteDirection,
    SpriteSize,
    SpriteCostume,
    SpriteVisible,
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Variable { scope, id } => write!(f, "var:{scope:?}:{id}"),
            StateKey::List { id } => write!(f, "list:{id}"),
            StateKey::SpriteX => write!(f, "sprite:x"),
            StateKey::SpriteY => write!(f, "sprite:y"),
            StateKey::SpriteDirection => write!(f, "sprite:direction"),
            StateKey::SpriteSize => write!(f, "sprite:size"),
            StateKey::SpriteCostume => write!(f, "sprite:costume"),
            StateKey::SpriteVisible => write!(f, "sprite:visible"),
        }
    }
}

/// A flat map from `StateKey` to `Type`. Slots absent from the map are
/// implicitly `ANY` (the top element) — `get` reflects that so callers
/// never have to special-case a missing key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeState(BTreeMap<StateKey, Type>);

impl TypeState {
    /// The top element: every slot unconstrained.
    pub fn top() -> Self {
        TypeState::default()
    }

    pub fn get(&self, key: &StateKey) -> Type {
        self.0.get(key).copied().unwrap_or(Type::ANY)
    }

    /// Rebind a slot to exactly `ty` (used by e.g. `data_setvariableto`).
    pub fn set(&mut self, key: StateKey, ty: Type) {
        self.0.insert(key, ty);
    }

    /// Widen a slot to include `ty` without losing what it already allowed
    /// (used by e.g. `data_changevariableby`, which can only narrow to
    /// "still whatever it was, plus possibly NaN").
    pub fn widen(&mut self, key: StateKey, ty: Type) {
        let joined = self.get(&key).union(ty);
        self.0.insert(key, joined);
    }

    /// Set every slot to `ANY` — the worst-case transfer function applied
    /// at an unanalyzed procedure call (§4.D).
    pub fn clobber_all(&mut self) {
        self.0.clear();
    }

    /// Join (union) of two states at a control-flow merge: per-slot
    /// bitmask union, defaulting missing slots to `ANY` so a slot narrowed
    /// in one branch but untouched in the other still joins correctly.
    pub fn join(&self, other: &TypeState) -> TypeState {
        let mut keys: std::collections::BTreeSet<&StateKey> = self.0.keys().collect();
        keys.extend(other.0.keys());
        let mut out = TypeState::default();
        for key in keys {
            out.0.insert(key.clone(), self.get(key).union(other.get(key)));
        }
        out
    }

    /// `self ⊆ other` per slot — used to check invariant 3 (the join of
    /// predecessors' exit-states is `⊆` the block's entry-state).
    pub fn is_subset_of(&self, other: &TypeState) -> bool {
        let mut keys: std::collections::BTreeSet<&StateKey> = self.0.keys().collect();
        keys.extend(other.0.keys());
        keys.into_iter().all(|k| self.get(k).is_always(other.get(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_slot_reads_as_any() {
        let state = TypeState::top();
        assert_eq!(state.get(&StateKey::SpriteX), Type::ANY);
    }

    #[test]
    fn join_is_union_per_slot() {
        let mut a = TypeState::top();
        a.set(StateKey::SpriteX, Type::NUMBER_POS_INT);
        let mut b = TypeState::top();
        b.set(StateKey::SpriteX, Type::NUMBER_NEG_INT);
        let joined = a.join(&b);
        assert_eq!(
            joined.get(&StateKey::SpriteX),
            Type::NUMBER_POS_INT | Type::NUMBER_NEG_INT
        );
    }

    #[test]
    fn join_is_idempotent() {
        let mut a = TypeState::top();
        a.set(StateKey::SpriteX, Type::NUMBER_POS_INT);
        assert_eq!(a.join(&a), a);
    }

    #[test]
    fn widen_only_grows() {
        let mut s = TypeState::top();
        s.set(StateKey::SpriteY, Type::NUMBER_POS_INT);
        s.widen(StateKey::SpriteY, Type::NUMBER_NAN);
        assert!(s.get(&StateKey::SpriteY).is_always(Type::NUMBER_POS_INT | Type::NUMBER_NAN));
    }
}
