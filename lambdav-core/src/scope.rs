//! Lexically scoped definition store.
//!
//! Scopes are value-copied on extension: entering a new scope clones the
//! bindings visible in its parent, so sibling scopes never observe each
//! other and inner bindings shadow outer ones. Every scope lives in an
//! arena and is addressed by index, which lets a definition keep a handle
//! to the scope it closed over while new scopes come and go — reference
//! chains form a DAG, never a cycle.

use crate::ast::CExpression;
use std::collections::HashMap;

pub type ScopeId = usize;

/// An unevaluated definition together with the scope its body resolves in.
#[derive(Debug, Clone)]
pub struct DefEntry<'a> {
    pub body: CExpression<'a>,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, Default)]
pub struct Defs<'a> {
    bindings: HashMap<&'a str, DefEntry<'a>>,
}

impl<'a> Defs<'a> {
    /// Insert a binding, replacing any previous one of the same name.
    pub fn insert(&mut self, name: &'a str, entry: DefEntry<'a>) {
        self.bindings.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&DefEntry<'a>> {
        self.bindings.get(name)
    }
}

pub struct ScopeArena<'a> {
    scopes: Vec<Defs<'a>>,
}

impl<'a> ScopeArena<'a> {
    /// Closing scope for synthesized bindings that carry no free
    /// identifiers (phi-bound loop formals).
    pub const EMPTY: ScopeId = 0;

    /// The scope `define` inserts into. Lookups against it are live:
    /// a body bound early resolves identifiers defined later.
    pub const GLOBAL: ScopeId = 1;

    pub fn new() -> Self {
        ScopeArena {
            scopes: vec![Defs::default(), Defs::default()],
        }
    }

    /// Start a new scope seeded with the bindings visible in `parent`.
    pub fn extend(&mut self, parent: ScopeId) -> ScopeId {
        let defs = self.scopes[parent].clone();
        self.scopes.push(defs);
        self.scopes.len() - 1
    }

    pub fn insert(&mut self, scope: ScopeId, name: &'a str, entry: DefEntry<'a>) {
        self.scopes[scope].insert(name, entry);
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&DefEntry<'a>> {
        self.scopes[scope].get(name)
    }
}

impl Default for ScopeArena<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CExprKind, Location};

    fn entry(value: f64, scope: ScopeId) -> DefEntry<'static> {
        DefEntry {
            body: CExpression {
                kind: CExprKind::Number(value),
                loc: Location::default(),
            },
            scope,
        }
    }

    fn value_of(entry: &DefEntry<'_>) -> f64 {
        match entry.body.kind {
            CExprKind::Number(value) => value,
            _ => panic!("expected a number binding"),
        }
    }

    #[test]
    fn test_shadowing_in_extended_scope() {
        let mut arena = ScopeArena::new();
        arena.insert(ScopeArena::GLOBAL, "x", entry(1.0, ScopeArena::GLOBAL));

        let inner = arena.extend(ScopeArena::GLOBAL);
        arena.insert(inner, "x", entry(2.0, ScopeArena::GLOBAL));

        assert_eq!(value_of(arena.lookup(inner, "x").unwrap()), 2.0);
        assert_eq!(value_of(arena.lookup(ScopeArena::GLOBAL, "x").unwrap()), 1.0);
    }

    #[test]
    fn test_sibling_scopes_are_isolated() {
        let mut arena = ScopeArena::new();
        let left = arena.extend(ScopeArena::GLOBAL);
        let right = arena.extend(ScopeArena::GLOBAL);
        arena.insert(left, "x", entry(1.0, ScopeArena::GLOBAL));

        assert!(arena.lookup(left, "x").is_some());
        assert!(arena.lookup(right, "x").is_none());
        assert!(arena.lookup(ScopeArena::GLOBAL, "x").is_none());
    }

    #[test]
    fn test_extension_snapshots_parent() {
        let mut arena = ScopeArena::new();
        arena.insert(ScopeArena::GLOBAL, "x", entry(1.0, ScopeArena::GLOBAL));
        let inner = arena.extend(ScopeArena::GLOBAL);

        // Visible at extension time, and later global inserts are not.
        assert!(arena.lookup(inner, "x").is_some());
        arena.insert(ScopeArena::GLOBAL, "y", entry(2.0, ScopeArena::GLOBAL));
        assert!(arena.lookup(inner, "y").is_none());
    }

    #[test]
    fn test_redefinition_replaces() {
        let mut arena = ScopeArena::new();
        arena.insert(ScopeArena::GLOBAL, "x", entry(1.0, ScopeArena::GLOBAL));
        arena.insert(ScopeArena::GLOBAL, "x", entry(3.0, ScopeArena::GLOBAL));
        assert_eq!(value_of(arena.lookup(ScopeArena::GLOBAL, "x").unwrap()), 3.0);
    }

    #[test]
    fn test_empty_scope_stays_empty() {
        let arena = ScopeArena::new();
        assert!(arena.lookup(ScopeArena::EMPTY, "anything").is_none());
    }
}
