use crate::model::Direction;
use dashmap::{DashMap, DashSet};
use oxrdf::{Graph, NamedNode, Term, TripleRef, Variable};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// The lifecycle of a query execution.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ExecutionState {
    /// Loading the source graphs and ordering the patterns
    Initializing,
    /// Calling backends
    Resolving,
    Done,
    Failed,
}

/// A backend call identity.
///
/// Services answer the same way whatever the predicate, so `lookup` is only set for endpoints.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct VisitKey {
    pub backend: NamedNode,
    pub lookup: Option<(NamedNode, Direction)>,
    pub input: Term,
}

/// The state shared by all the resolution steps of a single execution.
///
/// All the sets only grow. Insertions report atomically if the entry is new.
pub struct ExecutionContext {
    state: Mutex<ExecutionState>,
    dead: DashSet<NamedNode>,
    visited: DashSet<VisitKey>,
    bindings: DashMap<Variable, FxHashSet<Term>>,
    facts: Mutex<Graph>,
    calls: AtomicUsize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExecutionState::Initializing),
            dead: DashSet::new(),
            visited: DashSet::new(),
            bindings: DashMap::new(),
            facts: Mutex::new(Graph::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: ExecutionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Marks the backend dead, returns `false` if it was already.
    pub fn mark_dead(&self, backend: &NamedNode) -> bool {
        self.dead.insert(backend.clone())
    }

    pub fn is_dead(&self, backend: &NamedNode) -> bool {
        self.dead.contains(backend)
    }

    pub fn dead_backends(&self) -> Vec<NamedNode> {
        self.dead.iter().map(|b| b.key().clone()).collect()
    }

    /// Records the call, returns `false` if it has already been recorded.
    pub fn first_visit(&self, key: VisitKey) -> bool {
        self.visited.insert(key)
    }

    /// Adds values to the variable binding and returns the number of new values.
    ///
    /// The variable is bound afterward even if no value is given.
    pub fn bind(&self, variable: &Variable, values: impl IntoIterator<Item = Term>) -> usize {
        let mut binding = self.bindings.entry(variable.clone()).or_default();
        let before = binding.len();
        binding.extend(values);
        binding.len() - before
    }

    pub fn is_bound(&self, variable: &Variable) -> bool {
        self.bindings.contains_key(variable)
    }

    /// The values of the variable, `None` if it is not bound yet.
    pub fn binding(&self, variable: &Variable) -> Option<Vec<Term>> {
        self.bindings
            .get(variable)
            .map(|values| values.iter().cloned().collect())
    }

    pub fn bindings(&self) -> FxHashMap<Variable, FxHashSet<Term>> {
        self.bindings
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Adds facts to the working store and returns the number of new ones.
    pub fn add_facts<'a>(&self, facts: impl IntoIterator<Item = impl Into<TripleRef<'a>>>) -> usize {
        let mut graph = self.facts.lock().unwrap_or_else(PoisonError::into_inner);
        facts
            .into_iter()
            .map(Into::into)
            .filter(|t: &TripleRef<'a>| graph.insert(*t))
            .count()
    }

    /// Runs the function on the working store.
    pub fn with_facts<T>(&self, f: impl FnOnce(&Graph) -> T) -> T {
        f(&self.facts.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn into_facts(self) -> Graph {
        self.facts.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of backend calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{Literal, Triple};

    #[test]
    fn check_and_insert() {
        let ctx = ExecutionContext::new();
        let backend = NamedNode::new_unchecked("http://example.com/b");
        assert!(ctx.mark_dead(&backend));
        assert!(!ctx.mark_dead(&backend));
        assert!(ctx.is_dead(&backend));

        let key = VisitKey {
            backend,
            lookup: None,
            input: Literal::from(1).into(),
        };
        assert!(ctx.first_visit(key.clone()));
        assert!(!ctx.first_visit(key));
    }

    #[test]
    fn bindings_are_monotonic() {
        let ctx = ExecutionContext::new();
        let v = Variable::new_unchecked("v");
        assert!(!ctx.is_bound(&v));
        assert_eq!(ctx.bind(&v, Vec::new()), 0);
        assert!(ctx.is_bound(&v));
        assert_eq!(ctx.binding(&v), Some(Vec::new()));
        assert_eq!(
            ctx.bind(&v, [Term::from(Literal::from(1)), Term::from(Literal::from(2))]),
            2
        );
        assert_eq!(ctx.bind(&v, [Term::from(Literal::from(1))]), 0);
        assert_eq!(ctx.bindings()[&v].len(), 2);
    }

    #[test]
    fn facts_deduplicated() {
        let ctx = ExecutionContext::new();
        let t = Triple::new(
            NamedNode::new_unchecked("http://example.com/s"),
            NamedNode::new_unchecked("http://example.com/p"),
            Literal::from(1),
        );
        assert_eq!(ctx.add_facts([&t, &t]), 1);
        assert_eq!(ctx.with_facts(Graph::len), 1);
        assert_eq!(ctx.into_facts().len(), 1);
    }
}
