use crate::error::OptimizationError;
use crate::graph::PatternGraph;
use crate::model::{Direction, StatKind};
use crate::reasoning::{Reasoner, inverse_property};
use crate::registry::Registry;
use crate::reorder::{FallbackPolicy, GreedyReorder};
use crate::stats::StatsStore;
use rustc_hash::FxHashSet;
use spargebra::term::{NamedNodePattern, TriplePattern};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Computes the order in which the patterns of a basic graph pattern are resolved.
///
/// The strategy is chosen once when building the [`ResolutionEngine`](crate::ResolutionEngine).
pub trait PatternOrdering: Send + Sync {
    /// Returns a permutation of the patterns.
    fn order(&self, patterns: &[TriplePattern]) -> Result<Vec<TriplePattern>, OptimizationError>;
}

impl<T: PatternOrdering + ?Sized> PatternOrdering for Arc<T> {
    fn order(&self, patterns: &[TriplePattern]) -> Result<Vec<TriplePattern>, OptimizationError> {
        (**self).order(patterns)
    }
}

/// Cost of reaching a node. [`Weight::Unknown`] is larger than any known weight.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy)]
enum Weight {
    Known(u64),
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    weight: Weight,
    /// Expected number of values of the node
    size: u64,
    /// The pattern that binds the node from its parent
    parent_pattern: Option<usize>,
    visited: bool,
}

/// Orders patterns by growing a minimum spanning tree of the pattern graph with Prim's algorithm.
///
/// The cost of an edge is the expected latency of its predicate in the traversal direction
/// multiplied by the expected number of values of the node it starts from.
/// Patterns that do not end up in the tree only filter the results:
/// they are placed at the first position where both their ends are bound.
/// Each connected component is ordered on its own and the components are concatenated in order of first appearance.
///
/// If the statistics cannot be read the patterns are ordered by [`GreedyReorder`].
pub struct StaticOptimizer<S> {
    stats: S,
    fallback: GreedyReorder,
    catalogue: Option<(Arc<dyn Registry>, Arc<dyn Reasoner>)>,
}

impl<S: StatsStore> StaticOptimizer<S> {
    pub fn new(stats: S) -> Self {
        Self {
            stats,
            fallback: GreedyReorder::default(),
            catalogue: None,
        }
    }

    /// With [`FallbackPolicy::Strict`], components without any concrete term are rejected.
    #[must_use]
    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback = GreedyReorder::new(policy);
        self
    }

    /// Rejects patterns whose predicate no backend of the registry is able to resolve.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn Registry>, reasoner: Arc<dyn Reasoner>) -> Self {
        self.catalogue = Some((registry, reasoner));
        self
    }

    /// Orders the patterns without falling back to [`GreedyReorder`] on failure.
    pub fn optimize(
        &self,
        patterns: &[TriplePattern],
    ) -> Result<Vec<TriplePattern>, OptimizationError> {
        let graph = PatternGraph::build(patterns)?;
        self.check_predicates(patterns)?;
        let mut states = (0..graph.len())
            .map(|id| NodeState {
                weight: if graph.is_concrete(id) {
                    Weight::Known(0)
                } else {
                    Weight::Unknown
                },
                size: 1,
                parent_pattern: None,
                visited: false,
            })
            .collect::<Vec<_>>();
        let mut output = Vec::with_capacity(patterns.len());
        for component in graph.components() {
            if self.fallback.policy() == FallbackPolicy::Strict
                && !component.iter().any(|id| graph.is_concrete(*id))
            {
                return Err(OptimizationError::UnresolvableQuery {
                    remaining: component_patterns(&graph, &component, patterns.len()).len(),
                });
            }
            let tree = self.grow_tree(&graph, &component, &mut states)?;
            output.extend(
                reinsert_filters(&graph, &component, tree, patterns.len())
                    .into_iter()
                    .map(|i| patterns[i].clone()),
            );
        }
        Ok(output)
    }

    /// Prim's algorithm on one component, returns the tree patterns in extraction order.
    ///
    /// Stale heap entries are skipped on extraction.
    fn grow_tree(
        &self,
        graph: &PatternGraph,
        component: &[usize],
        states: &mut [NodeState],
    ) -> Result<Vec<usize>, OptimizationError> {
        let mut heap = component
            .iter()
            .map(|id| Reverse((states[*id].weight, *id)))
            .collect::<BinaryHeap<_>>();
        let mut tree = Vec::new();
        while let Some(Reverse((weight, node))) = heap.pop() {
            let state = states[node];
            if state.visited || state.weight != weight {
                continue;
            }
            states[node].visited = true;
            if let Some(pattern) = state.parent_pattern {
                tree.push(pattern);
            }
            for edge in graph.edges(node) {
                let target = &mut states[edge.target];
                if target.visited {
                    continue;
                }
                let time = self
                    .stats
                    .stat(edge.predicate.as_ref(), StatKind::Time, edge.direction)?;
                let candidate = Weight::Known(time.saturating_mul(state.size));
                if candidate < target.weight {
                    let selectivity = self.stats.stat(
                        edge.predicate.as_ref(),
                        StatKind::Selectivity,
                        edge.direction,
                    )?;
                    target.weight = candidate;
                    target.size = state.size.saturating_mul(selectivity);
                    target.parent_pattern = Some(edge.pattern);
                    heap.push(Reverse((candidate, edge.target)));
                }
            }
        }
        Ok(tree)
    }

    fn check_predicates(&self, patterns: &[TriplePattern]) -> Result<(), OptimizationError> {
        let Some((registry, reasoner)) = &self.catalogue else {
            return Ok(());
        };
        let mut checked = FxHashSet::default();
        for pattern in patterns {
            let NamedNodePattern::NamedNode(predicate) = &pattern.predicate else {
                continue;
            };
            if !checked.insert(predicate) {
                continue;
            }
            let resolvable = !registry.find_backends_for_predicate(predicate).is_empty()
                || reasoner
                    .equivalent_properties(predicate)
                    .iter()
                    .any(|p| !registry.find_backends_for_predicate(p).is_empty())
                || !registry
                    .find_backends_for_predicate(&inverse_property(reasoner.as_ref(), predicate))
                    .is_empty();
            if !resolvable {
                return Err(OptimizationError::UnresolvablePredicate(predicate.clone()));
            }
        }
        Ok(())
    }
}

impl<S: StatsStore> PatternOrdering for StaticOptimizer<S> {
    fn order(&self, patterns: &[TriplePattern]) -> Result<Vec<TriplePattern>, OptimizationError> {
        match self.optimize(patterns) {
            Ok(order) => {
                debug!("Spanning tree order: {order:?}");
                Ok(order)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Falling back to greedy pattern ordering: {e}");
                self.fallback.order(patterns)
            }
        }
    }
}

/// The indexes of the patterns inside of the component, in input order.
fn component_patterns(graph: &PatternGraph, component: &[usize], len: usize) -> Vec<usize> {
    (0..len)
        .filter(|i| component.binary_search(&graph.pattern_ends(*i).0).is_ok())
        .collect()
}

/// Inserts the component patterns missing from the tree at the first position where both their ends are bound.
///
/// Inserted patterns keep their input order.
fn reinsert_filters(
    graph: &PatternGraph,
    component: &[usize],
    tree: Vec<usize>,
    len: usize,
) -> Vec<usize> {
    let in_tree = tree.iter().copied().collect::<FxHashSet<_>>();
    let mut output = tree
        .into_iter()
        .map(|i| (i, false))
        .collect::<Vec<_>>();
    for pattern in component_patterns(graph, component, len) {
        if in_tree.contains(&pattern) {
            continue;
        }
        let (subject, object) = graph.pattern_ends(pattern);
        let mut bound = component
            .iter()
            .copied()
            .filter(|id| graph.is_concrete(*id))
            .collect::<FxHashSet<_>>();
        let mut position = None;
        for (i, (tree_pattern, _)) in output.iter().enumerate() {
            if bound.contains(&subject) && bound.contains(&object) {
                position = Some(i);
                break;
            }
            let (s, o) = graph.pattern_ends(*tree_pattern);
            bound.insert(s);
            bound.insert(o);
        }
        let mut position = position.unwrap_or(output.len());
        if bound.contains(&subject) && bound.contains(&object) {
            while position < output.len() && output[position].1 {
                position += 1;
            }
        }
        output.insert(position, (pattern, true));
    }
    output.into_iter().map(|(i, _)| i).collect()
}
