use crate::error::OptimizationError;
use crate::model::Direction;
use oxrdf::NamedNode;
use rustc_hash::FxHashMap;
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};

/// An adjacency entry of the [`PatternGraph`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Edge {
    pub predicate: NamedNode,
    /// The node at the other end
    pub target: usize,
    /// [`Direction::Forward`] if the edge goes from the pattern subject to its object
    pub direction: Direction,
    /// Index of the pattern in the input
    pub pattern: usize,
}

/// The graph whose nodes are the subjects and objects of a basic graph pattern and whose edges are its triple patterns.
///
/// Equal terms are the same node. Nodes are numbered in order of first appearance.
#[derive(Debug, Clone)]
pub struct PatternGraph {
    nodes: Vec<TermPattern>,
    adjacency: Vec<Vec<Edge>>,
    ends: Vec<(usize, usize)>,
}

impl PatternGraph {
    /// Builds the graph, failing if a pattern has a variable in predicate position.
    pub fn build(patterns: &[TriplePattern]) -> Result<Self, OptimizationError> {
        let mut graph = Self {
            nodes: Vec::new(),
            adjacency: Vec::new(),
            ends: Vec::with_capacity(patterns.len()),
        };
        let mut ids = FxHashMap::<&TermPattern, usize>::default();
        for (i, pattern) in patterns.iter().enumerate() {
            let NamedNodePattern::NamedNode(predicate) = &pattern.predicate else {
                return Err(OptimizationError::PredicateVariable(pattern.clone()));
            };
            let subject = graph.node_id(&mut ids, &pattern.subject);
            let object = graph.node_id(&mut ids, &pattern.object);
            graph.adjacency[subject].push(Edge {
                predicate: predicate.clone(),
                target: object,
                direction: Direction::Forward,
                pattern: i,
            });
            graph.adjacency[object].push(Edge {
                predicate: predicate.clone(),
                target: subject,
                direction: Direction::Reverse,
                pattern: i,
            });
            graph.ends.push((subject, object));
        }
        Ok(graph)
    }

    fn node_id<'a>(
        &mut self,
        ids: &mut FxHashMap<&'a TermPattern, usize>,
        term: &'a TermPattern,
    ) -> usize {
        *ids.entry(term).or_insert_with(|| {
            self.nodes.push(term.clone());
            self.adjacency.push(Vec::new());
            self.nodes.len() - 1
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> &TermPattern {
        &self.nodes[id]
    }

    /// If the node term is known without resolution.
    pub fn is_concrete(&self, id: usize) -> bool {
        matches!(
            self.nodes[id],
            TermPattern::NamedNode(_) | TermPattern::Literal(_)
        )
    }

    pub fn edges(&self, id: usize) -> &[Edge] {
        &self.adjacency[id]
    }

    /// The subject and object nodes of the pattern at the given input index.
    pub fn pattern_ends(&self, pattern: usize) -> (usize, usize) {
        self.ends[pattern]
    }

    /// Connected components, as sorted node lists.
    ///
    /// Components are returned in order of their first node.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut component_of = vec![usize::MAX; self.nodes.len()];
        let mut components = Vec::new();
        for start in 0..self.nodes.len() {
            if component_of[start] != usize::MAX {
                continue;
            }
            let id = components.len();
            let mut members = vec![start];
            component_of[start] = id;
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                for edge in &self.adjacency[node] {
                    if component_of[edge.target] == usize::MAX {
                        component_of[edge.target] = id;
                        members.push(edge.target);
                        stack.push(edge.target);
                    }
                }
            }
            members.sort_unstable();
            components.push(members);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{Literal, Variable};

    fn var(name: &str) -> TermPattern {
        Variable::new_unchecked(name).into()
    }

    fn pattern(s: TermPattern, p: &str, o: TermPattern) -> TriplePattern {
        TriplePattern {
            subject: s,
            predicate: NamedNode::new_unchecked(p).into(),
            object: o,
        }
    }

    #[test]
    fn edges_are_symmetric() -> Result<(), OptimizationError> {
        let graph = PatternGraph::build(&[
            pattern(var("a"), "http://example.com/p", var("b")),
            pattern(var("b"), "http://example.com/q", Literal::from(1).into()),
        ])?;
        assert_eq!(graph.len(), 3);
        assert!(!graph.is_concrete(0));
        assert!(graph.is_concrete(2));
        assert_eq!(graph.edges(0).len(), 1);
        assert_eq!(graph.edges(1).len(), 2);
        assert_eq!(graph.edges(0)[0].direction, Direction::Forward);
        assert_eq!(graph.edges(1)[0].direction, Direction::Reverse);
        assert_eq!(graph.edges(1)[0].target, 0);
        assert_eq!(graph.pattern_ends(1), (1, 2));
        Ok(())
    }

    #[test]
    fn predicate_variables_are_rejected() {
        let result = PatternGraph::build(&[TriplePattern {
            subject: var("a"),
            predicate: Variable::new_unchecked("p").into(),
            object: var("b"),
        }]);
        assert!(matches!(
            result,
            Err(OptimizationError::PredicateVariable(_))
        ));
    }

    #[test]
    fn components_in_first_appearance_order() -> Result<(), OptimizationError> {
        let graph = PatternGraph::build(&[
            pattern(var("a"), "http://example.com/p", var("b")),
            pattern(var("c"), "http://example.com/p", var("d")),
            pattern(var("b"), "http://example.com/p", var("e")),
        ])?;
        assert_eq!(graph.components(), vec![vec![0, 1, 4], vec![2, 3]]);
        Ok(())
    }
}
