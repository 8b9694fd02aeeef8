use crate::error::OptimizationError;
use crate::model::open_variable;
use crate::optimizer::PatternOrdering;
use oxrdf::Variable;
use rustc_hash::FxHashSet;
use spargebra::term::{NamedNodePattern, TriplePattern};
use tracing::debug;

/// What to do when no remaining pattern has at most one unbound variable.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub enum FallbackPolicy {
    /// Append the remaining patterns in input order
    #[default]
    Permissive,
    /// Fail with [`OptimizationError::UnresolvableQuery`]
    Strict,
}

/// Deterministic ordering that moves forward the first pattern that is resolvable given the variables bound so far.
///
/// It does not look at statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyReorder {
    policy: FallbackPolicy,
}

impl GreedyReorder {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }
}

impl PatternOrdering for GreedyReorder {
    fn order(&self, patterns: &[TriplePattern]) -> Result<Vec<TriplePattern>, OptimizationError> {
        if let Some(pattern) = patterns
            .iter()
            .find(|p| matches!(p.predicate, NamedNodePattern::Variable(_)))
        {
            return Err(OptimizationError::PredicateVariable(pattern.clone()));
        }
        let mut remaining = patterns.to_vec();
        let mut output = Vec::with_capacity(patterns.len());
        let mut bound = FxHashSet::default();
        while !remaining.is_empty() {
            let Some(position) = remaining
                .iter()
                .position(|p| unbound_count(p, &bound) <= 1)
            else {
                debug!(
                    "{} patterns have more than one unbound variable",
                    remaining.len()
                );
                return match self.policy {
                    FallbackPolicy::Permissive => {
                        output.extend(remaining);
                        Ok(output)
                    }
                    FallbackPolicy::Strict => Err(OptimizationError::UnresolvableQuery {
                        remaining: remaining.len(),
                    }),
                };
            };
            let pattern = remaining.remove(position);
            bound.extend(open_variable(&pattern.subject));
            bound.extend(open_variable(&pattern.object));
            output.push(pattern);
        }
        Ok(output)
    }
}

fn unbound_count(pattern: &TriplePattern, bound: &FxHashSet<Variable>) -> usize {
    [&pattern.subject, &pattern.object]
        .into_iter()
        .filter_map(open_variable)
        .filter(|v| !bound.contains(v))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{Literal, NamedNode};
    use spargebra::term::TermPattern;

    fn var(name: &str) -> TermPattern {
        Variable::new_unchecked(name).into()
    }

    fn pattern(s: TermPattern, p: &str, o: TermPattern) -> TriplePattern {
        TriplePattern {
            subject: s,
            predicate: NamedNode::new_unchecked(format!("http://example.com/{p}")).into(),
            object: o,
        }
    }

    #[test]
    fn resolvable_order_is_kept() -> Result<(), OptimizationError> {
        let patterns = vec![
            pattern(var("a"), "p", Literal::from("x").into()),
            pattern(var("a"), "q", var("b")),
            pattern(var("b"), "r", var("c")),
        ];
        assert_eq!(GreedyReorder::default().order(&patterns)?, patterns);
        Ok(())
    }

    #[test]
    fn anchored_pattern_moves_first() -> Result<(), OptimizationError> {
        let patterns = vec![
            pattern(var("b"), "r", var("c")),
            pattern(var("a"), "q", var("b")),
            pattern(var("a"), "p", Literal::from("x").into()),
        ];
        let ordered = GreedyReorder::default().order(&patterns)?;
        assert_eq!(
            ordered,
            vec![
                patterns[2].clone(),
                patterns[1].clone(),
                patterns[0].clone()
            ]
        );
        Ok(())
    }

    #[test]
    fn blank_nodes_count_as_variables() {
        let patterns = vec![pattern(
            TermPattern::BlankNode(oxrdf::BlankNode::new_unchecked("b")),
            "p",
            var("x"),
        )];
        assert!(matches!(
            GreedyReorder::new(FallbackPolicy::Strict).order(&patterns),
            Err(OptimizationError::UnresolvableQuery { remaining: 1 })
        ));
    }

    #[test]
    fn unresolvable_remainder() -> Result<(), OptimizationError> {
        let patterns = vec![
            pattern(var("a"), "p", var("b")),
            pattern(var("c"), "q", Literal::from(1).into()),
            pattern(var("d"), "q", var("e")),
        ];
        assert_eq!(
            GreedyReorder::new(FallbackPolicy::Permissive).order(&patterns)?,
            vec![
                patterns[1].clone(),
                patterns[0].clone(),
                patterns[2].clone()
            ]
        );
        assert!(matches!(
            GreedyReorder::new(FallbackPolicy::Strict).order(&patterns),
            Err(OptimizationError::UnresolvableQuery { remaining: 2 })
        ));
        Ok(())
    }
}
