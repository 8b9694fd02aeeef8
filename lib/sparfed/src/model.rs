use oxrdf::{NamedNode, SubjectRef, Term, Variable};
use serde::{Deserialize, Serialize};
use spargebra::term::TermPattern;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Direction in which a predicate is traversed.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the subject to the object
    Forward,
    /// From the object to the subject
    Reverse,
}

impl Direction {
    #[inline]
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Direction {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a predicate statistic.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    /// Number of values reached from a single input
    Selectivity,
    /// Time in milliseconds to resolve a single input
    Time,
}

impl fmt::Display for StatKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Selectivity => "selectivity",
            Self::Time => "time",
        })
    }
}

/// A single observation of a predicate statistic.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct PredicateSample {
    pub predicate: NamedNode,
    pub kind: StatKind,
    pub direction: Direction,
    pub value: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl PredicateSample {
    /// Builds a sample observed now.
    pub fn new(predicate: NamedNode, kind: StatKind, direction: Direction, value: u64) -> Self {
        Self {
            predicate,
            kind,
            direction,
            value,
            timestamp: now_millis(),
        }
    }
}

/// Availability of a backend as known by the registry.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    #[default]
    Ok,
    /// Reachable but too slow for exact counting queries
    Slow,
    /// Not reachable, never called
    Dead,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Returns the variable that has to be bound by resolution for this term.
///
/// Blank nodes are non-distinguished variables: they get a variable name no SPARQL variable can have.
pub(crate) fn open_variable(term: &TermPattern) -> Option<Variable> {
    match term {
        TermPattern::Variable(v) => Some(v.clone()),
        TermPattern::BlankNode(b) => Some(Variable::new_unchecked(format!("-{}", b.as_str()))),
        _ => None,
    }
}

/// The RDF term of a pattern position without unknowns.
pub(crate) fn concrete_term(term: &TermPattern) -> Option<Term> {
    match term {
        TermPattern::NamedNode(n) => Some(n.clone().into()),
        TermPattern::Literal(l) => Some(l.clone().into()),
        _ => None,
    }
}

pub(crate) fn as_subject(term: &Term) -> Option<SubjectRef<'_>> {
    match term {
        Term::NamedNode(n) => Some(n.as_ref().into()),
        Term::BlankNode(b) => Some(b.as_ref().into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::{BlankNode, Literal};

    #[test]
    fn blank_nodes_are_open() {
        let b = BlankNode::new_unchecked("b1");
        let v = open_variable(&TermPattern::BlankNode(b)).unwrap();
        assert_eq!(v.as_str(), "-b1");
        assert!(open_variable(&TermPattern::Literal(Literal::from(1))).is_none());
        assert!(concrete_term(&TermPattern::Literal(Literal::from(1))).is_some());
    }

    #[test]
    fn direction_inverse() {
        assert_eq!(Direction::Forward.inverse(), Direction::Reverse);
        assert_eq!(Direction::Reverse.inverse().to_string(), "forward");
    }
}
