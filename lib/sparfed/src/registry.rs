use crate::error::{BackendError, RegistryError};
use crate::model::BackendStatus;
use oxrdf::{Graph, NamedNode, Term, Triple};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A single triple pattern lookup sent to a [`SparqlEndpoint`].
///
/// Its [`Display`](fmt::Display) implementation is the SPARQL query to send over the wire.
///
/// ```
/// use oxrdf::NamedNode;
/// use sparfed::LookupQuery;
///
/// let query = LookupQuery::SubjectAt {
///     predicate: NamedNode::new("http://example.com/p")?,
///     offset: 10,
/// };
/// assert_eq!(
///     query.to_string(),
///     "SELECT ?s WHERE { ?s <http://example.com/p> ?o } OFFSET 10 LIMIT 1"
/// );
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum LookupQuery {
    /// Number of triples with the predicate
    CountTriples { predicate: NamedNode },
    /// Subjects of all the triples with the predicate
    Triples { predicate: NamedNode },
    /// The subject of the triple at the given offset
    SubjectAt { predicate: NamedNode, offset: u64 },
    /// The object of the triple at the given offset
    ObjectAt { predicate: NamedNode, offset: u64 },
    /// Number of objects of the subject for the predicate
    CountObjects { subject: Term, predicate: NamedNode },
    /// Objects of the subject for the predicate
    Objects { subject: Term, predicate: NamedNode },
    /// Number of subjects having the object for the predicate
    CountSubjects { predicate: NamedNode, object: Term },
    /// Subjects having the object for the predicate
    Subjects { predicate: NamedNode, object: Term },
    /// All the triples with the predicate and the given subject or object
    Neighbourhood {
        subject: Option<Term>,
        predicate: NamedNode,
        object: Option<Term>,
    },
}

impl fmt::Display for LookupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountTriples { predicate } => {
                write!(f, "SELECT (COUNT(*) AS ?count) WHERE {{ ?s {predicate} ?o }}")
            }
            Self::Triples { predicate } => write!(f, "SELECT ?s WHERE {{ ?s {predicate} ?o }}"),
            Self::SubjectAt { predicate, offset } => write!(
                f,
                "SELECT ?s WHERE {{ ?s {predicate} ?o }} OFFSET {offset} LIMIT 1"
            ),
            Self::ObjectAt { predicate, offset } => write!(
                f,
                "SELECT ?o WHERE {{ ?s {predicate} ?o }} OFFSET {offset} LIMIT 1"
            ),
            Self::CountObjects { subject, predicate } => write!(
                f,
                "SELECT (COUNT(*) AS ?count) WHERE {{ {subject} {predicate} ?o }}"
            ),
            Self::Objects { subject, predicate } => {
                write!(f, "SELECT ?o WHERE {{ {subject} {predicate} ?o }}")
            }
            Self::CountSubjects { predicate, object } => write!(
                f,
                "SELECT (COUNT(*) AS ?count) WHERE {{ ?s {predicate} {object} }}"
            ),
            Self::Subjects { predicate, object } => {
                write!(f, "SELECT ?s WHERE {{ ?s {predicate} {object} }}")
            }
            Self::Neighbourhood {
                subject,
                predicate,
                object,
            } => {
                let subject = subject.as_ref().map_or_else(|| "?s".into(), Term::to_string);
                let object = object.as_ref().map_or_else(|| "?o".into(), Term::to_string);
                write!(
                    f,
                    "CONSTRUCT {{ {subject} {predicate} {object} }} WHERE {{ {subject} {predicate} {object} }}"
                )
            }
        }
    }
}

/// A SPARQL endpoint of the federation.
///
/// Implementations own the transport. They must honor the given timeout and report it as [`BackendError::Timeout`].
pub trait SparqlEndpoint: Send + Sync {
    fn uri(&self) -> &NamedNode;

    /// Evaluates a single-variable query and returns the values of this variable.
    fn select(&self, query: &LookupQuery, timeout: Duration) -> Result<Vec<Term>, BackendError>;

    /// Evaluates a [`LookupQuery::Neighbourhood`] query.
    fn construct(&self, query: &LookupQuery, timeout: Duration)
    -> Result<Vec<Triple>, BackendError>;

    /// Counts the results of the query, stopping at `cap`.
    ///
    /// Cheaper than a `COUNT` on slow endpoints.
    fn results_count_lower_bound(
        &self,
        query: &LookupQuery,
        cap: u64,
        timeout: Duration,
    ) -> Result<u64, BackendError>;

    /// Evaluates a `COUNT` query.
    fn count(&self, query: &LookupQuery, timeout: Duration) -> Result<u64, BackendError> {
        match self.select(query, timeout)?.first() {
            Some(Term::Literal(count)) => {
                count
                    .value()
                    .parse()
                    .map_err(|_| BackendError::InvalidResponse {
                        backend: self.uri().clone(),
                        message: format!("{count} is not a valid count"),
                    })
            }
            Some(other) => Err(BackendError::InvalidResponse {
                backend: self.uri().clone(),
                message: format!("{other} is not a valid count"),
            }),
            None => Ok(0),
        }
    }
}

/// A service computing the values of some predicates for its input nodes.
pub trait PredicateService: Send + Sync {
    fn uri(&self) -> &NamedNode;

    /// Calls the service on the given input nodes.
    fn invoke(&self, inputs: &[Term], timeout: Duration) -> Result<Vec<Triple>, BackendError>;

    /// Calls the service asking only for the given predicate.
    ///
    /// Services unable to restrict their output ignore the predicate.
    fn invoke_with_predicate(
        &self,
        inputs: &[Term],
        predicate: &NamedNode,
        timeout: Duration,
    ) -> Result<Vec<Triple>, BackendError> {
        let _ = predicate;
        self.invoke(inputs, timeout)
    }

    /// If the node is a valid input of the service according to the known facts.
    fn is_input_instance(&self, node: &Term, facts: &Graph) -> bool;

    /// All the valid inputs present in the facts, if the service is able to compute them at once.
    fn discover_input_instances(&self, facts: &Graph) -> Option<Vec<Term>> {
        let _ = facts;
        None
    }

    /// The class of the valid inputs, if known.
    fn input_class(&self) -> Option<&NamedNode> {
        None
    }
}

/// A backend of the federation.
#[derive(Clone)]
pub enum Backend {
    Endpoint(Arc<dyn SparqlEndpoint>),
    Service(Arc<dyn PredicateService>),
}

impl Backend {
    pub fn uri(&self) -> &NamedNode {
        match self {
            Self::Endpoint(endpoint) => endpoint.uri(),
            Self::Service(service) => service.uri(),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint(endpoint) => f.debug_tuple("Endpoint").field(endpoint.uri()).finish(),
            Self::Service(service) => f.debug_tuple("Service").field(service.uri()).finish(),
        }
    }
}

/// The catalogue of the federation backends.
pub trait Registry: Send + Sync {
    /// The backends able to resolve the predicate.
    fn find_backends_for_predicate(&self, predicate: &NamedNode) -> Vec<Backend>;

    fn backend_status(&self, backend: &NamedNode) -> Result<BackendStatus, RegistryError>;

    fn set_backend_status(
        &self,
        backend: &NamedNode,
        status: BackendStatus,
    ) -> Result<(), RegistryError>;

    /// If the predicate values are literals.
    fn is_datatype_property(&self, predicate: &NamedNode) -> bool;

    /// Number of triples with the predicate in the backend.
    fn estimated_triple_count(
        &self,
        backend: &Backend,
        predicate: &NamedNode,
        timeout: Duration,
    ) -> Result<u64, BackendError>;

    /// All predicates served by at least one backend.
    fn all_predicates(&self) -> Vec<NamedNode>;
}

impl<R: Registry + ?Sized> Registry for Arc<R> {
    fn find_backends_for_predicate(&self, predicate: &NamedNode) -> Vec<Backend> {
        (**self).find_backends_for_predicate(predicate)
    }

    fn backend_status(&self, backend: &NamedNode) -> Result<BackendStatus, RegistryError> {
        (**self).backend_status(backend)
    }

    fn set_backend_status(
        &self,
        backend: &NamedNode,
        status: BackendStatus,
    ) -> Result<(), RegistryError> {
        (**self).set_backend_status(backend, status)
    }

    fn is_datatype_property(&self, predicate: &NamedNode) -> bool {
        (**self).is_datatype_property(predicate)
    }

    fn estimated_triple_count(
        &self,
        backend: &Backend,
        predicate: &NamedNode,
        timeout: Duration,
    ) -> Result<u64, BackendError> {
        (**self).estimated_triple_count(backend, predicate, timeout)
    }

    fn all_predicates(&self) -> Vec<NamedNode> {
        (**self).all_predicates()
    }
}

/// Fetches the graphs named in the `FROM` clauses of queries.
pub trait SourceLoader: Send + Sync {
    fn load(&self, graph: &NamedNode) -> Result<Graph, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::Literal;

    #[test]
    fn lookup_query_serialization() {
        let p = NamedNode::new_unchecked("http://example.com/p");
        assert_eq!(
            LookupQuery::CountObjects {
                subject: NamedNode::new_unchecked("http://example.com/s").into(),
                predicate: p.clone(),
            }
            .to_string(),
            "SELECT (COUNT(*) AS ?count) WHERE { <http://example.com/s> <http://example.com/p> ?o }"
        );
        assert_eq!(
            LookupQuery::Subjects {
                predicate: p.clone(),
                object: Literal::new_simple_literal("Smith").into(),
            }
            .to_string(),
            "SELECT ?s WHERE { ?s <http://example.com/p> \"Smith\" }"
        );
        assert_eq!(
            LookupQuery::Neighbourhood {
                subject: None,
                predicate: p,
                object: Some(Literal::from(1).into()),
            }
            .to_string(),
            "CONSTRUCT { ?s <http://example.com/p> \"1\"^^<http://www.w3.org/2001/XMLSchema#integer> } WHERE { ?s <http://example.com/p> \"1\"^^<http://www.w3.org/2001/XMLSchema#integer> }"
        );
    }
}
