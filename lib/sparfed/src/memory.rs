//! In-memory implementations of the federation ports.
//!
//! They back the command line tool when backends are described by local data files, and the tests.

use crate::error::{BackendError, RegistryError};
use crate::model::{BackendStatus, as_subject};
use crate::registry::{Backend, LookupQuery, PredicateService, Registry, SparqlEndpoint};
use oxrdf::vocab::rdf;
use oxrdf::{Graph, NamedNode, Term, TermRef, Triple, TripleRef};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// A failure simulated by [`GraphEndpoint`] and [`GraphService`] on every call.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SimulatedFailure {
    Timeout,
    Unavailable,
}

struct CallCounter {
    uri: NamedNode,
    calls: AtomicUsize,
    failure: Option<SimulatedFailure>,
}

impl CallCounter {
    fn new(uri: NamedNode) -> Self {
        Self {
            uri,
            calls: AtomicUsize::new(0),
            failure: None,
        }
    }

    fn call(&self, timeout: Duration) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.failure {
            None => Ok(()),
            Some(SimulatedFailure::Timeout) => Err(BackendError::Timeout {
                backend: self.uri.clone(),
                timeout,
            }),
            Some(SimulatedFailure::Unavailable) => Err(BackendError::Unavailable {
                backend: self.uri.clone(),
                message: "503 Service Unavailable".into(),
            }),
        }
    }
}

/// A [`SparqlEndpoint`] answering from an in-memory graph.
pub struct GraphEndpoint {
    counter: CallCounter,
    graph: Graph,
}

impl GraphEndpoint {
    pub fn new(uri: NamedNode, graph: Graph) -> Self {
        Self {
            counter: CallCounter::new(uri),
            graph,
        }
    }

    #[must_use]
    pub fn with_failure(mut self, failure: SimulatedFailure) -> Self {
        self.counter.failure = Some(failure);
        self
    }

    /// Number of calls received so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.counter.calls.load(Ordering::Relaxed)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    fn objects<'a>(&'a self, subject: &'a Term, predicate: &'a NamedNode) -> Vec<TermRef<'a>> {
        as_subject(subject).map_or_else(Vec::new, |subject| {
            self.graph
                .objects_for_subject_predicate(subject, predicate)
                .collect()
        })
    }
}

impl SparqlEndpoint for GraphEndpoint {
    fn uri(&self) -> &NamedNode {
        &self.counter.uri
    }

    fn select(&self, query: &LookupQuery, timeout: Duration) -> Result<Vec<Term>, BackendError> {
        self.counter.call(timeout)?;
        Ok(match query {
            LookupQuery::CountTriples { predicate } => {
                let count = self.graph.triples_for_predicate(predicate).count();
                vec![count_literal(count)]
            }
            LookupQuery::Triples { predicate } => self
                .graph
                .triples_for_predicate(predicate)
                .map(|t| t.subject.into_owned().into())
                .collect(),
            LookupQuery::SubjectAt { predicate, offset } => self
                .graph
                .triples_for_predicate(predicate)
                .nth(usize::try_from(*offset).unwrap_or(usize::MAX))
                .map(|t| t.subject.into_owned().into())
                .into_iter()
                .collect(),
            LookupQuery::ObjectAt { predicate, offset } => self
                .graph
                .triples_for_predicate(predicate)
                .nth(usize::try_from(*offset).unwrap_or(usize::MAX))
                .map(|t| t.object.into_owned())
                .into_iter()
                .collect(),
            LookupQuery::CountObjects { subject, predicate } => {
                vec![count_literal(self.objects(subject, predicate).len())]
            }
            LookupQuery::Objects { subject, predicate } => self
                .objects(subject, predicate)
                .into_iter()
                .map(TermRef::into_owned)
                .collect(),
            LookupQuery::CountSubjects { predicate, object } => vec![count_literal(
                self.graph
                    .subjects_for_predicate_object(predicate, object)
                    .count(),
            )],
            LookupQuery::Subjects { predicate, object } => self
                .graph
                .subjects_for_predicate_object(predicate, object)
                .map(|s| s.into_owned().into())
                .collect(),
            LookupQuery::Neighbourhood { .. } => {
                return Err(BackendError::InvalidResponse {
                    backend: self.counter.uri.clone(),
                    message: "CONSTRUCT queries have no SELECT results".into(),
                });
            }
        })
    }

    fn construct(
        &self,
        query: &LookupQuery,
        timeout: Duration,
    ) -> Result<Vec<Triple>, BackendError> {
        self.counter.call(timeout)?;
        let LookupQuery::Neighbourhood {
            subject,
            predicate,
            object,
        } = query
        else {
            return Err(BackendError::Unsupported(self.counter.uri.clone()));
        };
        Ok(self
            .graph
            .triples_for_predicate(predicate)
            .filter(|t| subject.as_ref().is_none_or(|s| TermRef::from(t.subject) == s.as_ref()))
            .filter(|t| object.as_ref().is_none_or(|o| t.object == o.as_ref()))
            .map(TripleRef::into_owned)
            .collect())
    }

    fn results_count_lower_bound(
        &self,
        query: &LookupQuery,
        cap: u64,
        timeout: Duration,
    ) -> Result<u64, BackendError> {
        let count = match query {
            LookupQuery::Neighbourhood { .. } => self.construct(query, timeout)?.len(),
            _ => self.select(query, timeout)?.len(),
        };
        Ok(u64::try_from(count).unwrap_or(u64::MAX).min(cap))
    }
}

fn count_literal(count: usize) -> Term {
    oxrdf::Literal::from(u64::try_from(count).unwrap_or(u64::MAX)).into()
}

/// A [`PredicateService`] returning, for each input, the triples of an in-memory graph having the input as subject.
///
/// If an input class is set, only the resources explicitly typed with it in the known facts are inputs.
pub struct GraphService {
    counter: CallCounter,
    graph: Graph,
    input_class: Option<NamedNode>,
}

impl GraphService {
    pub fn new(uri: NamedNode, graph: Graph) -> Self {
        Self {
            counter: CallCounter::new(uri),
            graph,
            input_class: None,
        }
    }

    #[must_use]
    pub fn with_input_class(mut self, class: NamedNode) -> Self {
        self.input_class = Some(class);
        self
    }

    #[must_use]
    pub fn with_failure(mut self, failure: SimulatedFailure) -> Self {
        self.counter.failure = Some(failure);
        self
    }

    pub fn call_count(&self) -> usize {
        self.counter.calls.load(Ordering::Relaxed)
    }
}

impl PredicateService for GraphService {
    fn uri(&self) -> &NamedNode {
        &self.counter.uri
    }

    fn invoke(&self, inputs: &[Term], timeout: Duration) -> Result<Vec<Triple>, BackendError> {
        self.counter.call(timeout)?;
        Ok(inputs
            .iter()
            .filter_map(as_subject)
            .flat_map(|s| self.graph.triples_for_subject(s))
            .map(TripleRef::into_owned)
            .collect())
    }

    fn invoke_with_predicate(
        &self,
        inputs: &[Term],
        predicate: &NamedNode,
        timeout: Duration,
    ) -> Result<Vec<Triple>, BackendError> {
        let mut triples = self.invoke(inputs, timeout)?;
        triples.retain(|t| t.predicate == *predicate);
        Ok(triples)
    }

    fn is_input_instance(&self, node: &Term, facts: &Graph) -> bool {
        let Some(subject) = as_subject(node) else {
            return false;
        };
        self.input_class
            .as_ref()
            .is_none_or(|class| facts.contains(TripleRef::new(subject, rdf::TYPE, class)))
    }

    fn discover_input_instances(&self, facts: &Graph) -> Option<Vec<Term>> {
        let class = self.input_class.as_ref()?;
        Some(
            facts
                .subjects_for_predicate_object(rdf::TYPE, class)
                .map(|s| s.into_owned().into())
                .collect(),
        )
    }

    fn input_class(&self) -> Option<&NamedNode> {
        self.input_class.as_ref()
    }
}

/// A [`Registry`] whose content is given at construction.
///
/// ```
/// use oxrdf::{Graph, NamedNode};
/// use sparfed::memory::{GraphEndpoint, MemoryRegistry};
/// use sparfed::{Backend, BackendStatus, Registry};
/// use std::sync::Arc;
///
/// let endpoint = NamedNode::new("http://example.com/sparql")?;
/// let mut registry = MemoryRegistry::new();
/// registry.add_backend(
///     Backend::Endpoint(Arc::new(GraphEndpoint::new(endpoint.clone(), Graph::new()))),
///     [NamedNode::new("http://example.com/p")?],
/// )?;
/// assert_eq!(registry.backend_status(&endpoint)?, BackendStatus::Ok);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Default)]
pub struct MemoryRegistry {
    backends: Vec<Backend>,
    by_predicate: FxHashMap<NamedNode, Vec<usize>>,
    predicates: Vec<NamedNode>,
    statuses: RwLock<FxHashMap<NamedNode, BackendStatus>>,
    datatype_properties: FxHashSet<NamedNode>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend serving the given predicates.
    ///
    /// Registering the same IRI twice adds predicates to the existing backend.
    /// It fails if the IRI has been registered as an endpoint and as a service.
    pub fn add_backend(
        &mut self,
        backend: Backend,
        predicates: impl IntoIterator<Item = NamedNode>,
    ) -> Result<(), RegistryError> {
        let position = if let Some(position) =
            self.backends.iter().position(|b| b.uri() == backend.uri())
        {
            if matches!(self.backends[position], Backend::Endpoint(_))
                != matches!(backend, Backend::Endpoint(_))
            {
                return Err(RegistryError::Inconsistent {
                    backend: backend.uri().clone(),
                    message: "registered both as a SPARQL endpoint and as a service".into(),
                });
            }
            position
        } else {
            self.statuses
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(backend.uri().clone(), BackendStatus::Ok);
            self.backends.push(backend);
            self.backends.len() - 1
        };
        for predicate in predicates {
            let served_by = self.by_predicate.entry(predicate.clone()).or_default();
            if served_by.is_empty() {
                self.predicates.push(predicate);
            }
            if !served_by.contains(&position) {
                served_by.push(position);
            }
        }
        Ok(())
    }

    pub fn add_datatype_property(&mut self, predicate: NamedNode) {
        self.datatype_properties.insert(predicate);
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }
}

impl Registry for MemoryRegistry {
    fn find_backends_for_predicate(&self, predicate: &NamedNode) -> Vec<Backend> {
        self.by_predicate
            .get(predicate)
            .map(|positions| positions.iter().map(|i| self.backends[*i].clone()).collect())
            .unwrap_or_default()
    }

    fn backend_status(&self, backend: &NamedNode) -> Result<BackendStatus, RegistryError> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(backend)
            .copied()
            .ok_or_else(|| RegistryError::UnknownBackend(backend.clone()))
    }

    fn set_backend_status(
        &self,
        backend: &NamedNode,
        status: BackendStatus,
    ) -> Result<(), RegistryError> {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        let current = statuses
            .get_mut(backend)
            .ok_or_else(|| RegistryError::UnknownBackend(backend.clone()))?;
        *current = status;
        Ok(())
    }

    fn is_datatype_property(&self, predicate: &NamedNode) -> bool {
        self.datatype_properties.contains(predicate)
    }

    fn estimated_triple_count(
        &self,
        backend: &Backend,
        predicate: &NamedNode,
        timeout: Duration,
    ) -> Result<u64, BackendError> {
        match backend {
            Backend::Endpoint(endpoint) => endpoint.count(
                &LookupQuery::CountTriples {
                    predicate: predicate.clone(),
                },
                timeout,
            ),
            Backend::Service(service) => Err(BackendError::Unsupported(service.uri().clone())),
        }
    }

    fn all_predicates(&self) -> Vec<NamedNode> {
        self.predicates.clone()
    }
}
