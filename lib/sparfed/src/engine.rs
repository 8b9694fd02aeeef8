use crate::context::{ExecutionContext, ExecutionState, VisitKey};
use crate::error::{BackendError, OptimizationError, ResolutionError};
use crate::model::{BackendStatus, Direction, as_subject, concrete_term, open_variable};
use crate::optimizer::PatternOrdering;
use crate::reasoning::{MissingFactResolver, Reasoner, RestrictionKind, inverse_property};
use crate::registry::{Backend, LookupQuery, PredicateService, Registry, SourceLoader};
use crate::sampler::PredicateResolver;
use oxrdf::vocab::rdf;
use oxrdf::{Graph, NamedNode, Term, TermRef, Triple, TripleRef, Variable};
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::Query;
use spargebra::algebra::{GraphPattern, QueryDataset};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use std::slice;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Maximal nesting of class restrictions followed when resolving class members.
const MAX_CLASS_DEPTH: usize = 8;

/// Options of the [`ResolutionEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    endpoint_timeout: Duration,
    service_timeout: Duration,
    dynamic_input_classification: bool,
    dead_backends: Vec<NamedNode>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            endpoint_timeout: Duration::from_secs(30),
            service_timeout: Duration::from_secs(60),
            dynamic_input_classification: false,
            dead_backends: Vec::new(),
        }
    }
}

impl EngineOptions {
    /// Timeout of each SPARQL endpoint call, 30s by default.
    #[must_use]
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// Timeout of each service call, 60s by default.
    #[must_use]
    pub fn with_service_timeout(mut self, timeout: Duration) -> Self {
        self.service_timeout = timeout;
        self
    }

    /// Before discarding a node that is not a valid input of a service, tries to prove with the [`Reasoner`] that it belongs to the service input class.
    ///
    /// The reasoner may trigger resolution to do so.
    #[must_use]
    pub fn with_dynamic_input_classification(mut self) -> Self {
        self.dynamic_input_classification = true;
        self
    }

    /// Backends considered dead from the start of every execution.
    #[must_use]
    pub fn with_dead_backend(mut self, backend: NamedNode) -> Self {
        self.dead_backends.push(backend);
        self
    }
}

/// The outcome of a successful execution.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The order in which the patterns have been resolved
    pub order: Vec<TriplePattern>,
    /// The source graphs and all the facts returned by backends
    pub facts: Graph,
    pub bindings: FxHashMap<Variable, FxHashSet<Term>>,
    pub dead_backends: Vec<NamedNode>,
    /// Number of backend calls
    pub calls: usize,
}

/// Resolves basic graph patterns by calling the federation backends in the order given by a [`PatternOrdering`].
///
/// Each pattern is resolved from its bound end:
/// the values of the other end are added to the bindings and the returned facts to the working store.
pub struct ResolutionEngine {
    registry: Arc<dyn Registry>,
    reasoner: Arc<dyn Reasoner>,
    ordering: Arc<dyn PatternOrdering>,
    options: EngineOptions,
}

impl ResolutionEngine {
    pub fn new(
        registry: Arc<dyn Registry>,
        reasoner: Arc<dyn Reasoner>,
        ordering: Arc<dyn PatternOrdering>,
    ) -> Self {
        Self {
            registry,
            reasoner,
            ordering,
            options: EngineOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// A fresh context with the configured dead backends.
    pub fn new_context(&self) -> ExecutionContext {
        let ctx = ExecutionContext::new();
        for backend in &self.options.dead_backends {
            ctx.mark_dead(backend);
        }
        ctx
    }

    /// Resolves the patterns, starting from the facts of the source graphs.
    pub fn execute(
        &self,
        patterns: &[TriplePattern],
        sources: impl IntoIterator<Item = Graph>,
    ) -> Result<Execution, ResolutionError> {
        let ctx = self.new_context();
        let order = self.execute_in(&ctx, patterns, sources)?;
        Ok(Execution {
            order,
            bindings: ctx.bindings(),
            dead_backends: ctx.dead_backends(),
            calls: ctx.call_count(),
            facts: ctx.into_facts(),
        })
    }

    /// Like [`execute`](Self::execute) but with a caller-provided context that can be inspected afterward.
    ///
    /// Returns the resolution order.
    pub fn execute_in(
        &self,
        ctx: &ExecutionContext,
        patterns: &[TriplePattern],
        sources: impl IntoIterator<Item = Graph>,
    ) -> Result<Vec<TriplePattern>, ResolutionError> {
        ctx.set_state(ExecutionState::Initializing);
        for source in sources {
            let added = ctx.add_facts(source.iter());
            debug!("Loaded {added} facts from a source graph");
        }
        let order = match self.ordering.order(patterns) {
            Ok(order) => order,
            Err(e) => {
                ctx.set_state(ExecutionState::Failed);
                return Err(e.into());
            }
        };
        ctx.set_state(ExecutionState::Resolving);
        for pattern in &order {
            if let Err(e) = self.resolve_pattern(ctx, pattern) {
                ctx.set_state(ExecutionState::Failed);
                return Err(e);
            }
        }
        ctx.set_state(ExecutionState::Done);
        Ok(order)
    }

    /// Resolves all the basic graph patterns of the query.
    ///
    /// The graphs of the `FROM` and `FROM NAMED` clauses are fetched with the loader and used as sources.
    pub fn execute_query(
        &self,
        query: &Query,
        loader: Option<&dyn SourceLoader>,
    ) -> Result<Execution, ResolutionError> {
        let (dataset, patterns) = query_parts(query)?;
        let mut sources = Vec::new();
        if let Some(dataset) = dataset {
            for graph in dataset
                .default
                .iter()
                .chain(dataset.named.iter().flatten())
            {
                let Some(loader) = loader else {
                    warn!("No loader available for source graph {graph}, skipping it");
                    continue;
                };
                sources.push(
                    loader
                        .load(graph)
                        .map_err(|error| ResolutionError::SourceLoading {
                            graph: graph.clone(),
                            error,
                        })?,
                );
            }
        }
        self.execute(&patterns, sources)
    }

    /// The order in which the basic graph patterns of the query would be resolved.
    ///
    /// No backend is called.
    pub fn plan_query(&self, query: &Query) -> Result<Vec<TriplePattern>, ResolutionError> {
        let (_, patterns) = query_parts(query)?;
        Ok(self.ordering.order(&patterns)?)
    }

    /// A [`MissingFactResolver`] resolving in the given execution context.
    pub fn missing_fact_resolver<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
    ) -> impl MissingFactResolver + 'a {
        ContextResolver { engine: self, ctx }
    }

    fn resolve_pattern(
        &self,
        ctx: &ExecutionContext,
        pattern: &TriplePattern,
    ) -> Result<(), ResolutionError> {
        let NamedNodePattern::NamedNode(predicate) = &pattern.predicate else {
            return Err(OptimizationError::PredicateVariable(pattern.clone()).into());
        };
        debug!("Resolving {pattern}");
        let subjects = expand(ctx, &pattern.subject);
        let objects = expand(ctx, &pattern.object);

        if predicate.as_ref() == rdf::TYPE {
            if let Expansion::Bound(classes) = &objects {
                let known = match &subjects {
                    Expansion::Bound(subjects) => Some(subjects.clone()),
                    Expansion::Unbound(_) => None,
                };
                for class in classes {
                    let Term::NamedNode(class) = class else {
                        warn!("Skipping {pattern}: {class} is not a class");
                        continue;
                    };
                    let instances = self.resolve_class(ctx, class, known.clone(), 0)?;
                    if let Expansion::Unbound(variable) = &subjects {
                        ctx.bind(variable, instances);
                    }
                }
                return Ok(());
            }
        }

        match (subjects, objects) {
            (Expansion::Bound(subjects), Expansion::Bound(_)) => {
                self.resolve_predicate(ctx, predicate, &subjects, Direction::Forward)?;
            }
            (Expansion::Bound(subjects), Expansion::Unbound(variable)) => {
                let values = self.resolve_predicate(ctx, predicate, &subjects, Direction::Forward)?;
                ctx.bind(&variable, values);
            }
            (Expansion::Unbound(variable), Expansion::Bound(objects)) => {
                let values = self.resolve_predicate(ctx, predicate, &objects, Direction::Reverse)?;
                ctx.bind(&variable, values);
            }
            (Expansion::Unbound(_), Expansion::Unbound(_)) => {
                warn!("Skipping {pattern}: neither its subject nor its object is bound");
            }
        }
        Ok(())
    }

    /// Finds the members of the class among the known subjects, or among all resources if `subjects` is `None`.
    fn resolve_class(
        &self,
        ctx: &ExecutionContext,
        class: &NamedNode,
        subjects: Option<Vec<Term>>,
        depth: usize,
    ) -> Result<Vec<Term>, ResolutionError> {
        let mut restrictions = self.reasoner.decompose_class(class);
        if restrictions.is_empty() {
            return match subjects {
                Some(subjects) => {
                    self.resolve_predicate(ctx, &rdf::TYPE.into_owned(), &subjects, Direction::Forward)?;
                    Ok(ctx.with_facts(|facts| {
                        subjects
                            .into_iter()
                            .filter(|s| {
                                as_subject(s).is_some_and(|subject| {
                                    facts.contains(TripleRef::new(subject, rdf::TYPE, class))
                                })
                            })
                            .collect()
                    }))
                }
                None => self.resolve_predicate(
                    ctx,
                    &rdf::TYPE.into_owned(),
                    &[class.clone().into()],
                    Direction::Reverse,
                ),
            };
        }
        // Value restrictions are the only way to find members from nothing
        restrictions.sort_by_key(|r| !matches!(r.kind, RestrictionKind::HasValue(_)));
        let mut current = subjects;
        for restriction in restrictions {
            let property = &restriction.property;
            current = match (restriction.kind, current) {
                (RestrictionKind::HasValue(value), None) => Some(self.resolve_predicate(
                    ctx,
                    property,
                    slice::from_ref(&value),
                    Direction::Reverse,
                )?),
                (_, None) => {
                    warn!(
                        "Unable to find members of {class} from the restriction on {property} without known subjects"
                    );
                    None
                }
                (RestrictionKind::SomeValue, Some(subjects)) => {
                    self.resolve_predicate(ctx, property, &subjects, Direction::Forward)?;
                    Some(keep_subjects(ctx, subjects, property, |_| true))
                }
                (RestrictionKind::HasValue(value), Some(subjects)) => {
                    self.resolve_predicate(ctx, property, &subjects, Direction::Forward)?;
                    Some(keep_subjects(ctx, subjects, property, |v| v == value.as_ref()))
                }
                (RestrictionKind::SomeValuesFrom(range), Some(subjects)) => {
                    let values =
                        self.resolve_predicate(ctx, property, &subjects, Direction::Forward)?;
                    if depth < MAX_CLASS_DEPTH {
                        let members = self
                            .resolve_class(ctx, &range, Some(values), depth + 1)?
                            .into_iter()
                            .collect::<FxHashSet<_>>();
                        Some(keep_subjects(ctx, subjects, property, |v| {
                            members.contains(&v.into_owned())
                        }))
                    } else {
                        Some(keep_subjects(ctx, subjects, property, |_| true))
                    }
                }
            };
        }
        Ok(current.unwrap_or_default())
    }

    /// Calls all the backends able to compute the predicate values of the inputs and returns these values.
    ///
    /// With [`Direction::Reverse`] the inputs are objects and the returned values are subjects.
    /// Backends of the equivalent properties and of the inverse property are used too.
    pub fn resolve_predicate(
        &self,
        ctx: &ExecutionContext,
        predicate: &NamedNode,
        inputs: &[Term],
        direction: Direction,
    ) -> Result<Vec<Term>, ResolutionError> {
        let inverse = inverse_property(self.reasoner.as_ref(), predicate);
        let mut forward = vec![predicate.clone()];
        forward.extend(self.reasoner.equivalent_properties(predicate));
        let mut backward = vec![inverse.clone()];
        backward.extend(self.reasoner.equivalent_properties(&inverse));
        // Triples with an `along` predicate go from the inputs, `against` ones go toward them
        let (along, against) = match direction {
            Direction::Forward => (forward, backward),
            Direction::Reverse => (backward, forward),
        };

        for p in &along {
            for backend in self.registry.find_backends_for_predicate(p) {
                self.call_backend(ctx, &backend, p, Direction::Forward, inputs)?;
            }
        }
        for p in &against {
            for backend in self.registry.find_backends_for_predicate(p) {
                if matches!(backend, Backend::Endpoint(_)) {
                    self.call_backend(ctx, &backend, p, Direction::Reverse, inputs)?;
                }
            }
        }

        Ok(ctx.with_facts(|facts| {
            let mut seen = FxHashSet::default();
            let mut values = Vec::new();
            for input in inputs {
                if let Some(subject) = as_subject(input) {
                    for p in &along {
                        for object in facts.objects_for_subject_predicate(subject, p) {
                            if seen.insert(object) {
                                values.push(object.into_owned());
                            }
                        }
                    }
                }
                for p in &against {
                    for subject in facts.subjects_for_predicate_object(p, input) {
                        let subject = TermRef::from(subject);
                        if seen.insert(subject) {
                            values.push(subject.into_owned());
                        }
                    }
                }
            }
            values
        }))
    }

    /// Calls a backend for the inputs not already sent to it, and adds the returned facts to the working store.
    ///
    /// With [`Direction::Reverse`] the inputs are the objects of the lookup.
    fn call_backend(
        &self,
        ctx: &ExecutionContext,
        backend: &Backend,
        predicate: &NamedNode,
        direction: Direction,
        inputs: &[Term],
    ) -> Result<(), ResolutionError> {
        let uri = backend.uri();
        if ctx.is_dead(uri) {
            trace!("Skipping dead backend {uri}");
            return Ok(());
        }
        if self.registry.backend_status(uri)? == BackendStatus::Dead {
            debug!("{uri} is registered as dead");
            ctx.mark_dead(uri);
            return Ok(());
        }
        let lookup = match backend {
            Backend::Endpoint(_) => Some((predicate.clone(), direction)),
            Backend::Service(_) => None,
        };
        let fresh = inputs
            .iter()
            .filter(|input| {
                ctx.first_visit(VisitKey {
                    backend: uri.clone(),
                    lookup: lookup.clone(),
                    input: (*input).clone(),
                })
            })
            .cloned()
            .collect::<Vec<_>>();
        if fresh.is_empty() {
            trace!("All inputs have already been sent to {uri}");
            return Ok(());
        }
        match backend {
            Backend::Endpoint(endpoint) => {
                for input in fresh {
                    if ctx.is_dead(uri) {
                        break;
                    }
                    let query = match direction {
                        Direction::Forward => LookupQuery::Neighbourhood {
                            subject: Some(input),
                            predicate: predicate.clone(),
                            object: None,
                        },
                        Direction::Reverse => LookupQuery::Neighbourhood {
                            subject: None,
                            predicate: predicate.clone(),
                            object: Some(input),
                        },
                    };
                    debug!("Querying {uri}: {query}");
                    ctx.record_call();
                    match endpoint.construct(&query, self.options.endpoint_timeout) {
                        Ok(triples) => {
                            let added = ctx.add_facts(&triples);
                            trace!("{uri} returned {} triples, {added} new", triples.len());
                        }
                        Err(e) => handle_failure(ctx, uri, &e),
                    }
                }
            }
            Backend::Service(service) => {
                let accepted = self.input_instances(ctx, service.as_ref(), fresh);
                if accepted.is_empty() {
                    trace!("No valid input for {uri}");
                    return Ok(());
                }
                debug!("Calling {uri} on {} inputs", accepted.len());
                ctx.record_call();
                match service.invoke_with_predicate(
                    &accepted,
                    predicate,
                    self.options.service_timeout,
                ) {
                    Ok(triples) => {
                        let added = ctx.add_facts(&triples);
                        trace!("{uri} returned {} triples, {added} new", triples.len());
                    }
                    Err(e) => handle_failure(ctx, uri, &e),
                }
            }
        }
        Ok(())
    }

    /// Keeps the nodes the service accepts as inputs. Literals are never accepted.
    fn input_instances(
        &self,
        ctx: &ExecutionContext,
        service: &dyn PredicateService,
        candidates: Vec<Term>,
    ) -> Vec<Term> {
        let candidates = candidates
            .into_iter()
            .filter(|c| !c.is_literal())
            .collect::<Vec<_>>();
        let (mut accepted, rejected): (Vec<_>, Vec<_>) =
            ctx.with_facts(|facts| match service.discover_input_instances(facts) {
                Some(instances) => {
                    let instances = instances.into_iter().collect::<FxHashSet<_>>();
                    candidates.into_iter().partition(|c| instances.contains(c))
                }
                None => candidates
                    .into_iter()
                    .partition(|c| service.is_input_instance(c, facts)),
            });
        if !self.options.dynamic_input_classification || rejected.is_empty() {
            return accepted;
        }
        let Some(class) = service.input_class() else {
            return accepted;
        };
        let resolver = ContextResolver { engine: self, ctx };
        let mut snapshot = ctx.with_facts(Graph::clone);
        for node in rejected {
            let Some(subject) = as_subject(&node) else {
                continue;
            };
            if self
                .reasoner
                .classify_as(&node, class, &mut snapshot, &resolver)
            {
                debug!("{node} has been classified as {class}");
                ctx.add_facts([TripleRef::new(subject, rdf::TYPE, class)]);
                accepted.push(node);
            }
        }
        accepted
    }
}

impl PredicateResolver for ResolutionEngine {
    fn resolve(
        &self,
        input: &Term,
        predicate: &NamedNode,
        direction: Direction,
    ) -> Result<Vec<Term>, ResolutionError> {
        let ctx = self.new_context();
        ctx.set_state(ExecutionState::Resolving);
        self.resolve_predicate(&ctx, predicate, slice::from_ref(input), direction)
    }
}

struct ContextResolver<'a> {
    engine: &'a ResolutionEngine,
    ctx: &'a ExecutionContext,
}

impl MissingFactResolver for ContextResolver<'_> {
    fn resolve_missing(&self, subject: &Term, predicate: &NamedNode) -> Vec<Triple> {
        let Some(s) = as_subject(subject) else {
            return Vec::new();
        };
        match self.engine.resolve_predicate(
            self.ctx,
            predicate,
            slice::from_ref(subject),
            Direction::Forward,
        ) {
            Ok(values) => values
                .into_iter()
                .map(|o| Triple::new(s.into_owned(), predicate.clone(), o))
                .collect(),
            Err(e) => {
                warn!("Unable to resolve {predicate} for {subject}: {e}");
                Vec::new()
            }
        }
    }
}

fn handle_failure(ctx: &ExecutionContext, backend: &NamedNode, error: &BackendError) {
    if error.is_transient() {
        if ctx.mark_dead(backend) {
            error!("{error}, {backend} will not be called again");
        }
    } else {
        error!("Call to {backend} failed: {error}");
    }
}

/// The values a pattern position stands for.
enum Expansion {
    Bound(Vec<Term>),
    Unbound(Variable),
}

fn expand(ctx: &ExecutionContext, term: &TermPattern) -> Expansion {
    if let Some(term) = concrete_term(term) {
        return Expansion::Bound(vec![term]);
    }
    match open_variable(term) {
        Some(variable) => match ctx.binding(&variable) {
            Some(values) => Expansion::Bound(values),
            None => Expansion::Unbound(variable),
        },
        None => Expansion::Bound(Vec::new()),
    }
}

/// The subjects having a value for the property that fulfills the condition.
fn keep_subjects(
    ctx: &ExecutionContext,
    subjects: Vec<Term>,
    property: &NamedNode,
    condition: impl Fn(TermRef<'_>) -> bool,
) -> Vec<Term> {
    ctx.with_facts(|facts| {
        subjects
            .into_iter()
            .filter(|s| {
                as_subject(s).is_some_and(|subject| {
                    facts
                        .objects_for_subject_predicate(subject, property)
                        .any(&condition)
                })
            })
            .collect()
    })
}

fn query_parts(
    query: &Query,
) -> Result<(Option<&QueryDataset>, Vec<TriplePattern>), ResolutionError> {
    let (Query::Select {
        dataset, pattern, ..
    }
    | Query::Construct {
        dataset, pattern, ..
    }
    | Query::Describe {
        dataset, pattern, ..
    }
    | Query::Ask {
        dataset, pattern, ..
    }) = query;
    let mut patterns = Vec::new();
    collect_triple_patterns(pattern, &mut patterns);
    if patterns.is_empty() {
        return Err(ResolutionError::NoBasicGraphPattern);
    }
    Ok((dataset.as_ref(), patterns))
}

fn collect_triple_patterns(pattern: &GraphPattern, output: &mut Vec<TriplePattern>) {
    match pattern {
        GraphPattern::Bgp { patterns } => output.extend(patterns.iter().cloned()),
        GraphPattern::Join { left, right }
        | GraphPattern::LeftJoin { left, right, .. }
        | GraphPattern::Union { left, right }
        | GraphPattern::Minus { left, right } => {
            collect_triple_patterns(left, output);
            collect_triple_patterns(right, output);
        }
        GraphPattern::Filter { inner, .. }
        | GraphPattern::Graph { inner, .. }
        | GraphPattern::Extend { inner, .. }
        | GraphPattern::OrderBy { inner, .. }
        | GraphPattern::Project { inner, .. }
        | GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::Group { inner, .. } => collect_triple_patterns(inner, output),
        _ => debug!("Ignoring unsupported graph pattern {pattern}"),
    }
}
