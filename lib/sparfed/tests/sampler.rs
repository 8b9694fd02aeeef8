#![allow(clippy::panic_in_result_fn)]

use oxrdf::{Graph, Literal, NamedNode, Term, Triple};
use sparfed::memory::{GraphEndpoint, MemoryRegistry, SimulatedFailure};
use sparfed::{
    Backend, BackendError, BackendStatus, Direction, GreedyReorder, LookupQuery,
    PredicateStatsDb, Registry, ResolutionEngine, SamplerOptions, SparqlEndpoint, StatKind,
    StatsSampler, StatsStore, TableReasoner,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

fn n(name: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("http://example.com/{name}"))
}

fn graph(triples: &[(&str, &str, &str)]) -> Graph {
    let mut graph = Graph::new();
    for (s, p, o) in triples {
        graph.insert(&Triple::new(n(s), n(p), n(o)));
    }
    graph
}

fn sampler(
    registry: MemoryRegistry,
    stats: Arc<PredicateStatsDb>,
    options: SamplerOptions,
) -> StatsSampler {
    let registry = Arc::new(registry);
    let engine = ResolutionEngine::new(
        Arc::clone(&registry) as _,
        Arc::new(TableReasoner::new()),
        Arc::new(GreedyReorder::default()),
    );
    StatsSampler::with_options(registry, stats, Arc::new(engine), options.with_seed(42))
}

#[test]
fn samples_are_spread_by_triple_count() -> Result<(), Box<dyn Error>> {
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(GraphEndpoint::new(
            n("small"),
            graph(&[("a", "knows", "b")]),
        ))),
        [n("knows")],
    )?;
    registry.add_backend(
        Backend::Endpoint(Arc::new(GraphEndpoint::new(
            n("large"),
            graph(&[("c", "knows", "d"), ("d", "knows", "e")]),
        ))),
        [n("knows")],
    )?;
    let stats = Arc::new(PredicateStatsDb::new());
    let report = sampler(
        registry,
        Arc::clone(&stats),
        SamplerOptions::default()
            .with_selectivity_samples(3)
            .with_time_samples(1),
    )
    .sample_predicate(&n("knows"))?;

    // ceil(1 * 3 / 3) = 1 and ceil(2 * 3 / 3) = 2 selectivity samples per direction
    for direction in [Direction::Forward, Direction::Reverse] {
        assert_eq!(
            stats.sample_count_in_direction(n("knows").as_ref(), StatKind::Selectivity, direction)?,
            3
        );
        // ceil(1 * 1 / 3) = ceil(2 * 1 / 3) = 1 time sample per endpoint
        assert_eq!(
            stats.sample_count_in_direction(n("knows").as_ref(), StatKind::Time, direction)?,
            2
        );
        assert_eq!(
            stats.stat(n("knows").as_ref(), StatKind::Selectivity, direction)?,
            1
        );
    }
    assert_eq!(report.backends, 2);
    assert_eq!(report.samples, 10);
    assert_eq!(report.failures, 0);
    Ok(())
}

#[test]
fn language_tagged_values_are_sampled_in_reverse() -> Result<(), Box<dyn Error>> {
    let mut data = Graph::new();
    data.insert(&Triple::new(
        n("cat"),
        n("label"),
        Literal::new_language_tagged_literal("chat", "fr")?,
    ));
    data.insert(&Triple::new(
        n("dog"),
        n("label"),
        Literal::new_language_tagged_literal("chien", "fr")?,
    ));
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(GraphEndpoint::new(n("e"), data))),
        [n("label")],
    )?;
    registry.add_datatype_property(n("label"));
    let stats = Arc::new(PredicateStatsDb::new());
    sampler(registry, Arc::clone(&stats), SamplerOptions::default()).sample_predicate(&n("label"))?;
    for direction in [Direction::Forward, Direction::Reverse] {
        // Up to one more sample than the number of triples
        assert_eq!(
            stats.sample_count_in_direction(n("label").as_ref(), StatKind::Selectivity, direction)?,
            3
        );
        assert_eq!(
            stats.stat(n("label").as_ref(), StatKind::Selectivity, direction)?,
            1
        );
    }
    Ok(())
}

/// An endpoint returning the sampled objects without their datatype.
struct UntypedEndpoint(GraphEndpoint);

impl SparqlEndpoint for UntypedEndpoint {
    fn uri(&self) -> &NamedNode {
        self.0.uri()
    }

    fn select(&self, query: &LookupQuery, timeout: Duration) -> Result<Vec<Term>, BackendError> {
        let values = self.0.select(query, timeout)?;
        if !matches!(query, LookupQuery::ObjectAt { .. }) {
            return Ok(values);
        }
        Ok(values
            .into_iter()
            .map(|value| match value {
                Term::Literal(literal) => Literal::new_simple_literal(literal.value()).into(),
                other => other,
            })
            .collect())
    }

    fn construct(&self, query: &LookupQuery, timeout: Duration) -> Result<Vec<Triple>, BackendError> {
        self.0.construct(query, timeout)
    }

    fn results_count_lower_bound(
        &self,
        query: &LookupQuery,
        cap: u64,
        timeout: Duration,
    ) -> Result<u64, BackendError> {
        self.0.results_count_lower_bound(query, cap, timeout)
    }
}

fn ages(is_datatype_property: bool) -> Result<Arc<PredicateStatsDb>, Box<dyn Error>> {
    let mut data = Graph::new();
    data.insert(&Triple::new(n("a"), n("age"), Literal::from(42)));
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(UntypedEndpoint(GraphEndpoint::new(n("e"), data)))),
        [n("age")],
    )?;
    if is_datatype_property {
        registry.add_datatype_property(n("age"));
    }
    let stats = Arc::new(PredicateStatsDb::new());
    sampler(
        registry,
        Arc::clone(&stats),
        SamplerOptions::default().with_time_samples(0),
    )
    .sample_predicate(&n("age"))?;
    Ok(stats)
}

#[test]
fn untyped_numbers_of_datatype_property_are_retyped() -> Result<(), Box<dyn Error>> {
    let stats = ages(true)?;
    for direction in [Direction::Forward, Direction::Reverse] {
        assert_eq!(
            stats.sample_count_in_direction(n("age").as_ref(), StatKind::Selectivity, direction)?,
            2
        );
    }
    Ok(())
}

#[test]
fn datatype_property_typed_as_object_property_stops_reverse_sampling() -> Result<(), Box<dyn Error>> {
    let stats = ages(false)?;
    assert_eq!(
        stats.sample_count_in_direction(n("age").as_ref(), StatKind::Selectivity, Direction::Forward)?,
        2
    );
    assert_eq!(
        stats.sample_count_in_direction(n("age").as_ref(), StatKind::Selectivity, Direction::Reverse)?,
        0
    );
    Ok(())
}

#[test]
fn predicate_without_triples_records_nothing() -> Result<(), Box<dyn Error>> {
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(GraphEndpoint::new(n("e"), Graph::new()))),
        [n("knows")],
    )?;
    let stats = Arc::new(PredicateStatsDb::new());
    let report = sampler(registry, Arc::clone(&stats), SamplerOptions::default())
        .sample_predicate(&n("knows"))?;
    assert_eq!(report.samples, 0);
    assert!(stats.is_empty());
    Ok(())
}

#[test]
fn resume_skips_sampled_predicates() -> Result<(), Box<dyn Error>> {
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(GraphEndpoint::new(
            n("e"),
            graph(&[("a", "knows", "b"), ("a", "likes", "b")]),
        ))),
        [n("knows"), n("likes")],
    )?;
    let stats = Arc::new(PredicateStatsDb::new());
    let mut sampler = sampler(
        registry,
        Arc::clone(&stats),
        SamplerOptions::default()
            .with_selectivity_samples(1)
            .with_time_samples(1),
    );
    let first = sampler.sample_all(true)?;
    assert_eq!(first.predicates, 2);
    assert_eq!(first.skipped, 0);
    // One sample of each kind in each direction: 2 > 1 for both kinds
    let second = sampler.sample_all(true)?;
    assert_eq!(second.predicates, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(second.samples, 0);
    let third = sampler.sample_all(false)?;
    assert_eq!(third.predicates, 2);
    Ok(())
}

#[test]
fn failing_endpoint_is_downgraded() -> Result<(), Box<dyn Error>> {
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(
            GraphEndpoint::new(n("e"), graph(&[("a", "knows", "b")]))
                .with_failure(SimulatedFailure::Unavailable),
        )),
        [n("knows")],
    )?;
    let registry = Arc::new(registry);
    let stats = Arc::new(PredicateStatsDb::new());
    let mut sampler = StatsSampler::new(
        Arc::clone(&registry) as _,
        Arc::clone(&stats) as _,
        Arc::new(ResolutionEngine::new(
            Arc::clone(&registry) as _,
            Arc::new(TableReasoner::new()),
            Arc::new(GreedyReorder::default()),
        )),
    );

    let report = sampler.sample_predicate(&n("knows"))?;
    assert_eq!(report.failures, 1);
    assert_eq!(registry.backend_status(&n("e"))?, BackendStatus::Slow);
    sampler.sample_predicate(&n("knows"))?;
    assert_eq!(registry.backend_status(&n("e"))?, BackendStatus::Dead);
    let report = sampler.sample_predicate(&n("knows"))?;
    assert_eq!(report.failures, 0);
    assert!(stats.is_empty());
    Ok(())
}
