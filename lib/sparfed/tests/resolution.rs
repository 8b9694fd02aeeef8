#![allow(clippy::panic_in_result_fn)]

use oxrdf::vocab::rdf;
use oxrdf::{Graph, Literal, NamedNode, Term, Triple, Variable};
use sparfed::memory::{GraphEndpoint, GraphService, MemoryRegistry, SimulatedFailure};
use sparfed::{
    Backend, Direction, PredicateSample, PredicateStatsDb, ResolutionEngine, ResolutionError,
    StatKind, StaticOptimizer, StatsStore, TableReasoner,
};
use spargebra::SparqlParser;
use spargebra::term::{TermPattern, TriplePattern};
use std::error::Error;
use std::sync::Arc;

fn n(name: &str) -> NamedNode {
    NamedNode::new_unchecked(format!("http://example.com/{name}"))
}

fn var(name: &str) -> TermPattern {
    Variable::new_unchecked(name).into()
}

fn pattern(s: TermPattern, p: NamedNode, o: TermPattern) -> TriplePattern {
    TriplePattern {
        subject: s,
        predicate: p.into(),
        object: o,
    }
}

fn library() -> Graph {
    let mut graph = Graph::new();
    for (book, author) in [("b1", "Smith"), ("b2", "Smith"), ("b3", "Jones")] {
        graph.insert(&Triple::new(n(book), n("hasAuthor"), Literal::from(author)));
        graph.insert(&Triple::new(n(book), rdf::TYPE, n("Book")));
    }
    graph.insert(&Triple::new(n("b1"), n("title"), Literal::from("Rust")));
    graph
}

fn values(execution: &sparfed::Execution, variable: &str) -> Vec<Term> {
    let mut values = execution.bindings[&Variable::new_unchecked(variable)]
        .iter()
        .cloned()
        .collect::<Vec<_>>();
    values.sort_by_key(ToString::to_string);
    values
}

#[test]
fn smith_pattern_is_resolved_first() -> Result<(), Box<dyn Error>> {
    let stats = PredicateStatsDb::new();
    stats.record_sample(&PredicateSample::new(
        rdf::TYPE.into_owned(),
        StatKind::Time,
        Direction::Reverse,
        5_000,
    ))?;
    stats.record_sample(&PredicateSample::new(
        n("hasAuthor"),
        StatKind::Time,
        Direction::Reverse,
        20,
    ))?;
    let type_pattern = pattern(var("a"), rdf::TYPE.into_owned(), n("Book").into());
    let smith_pattern = pattern(var("a"), n("hasAuthor"), Literal::from("Smith").into());
    let order = StaticOptimizer::new(stats)
        .optimize(&[type_pattern.clone(), smith_pattern.clone()])?;
    assert_eq!(order, vec![smith_pattern, type_pattern]);
    Ok(())
}

#[test]
fn chain_is_resolvable_in_order() -> Result<(), Box<dyn Error>> {
    let patterns = [
        pattern(var("c"), n("p3"), var("d")),
        pattern(var("b"), n("p2"), var("c")),
        pattern(n("start").into(), n("p1"), var("b")),
        pattern(var("d"), n("p4"), var("e")),
    ];
    let order = StaticOptimizer::new(PredicateStatsDb::new()).optimize(&patterns)?;
    assert_eq!(order.len(), patterns.len());
    for p in &patterns {
        assert!(order.contains(p));
    }
    let mut bound = vec![Variable::new_unchecked("unused")];
    for p in &order {
        let unbound = [&p.subject, &p.object]
            .into_iter()
            .filter(|t| matches!(t, TermPattern::Variable(v) if !bound.contains(v)))
            .count();
        assert!(unbound <= 1, "{p} has {unbound} unbound variables");
        for t in [&p.subject, &p.object] {
            if let TermPattern::Variable(v) = t {
                bound.push(v.clone());
            }
        }
    }
    Ok(())
}

#[test]
fn books_of_an_author() -> Result<(), Box<dyn Error>> {
    let endpoint = Arc::new(GraphEndpoint::new(n("library"), library()));
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::clone(&endpoint) as _),
        [n("hasAuthor"), rdf::TYPE.into_owned(), n("title")],
    )?;
    let engine = ResolutionEngine::new(
        Arc::new(registry),
        Arc::new(TableReasoner::new()),
        Arc::new(StaticOptimizer::new(PredicateStatsDb::new())),
    );
    let query = SparqlParser::new().parse_query(
        "SELECT * WHERE { ?a <http://example.com/hasAuthor> \"Smith\" . ?a <http://example.com/title> ?t }",
    )?;
    let execution = engine.execute_query(&query, None)?;
    assert_eq!(values(&execution, "a"), vec![n("b1").into(), n("b2").into()]);
    assert_eq!(values(&execution, "t"), vec![Literal::from("Rust").into()]);
    assert!(execution.dead_backends.is_empty());
    assert_eq!(execution.calls, endpoint.call_count());
    Ok(())
}

#[test]
fn repeated_input_is_sent_once() -> Result<(), Box<dyn Error>> {
    let endpoint = Arc::new(GraphEndpoint::new(n("library"), library()));
    let mut registry = MemoryRegistry::new();
    registry.add_backend(Backend::Endpoint(Arc::clone(&endpoint) as _), [n("hasAuthor")])?;
    let engine = ResolutionEngine::new(
        Arc::new(registry),
        Arc::new(TableReasoner::new()),
        Arc::new(StaticOptimizer::new(PredicateStatsDb::new())),
    );
    let execution = engine.execute(
        &[
            pattern(var("a"), n("hasAuthor"), Literal::from("Smith").into()),
            pattern(var("b"), n("hasAuthor"), Literal::from("Smith").into()),
        ],
        [],
    )?;
    assert_eq!(endpoint.call_count(), 1);
    assert_eq!(values(&execution, "b"), vec![n("b1").into(), n("b2").into()]);
    Ok(())
}

#[test]
fn dead_backend_is_not_called_again() -> Result<(), Box<dyn Error>> {
    let endpoint = Arc::new(
        GraphEndpoint::new(n("library"), library()).with_failure(SimulatedFailure::Timeout),
    );
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::clone(&endpoint) as _),
        [n("hasAuthor"), n("title")],
    )?;
    let engine = ResolutionEngine::new(
        Arc::new(registry),
        Arc::new(TableReasoner::new()),
        Arc::new(StaticOptimizer::new(PredicateStatsDb::new())),
    );
    let execution = engine.execute(
        &[
            pattern(n("b1").into(), n("hasAuthor"), var("a")),
            pattern(n("b1").into(), n("title"), var("t")),
        ],
        [],
    )?;
    assert_eq!(endpoint.call_count(), 1);
    assert_eq!(execution.dead_backends, vec![n("library")]);
    assert!(values(&execution, "t").is_empty());
    Ok(())
}

#[test]
fn endpoint_and_service_together() -> Result<(), Box<dyn Error>> {
    let mut isbns = Graph::new();
    isbns.insert(&Triple::new(n("b1"), n("isbn"), Literal::from("978-1")));
    isbns.insert(&Triple::new(n("b3"), n("isbn"), Literal::from("978-3")));
    let service = Arc::new(GraphService::new(n("isbn-service"), isbns).with_input_class(n("Book")));
    let mut registry = MemoryRegistry::new();
    registry.add_backend(
        Backend::Endpoint(Arc::new(GraphEndpoint::new(n("library"), library()))),
        [n("hasAuthor"), rdf::TYPE.into_owned()],
    )?;
    registry.add_backend(Backend::Service(Arc::clone(&service) as _), [n("isbn")])?;
    let engine = ResolutionEngine::new(
        Arc::new(registry),
        Arc::new(TableReasoner::new()),
        Arc::new(StaticOptimizer::new(PredicateStatsDb::new())),
    );
    let execution = engine.execute(
        &[
            pattern(var("a"), n("hasAuthor"), Literal::from("Smith").into()),
            pattern(var("a"), rdf::TYPE.into_owned(), n("Book").into()),
            pattern(var("a"), n("isbn"), var("i")),
        ],
        [],
    )?;
    assert_eq!(values(&execution, "i"), vec![Literal::from("978-1").into()]);
    assert_eq!(service.call_count(), 1);
    Ok(())
}

#[test]
fn unknown_predicate_is_unresolvable() {
    let registry = Arc::new(MemoryRegistry::new());
    let reasoner = Arc::new(TableReasoner::new());
    let engine = ResolutionEngine::new(
        Arc::clone(&registry) as _,
        Arc::clone(&reasoner) as _,
        Arc::new(StaticOptimizer::new(PredicateStatsDb::new()).with_registry(registry, reasoner)),
    );
    let result = engine.execute(&[pattern(n("b1").into(), n("unknown"), var("x"))], []);
    assert!(matches!(result, Err(ResolutionError::Unresolvable(_))));
}
