#![allow(clippy::print_stderr, clippy::print_stdout)]
use crate::cli::{Args, Command, QueryArgs, Strategy};
use anyhow::{Context, bail};
use clap::Parser;
use oxrdf::{Graph, NamedNode};
use oxrdfio::{RdfFormat, RdfSerializer};
use sparfed::config::{Federation, FederationConfig, load_graph};
use sparfed::{
    BackendError, EngineOptions, FallbackPolicy, GreedyReorder, PatternOrdering,
    PredicateStatsDb, ResolutionEngine, SamplerOptions, SourceLoader, StaticOptimizer,
    StatsSampler, StatsStore,
};
use spargebra::{Query, SparqlParser};
use std::fs;
use std::io::{Write, stdout};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

pub fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = Args::parse();
    match matches.command {
        Command::Sample {
            federation,
            stats,
            predicate,
            all,
            no_resume,
            selectivity_samples,
            time_samples,
            seed,
        } => {
            let Federation {
                registry,
                reasoner,
                dead_backends,
            } = load_federation(&federation)?;
            let engine = ResolutionEngine::new(
                Arc::clone(&registry),
                reasoner,
                Arc::new(GreedyReorder::default()),
            )
            .with_options(engine_options(dead_backends, false));
            let mut options = SamplerOptions::default()
                .with_selectivity_samples(selectivity_samples)
                .with_time_samples(time_samples);
            if let Some(seed) = seed {
                options = options.with_seed(seed);
            }
            let mut sampler = StatsSampler::with_options(
                registry,
                Arc::new(open_stats(&stats)?),
                Arc::new(engine),
                options,
            );
            let report = if let Some(predicate) = predicate {
                let predicate = NamedNode::new(&predicate)
                    .with_context(|| format!("The predicate IRI {predicate} is invalid"))?;
                sampler.sample_predicate(&predicate)?
            } else if all {
                sampler.sample_all(!no_resume)?
            } else {
                bail!("Either --predicate or --all must be set")
            };
            eprintln!(
                "{} predicates sampled ({} skipped) on {} endpoints, {} samples recorded, {} failures",
                report.predicates, report.skipped, report.backends, report.samples, report.failures
            );
            Ok(())
        }
        Command::Clear { stats } => {
            let store = open_stats(&stats)?;
            let count = store.len();
            store.clear()?;
            eprintln!("{count} samples removed");
            Ok(())
        }
        Command::Plan { query } => {
            let (engine, query) = prepare(&query, false)?;
            let order = engine.plan_query(&query)?;
            let mut stdout = stdout().lock();
            for pattern in order {
                writeln!(stdout, "{pattern} .")?;
            }
            Ok(())
        }
        Command::Resolve {
            query,
            dynamic_classification,
        } => {
            let (engine, query) = prepare(&query, dynamic_classification)?;
            let execution = engine.execute_query(&query, Some(&FileLoader))?;
            info!(
                "{} facts discovered with {} backend calls",
                execution.facts.len(),
                execution.calls
            );
            for backend in &execution.dead_backends {
                eprintln!("The backend {backend} has not answered");
            }
            let mut serializer =
                RdfSerializer::from_format(RdfFormat::NTriples).for_writer(stdout().lock());
            for triple in execution.facts.iter() {
                serializer.serialize_triple(triple)?;
            }
            serializer.finish()?.flush()?;
            Ok(())
        }
    }
}

fn load_federation(path: &Path) -> anyhow::Result<Federation> {
    FederationConfig::load(path)
        .with_context(|| format!("Unable to load the federation file {}", path.display()))
}

fn open_stats(path: &Path) -> anyhow::Result<PredicateStatsDb> {
    PredicateStatsDb::open(path)
        .with_context(|| format!("Unable to open the statistics file {}", path.display()))
}

fn engine_options(dead_backends: Vec<NamedNode>, dynamic_classification: bool) -> EngineOptions {
    let mut options = EngineOptions::default();
    for backend in dead_backends {
        options = options.with_dead_backend(backend);
    }
    if dynamic_classification {
        options = options.with_dynamic_input_classification();
    }
    options
}

fn prepare(args: &QueryArgs, dynamic_classification: bool) -> anyhow::Result<(ResolutionEngine, Query)> {
    let query = if let Some(query) = &args.query {
        query.clone()
    } else if let Some(query_file) = &args.query_file {
        fs::read_to_string(query_file)
            .with_context(|| format!("Not able to read query file {}", query_file.display()))?
    } else {
        bail!("The --query or --query-file option must be set")
    };
    let mut parser = SparqlParser::new();
    if let Some(base) = &args.query_base {
        parser = parser
            .with_base_iri(base)
            .with_context(|| format!("Invalid base IRI {base}"))?;
    }
    let query = parser.parse_query(&query)?;

    let Federation {
        registry,
        reasoner,
        dead_backends,
    } = load_federation(&args.federation)?;
    let policy = if args.strict {
        FallbackPolicy::Strict
    } else {
        FallbackPolicy::Permissive
    };
    let ordering: Arc<dyn PatternOrdering> = match args.strategy {
        Strategy::Prim => Arc::new(
            StaticOptimizer::new(open_stats(&args.stats)?)
                .with_fallback_policy(policy)
                .with_registry(Arc::clone(&registry), Arc::clone(&reasoner)),
        ),
        Strategy::Greedy => Arc::new(GreedyReorder::new(policy)),
    };
    let engine = ResolutionEngine::new(registry, reasoner, ordering)
        .with_options(engine_options(dead_backends, dynamic_classification));
    Ok((engine, query))
}

/// Loads the `file:` source graphs of the queries.
struct FileLoader;

impl SourceLoader for FileLoader {
    fn load(&self, graph: &NamedNode) -> Result<Graph, BackendError> {
        let Some(path) = graph.as_str().strip_prefix("file://") else {
            return Err(BackendError::Unsupported(graph.clone()));
        };
        load_graph(Path::new(path)).map_err(|e| BackendError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic_in_result_fn)]

    use anyhow::Result;
    use assert_cmd::Command;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    const LIBRARY: &str = "<http://example.com/b1> <http://example.com/hasAuthor> \"Smith\" .
<http://example.com/b2> <http://example.com/hasAuthor> \"Smith\" .
<http://example.com/b3> <http://example.com/hasAuthor> \"Jones\" .
<http://example.com/b1> <http://example.com/title> \"Rust\" .
";

    const FEDERATION: &str = r#"{
        "backends": [{
            "iri": "http://example.com/library",
            "kind": "endpoint",
            "predicates": ["http://example.com/hasAuthor", "http://example.com/title"],
            "data": "library.nt"
        }]
    }"#;

    const QUERY: &str = "SELECT * WHERE { ?b <http://example.com/title> ?t . ?b <http://example.com/hasAuthor> \"Smith\" }";

    fn cli_command() -> Result<Command> {
        Ok(Command::cargo_bin("sparfed")?)
    }

    fn federation_dir() -> Result<TempDir> {
        let dir = TempDir::new()?;
        dir.child("library.nt").write_str(LIBRARY)?;
        dir.child("federation.json").write_str(FEDERATION)?;
        Ok(dir)
    }

    #[test]
    fn cli_help() -> Result<()> {
        cli_command()?
            .assert()
            .failure()
            .stderr(predicate::str::contains("sparfed"));
        Ok(())
    }

    #[test]
    fn cli_sample_then_clear() -> Result<()> {
        let dir = federation_dir()?;
        let stats = dir.child("stats.jsonl");
        cli_command()?
            .arg("sample")
            .arg("--federation")
            .arg(dir.child("federation.json").path())
            .arg("--stats")
            .arg(stats.path())
            .arg("--all")
            .arg("--seed")
            .arg("1")
            .assert()
            .success()
            .stderr(predicate::str::contains("2 predicates sampled"));
        stats.assert(predicate::str::contains("\"selectivity\""));

        cli_command()?
            .arg("clear")
            .arg("--stats")
            .arg(stats.path())
            .assert()
            .success();
        stats.assert("");
        Ok(())
    }

    #[test]
    fn cli_sample_predicate_uses_default_sample_counts() -> Result<()> {
        let dir = federation_dir()?;
        // Selectivity: at most one more draw than the 3 triples, time: 3 per direction
        cli_command()?
            .arg("sample")
            .arg("--federation")
            .arg(dir.child("federation.json").path())
            .arg("--stats")
            .arg(dir.child("stats.jsonl").path())
            .arg("--predicate")
            .arg("http://example.com/hasAuthor")
            .arg("--seed")
            .arg("1")
            .assert()
            .success()
            .stderr(predicate::str::contains("14 samples recorded"));
        Ok(())
    }

    #[test]
    fn cli_sample_requires_a_predicate() -> Result<()> {
        let dir = federation_dir()?;
        cli_command()?
            .arg("sample")
            .arg("--federation")
            .arg(dir.child("federation.json").path())
            .arg("--stats")
            .arg(dir.child("stats.jsonl").path())
            .assert()
            .failure();
        Ok(())
    }

    #[test]
    fn cli_plan() -> Result<()> {
        let dir = federation_dir()?;
        cli_command()?
            .arg("plan")
            .arg("--federation")
            .arg(dir.child("federation.json").path())
            .arg("--stats")
            .arg(dir.child("stats.jsonl").path())
            .arg("--query")
            .arg(QUERY)
            .assert()
            .success()
            .stdout(predicate::str::starts_with(
                "?b <http://example.com/hasAuthor> \"Smith\" .",
            ));
        Ok(())
    }

    #[test]
    fn cli_plan_unknown_predicate() -> Result<()> {
        let dir = federation_dir()?;
        cli_command()?
            .arg("plan")
            .arg("--federation")
            .arg(dir.child("federation.json").path())
            .arg("--stats")
            .arg(dir.child("stats.jsonl").path())
            .arg("--query")
            .arg("ASK { ?b <http://example.com/isbn> \"1\" }")
            .assert()
            .failure()
            .stderr(predicate::str::contains("isbn"));
        Ok(())
    }

    #[test]
    fn cli_resolve() -> Result<()> {
        let dir = federation_dir()?;
        let query = dir.child("query.rq");
        query.write_str(QUERY)?;
        cli_command()?
            .arg("resolve")
            .arg("--federation")
            .arg(dir.child("federation.json").path())
            .arg("--stats")
            .arg(dir.child("stats.jsonl").path())
            .arg("--query-file")
            .arg(query.path())
            .arg("--strategy")
            .arg("greedy")
            .assert()
            .success()
            .stdout(
                predicate::str::contains(
                    "<http://example.com/b1> <http://example.com/title> \"Rust\" .",
                )
                .and(predicate::str::contains("Jones").not()),
            );
        Ok(())
    }
}
