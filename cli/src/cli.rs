use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about, version, name = "sparfed")]
/// Statistics sampling, planning and resolution of SPARQL queries over a federation of endpoints and services
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sample predicate statistics from the SPARQL endpoints of the federation
    ///
    /// The samples are appended to the statistics file.
    Sample {
        /// JSON file describing the federation
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        federation: PathBuf,
        /// JSON-lines file in which statistics are stored
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        stats: PathBuf,
        /// IRI of the predicate to sample
        #[arg(short, long, value_hint = ValueHint::Url, required_unless_present = "all", conflicts_with = "all")]
        predicate: Option<String>,
        /// Sample all the predicates of the federation
        #[arg(long)]
        all: bool,
        /// Also sample the predicates that already have enough samples
        ///
        /// Only used with --all.
        #[arg(long, requires = "all")]
        no_resume: bool,
        /// Number of selectivity samples per predicate and direction
        #[arg(long, default_value_t = 5)]
        selectivity_samples: u64,
        /// Number of time samples per predicate and direction
        #[arg(long, default_value_t = 3)]
        time_samples: u64,
        /// Seed of the random sampling offsets
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Remove all the samples from a statistics file
    Clear {
        /// JSON-lines file in which statistics are stored
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        stats: PathBuf,
    },
    /// Print the order in which the triple patterns of a query would be resolved
    ///
    /// No backend is called.
    Plan {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Resolve the triple patterns of a query and print the discovered facts as N-Triples
    ///
    /// Query evaluation itself is not done: the output contains all the facts gathered while resolving the patterns.
    Resolve {
        #[command(flatten)]
        query: QueryArgs,
        /// Try to prove with the ontology that rejected service inputs belong to the service input class
        #[arg(long)]
        dynamic_classification: bool,
    },
}

#[derive(clap::Args)]
pub struct QueryArgs {
    /// JSON file describing the federation
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub federation: PathBuf,
    /// JSON-lines file in which statistics are stored
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub stats: PathBuf,
    /// SPARQL query
    #[arg(short, long, required_unless_present = "query_file", conflicts_with = "query_file")]
    pub query: Option<String>,
    /// File in which the SPARQL query is stored
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub query_file: Option<PathBuf>,
    /// Base IRI of the query
    #[arg(long, value_hint = ValueHint::Url)]
    pub query_base: Option<String>,
    /// Fail on patterns that cannot be anchored on a concrete term instead of ordering them last
    #[arg(long)]
    pub strict: bool,
    /// How to order the triple patterns
    #[arg(long, value_enum, default_value_t = Strategy::Prim)]
    pub strategy: Strategy,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Strategy {
    /// Minimum spanning tree over the pattern graph weighted by the predicate statistics
    Prim,
    /// Resolvable patterns first, without statistics
    Greedy,
}
