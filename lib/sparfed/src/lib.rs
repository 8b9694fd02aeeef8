#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod config;
mod context;
mod engine;
mod error;
mod graph;
pub mod memory;
mod model;
mod optimizer;
mod reasoning;
mod registry;
mod reorder;
mod sampler;
mod stats;
pub mod vocab;

pub use crate::context::{ExecutionContext, ExecutionState, VisitKey};
pub use crate::engine::{EngineOptions, Execution, ResolutionEngine};
pub use crate::error::{
    BackendError, ConfigError, OptimizationError, RegistryError, ResolutionError, SamplingError,
    StatsError,
};
pub use crate::graph::{Edge, PatternGraph};
pub use crate::model::{BackendStatus, Direction, PredicateSample, StatKind};
pub use crate::optimizer::{PatternOrdering, StaticOptimizer};
pub use crate::reasoning::{
    MissingFactResolver, PropertyRestriction, Reasoner, RestrictionKind, TableReasoner,
    inverse_property,
};
pub use crate::registry::{
    Backend, LookupQuery, PredicateService, Registry, SourceLoader, SparqlEndpoint,
};
pub use crate::reorder::{FallbackPolicy, GreedyReorder};
pub use crate::sampler::{PredicateResolver, SamplerOptions, SamplingReport, StatsSampler};
pub use crate::stats::{PredicateStatsDb, StatsStore};
