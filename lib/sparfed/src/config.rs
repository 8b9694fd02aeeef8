//! Federation description files.
//!
//! A federation is described by a JSON document listing its backends and the ontology knowledge used to resolve queries:
//!
//! ```json
//! {
//!   "backends": [
//!     {
//!       "iri": "http://example.com/sparql",
//!       "kind": "endpoint",
//!       "predicates": ["http://example.com/author"],
//!       "data": "books.nt"
//!     }
//!   ],
//!   "inverses": [["http://example.com/author", "http://example.com/wrote"]],
//!   "restrictions": [
//!     {
//!       "class": "http://example.com/Author",
//!       "property": "http://example.com/wrote",
//!       "kind": "some_value"
//!     }
//!   ]
//! }
//! ```
//!
//! Data files are resolved relative to the description file and served by in-memory backends.

use crate::error::{ConfigError, RegistryError};
use crate::memory::{GraphEndpoint, GraphService, MemoryRegistry};
use crate::model::BackendStatus;
use crate::reasoning::{PropertyRestriction, Reasoner, RestrictionKind, TableReasoner};
use crate::registry::{Backend, Registry};
use oxrdf::{Graph, Literal, NamedNode, Term, Triple};
use oxrdfio::{RdfFormat, RdfParser};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FederationConfig {
    pub backends: Vec<BackendConfig>,
    /// Predicates whose values are literals
    pub datatype_properties: Vec<String>,
    pub equivalent_properties: Vec<[String; 2]>,
    pub inverses: Vec<[String; 2]>,
    pub restrictions: Vec<RestrictionConfig>,
    /// An OWL ontology file to read equivalences, inverses and class restrictions from
    pub ontology: Option<PathBuf>,
    /// Backends never called during resolution
    pub dead_backends: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub iri: String,
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BackendStatus>,
    #[serde(default)]
    pub predicates: Vec<String>,
    /// RDF file with the backend content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PathBuf>,
    /// Class of the inputs accepted by a service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_class: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Endpoint,
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionConfig {
    pub class: String,
    pub property: String,
    #[serde(flatten)]
    pub kind: RestrictionKindConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestrictionKindConfig {
    SomeValue,
    /// `value` is an IRI unless `literal` is set
    HasValue {
        value: String,
        #[serde(default)]
        literal: bool,
    },
    SomeValuesFrom {
        range: String,
    },
}

/// A federation ready to be queried.
pub struct Federation {
    pub registry: Arc<dyn Registry>,
    pub reasoner: Arc<dyn Reasoner>,
    pub dead_backends: Vec<NamedNode>,
}

impl FederationConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    /// Reads the description file and builds the federation it describes.
    pub fn load(path: impl AsRef<Path>) -> Result<Federation, ConfigError> {
        let path = path.as_ref();
        Self::from_path(path)?.into_federation(path.parent().unwrap_or_else(|| Path::new(".")))
    }

    /// Builds the federation, relative paths being resolved against `base_dir`.
    pub fn into_federation(self, base_dir: &Path) -> Result<Federation, ConfigError> {
        let dead_backends = self
            .dead_backends
            .iter()
            .map(|iri| parse_iri(iri))
            .collect::<Result<Vec<_>, _>>()?;

        let mut registry = MemoryRegistry::new();
        let mut statuses = Vec::new();
        for backend in self.backends {
            let iri = parse_iri(&backend.iri)?;
            let graph = match &backend.data {
                Some(data) => load_graph(&base_dir.join(data))?,
                None => Graph::new(),
            };
            let predicates = backend
                .predicates
                .iter()
                .map(|p| parse_iri(p))
                .collect::<Result<Vec<_>, _>>()?;
            debug!(
                "Registering {iri} with {} triples and {} predicates",
                graph.len(),
                predicates.len()
            );
            let registered = match backend.kind {
                BackendKind::Endpoint => {
                    if backend.input_class.is_some() {
                        warn!("{iri} is a SPARQL endpoint, ignoring its input class");
                    }
                    Backend::Endpoint(Arc::new(GraphEndpoint::new(iri.clone(), graph)))
                }
                BackendKind::Service => {
                    let mut service = GraphService::new(iri.clone(), graph);
                    if let Some(class) = &backend.input_class {
                        service = service.with_input_class(parse_iri(class)?);
                    }
                    Backend::Service(Arc::new(service))
                }
            };
            registry.add_backend(registered, predicates)?;
            if let Some(status) = backend.status {
                if status == BackendStatus::Ok && dead_backends.contains(&iri) {
                    return Err(RegistryError::Inconsistent {
                        backend: iri,
                        message: "listed as dead while its status is ok".into(),
                    }
                    .into());
                }
                statuses.push((iri, status));
            }
        }
        for (iri, status) in statuses {
            registry.set_backend_status(&iri, status)?;
        }
        for dead in &dead_backends {
            if registry.backend_status(dead).is_err() {
                warn!("The dead backend {dead} is not part of the federation");
            }
        }
        for property in &self.datatype_properties {
            registry.add_datatype_property(parse_iri(property)?);
        }

        let mut reasoner = TableReasoner::new();
        if let Some(ontology) = &self.ontology {
            reasoner = reasoner.with_ontology(&load_graph(&base_dir.join(ontology))?);
        }
        for [a, b] in &self.equivalent_properties {
            reasoner = reasoner.with_equivalent_properties(parse_iri(a)?, parse_iri(b)?);
        }
        for [a, b] in &self.inverses {
            reasoner = reasoner.with_inverse(parse_iri(a)?, parse_iri(b)?);
        }
        for restriction in self.restrictions {
            let kind = match restriction.kind {
                RestrictionKindConfig::SomeValue => RestrictionKind::SomeValue,
                RestrictionKindConfig::HasValue { value, literal } => {
                    RestrictionKind::HasValue(if literal {
                        Term::from(Literal::new_simple_literal(value))
                    } else {
                        parse_iri(&value)?.into()
                    })
                }
                RestrictionKindConfig::SomeValuesFrom { range } => {
                    RestrictionKind::SomeValuesFrom(parse_iri(&range)?)
                }
            };
            reasoner = reasoner.with_restriction(
                parse_iri(&restriction.class)?,
                PropertyRestriction {
                    property: parse_iri(&restriction.property)?,
                    kind,
                },
            );
        }

        Ok(Federation {
            registry: Arc::new(registry),
            reasoner: Arc::new(reasoner),
            dead_backends,
        })
    }
}

fn parse_iri(iri: &str) -> Result<NamedNode, ConfigError> {
    NamedNode::new(iri).map_err(|error| ConfigError::InvalidIri {
        iri: iri.into(),
        error,
    })
}

/// Reads an RDF file, the format being guessed from the extension and defaulting to N-Triples.
///
/// Named graphs are merged into the returned graph.
pub fn load_graph(path: &Path) -> Result<Graph, ConfigError> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(RdfFormat::from_extension)
        .unwrap_or(RdfFormat::NTriples);
    let file = File::open(path).map_err(|e| ConfigError::Data {
        path: path.into(),
        error: e.into(),
    })?;
    let mut graph = Graph::new();
    for quad in RdfParser::from_format(format).for_reader(BufReader::new(file)) {
        let quad = quad.map_err(|e| ConfigError::Data {
            path: path.into(),
            error: e.into(),
        })?;
        graph.insert(&Triple::from(quad));
    }
    Ok(graph)
}
