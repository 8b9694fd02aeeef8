use crate::error::{BackendError, ResolutionError, SamplingError};
use crate::model::{BackendStatus, Direction, PredicateSample, StatKind};
use crate::registry::{Backend, LookupQuery, Registry, SparqlEndpoint};
use crate::stats::StatsStore;
use oxrdf::vocab::xsd;
use oxrdf::{Literal, NamedNode, Term};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Resolves the values of a predicate for a single input.
///
/// The sampler measures its latency to get time statistics.
pub trait PredicateResolver: Send + Sync {
    /// With [`Direction::Reverse`] the input is an object and subjects are returned.
    fn resolve(
        &self,
        input: &Term,
        predicate: &NamedNode,
        direction: Direction,
    ) -> Result<Vec<Term>, ResolutionError>;
}

impl<T: PredicateResolver + ?Sized> PredicateResolver for Arc<T> {
    fn resolve(
        &self,
        input: &Term,
        predicate: &NamedNode,
        direction: Direction,
    ) -> Result<Vec<Term>, ResolutionError> {
        (**self).resolve(input, predicate, direction)
    }
}

/// Options of the [`StatsSampler`].
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    selectivity_samples: u64,
    time_samples: u64,
    endpoint_timeout: Duration,
    lower_bound_cap: u64,
    seed: Option<u64>,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            selectivity_samples: 5,
            time_samples: 3,
            endpoint_timeout: Duration::from_secs(30),
            lower_bound_cap: 50_000,
            seed: None,
        }
    }
}

impl SamplerOptions {
    /// Number of selectivity samples per predicate and direction, 5 by default.
    #[must_use]
    pub fn with_selectivity_samples(mut self, samples: u64) -> Self {
        self.selectivity_samples = samples;
        self
    }

    /// Number of time samples per predicate and direction, 3 by default.
    #[must_use]
    pub fn with_time_samples(mut self, samples: u64) -> Self {
        self.time_samples = samples;
        self
    }

    #[must_use]
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// Maximal value of the result counts used when a `COUNT` query is not possible, 50 000 by default.
    #[must_use]
    pub fn with_lower_bound_cap(mut self, cap: u64) -> Self {
        self.lower_bound_cap = cap;
        self
    }

    /// Makes the sampling offsets deterministic.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn selectivity_samples(&self) -> u64 {
        self.selectivity_samples
    }

    pub fn time_samples(&self) -> u64 {
        self.time_samples
    }
}

/// What a sampling run did.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct SamplingReport {
    /// Predicates sampled
    pub predicates: usize,
    /// Predicates skipped because they already have enough samples
    pub skipped: usize,
    /// Backends that have been sampled
    pub backends: usize,
    /// Recorded samples
    pub samples: usize,
    /// Failed backend operations
    pub failures: usize,
}

impl AddAssign for SamplingReport {
    fn add_assign(&mut self, other: Self) {
        self.predicates += other.predicates;
        self.skipped += other.skipped;
        self.backends += other.backends;
        self.samples += other.samples;
        self.failures += other.failures;
    }
}

/// Collects predicate statistics by querying the SPARQL endpoints of the federation.
///
/// Samples are spread over the endpoints serving a predicate proportionally to the number of triples they hold.
/// Services are not sampled.
pub struct StatsSampler {
    registry: Arc<dyn Registry>,
    store: Arc<dyn StatsStore>,
    resolver: Arc<dyn PredicateResolver>,
    options: SamplerOptions,
    rng: StdRng,
}

impl StatsSampler {
    pub fn new(
        registry: Arc<dyn Registry>,
        store: Arc<dyn StatsStore>,
        resolver: Arc<dyn PredicateResolver>,
    ) -> Self {
        Self::with_options(registry, store, resolver, SamplerOptions::default())
    }

    pub fn with_options(
        registry: Arc<dyn Registry>,
        store: Arc<dyn StatsStore>,
        resolver: Arc<dyn PredicateResolver>,
        options: SamplerOptions,
    ) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry,
            store,
            resolver,
            options,
            rng,
        }
    }

    /// Samples a single predicate and refreshes the fallback averages.
    pub fn sample_predicate(
        &mut self,
        predicate: &NamedNode,
    ) -> Result<SamplingReport, SamplingError> {
        let report = self.sample(predicate)?;
        self.store.refresh_fallback_averages()?;
        Ok(report)
    }

    /// Samples all the predicates of the registry.
    ///
    /// With `resume`, the predicates that already have more samples than requested are skipped.
    /// A predicate failing to be sampled does not stop the run.
    pub fn sample_all(&mut self, resume: bool) -> Result<SamplingReport, SamplingError> {
        let mut report = SamplingReport::default();
        for predicate in self.registry.all_predicates() {
            if resume && self.has_enough_samples(&predicate)? {
                debug!("{predicate} already has enough samples");
                report.skipped += 1;
                continue;
            }
            match self.sample(&predicate) {
                Ok(r) => report += r,
                Err(e) => {
                    error!("Failed to sample {predicate}: {e}");
                    report.failures += 1;
                }
            }
        }
        self.store.refresh_fallback_averages()?;
        info!(
            "Sampled {} predicates ({} skipped), {} samples recorded",
            report.predicates, report.skipped, report.samples
        );
        Ok(report)
    }

    fn has_enough_samples(&self, predicate: &NamedNode) -> Result<bool, SamplingError> {
        let selectivity = self
            .store
            .sample_count(predicate.as_ref(), StatKind::Selectivity)?;
        let time = self.store.sample_count(predicate.as_ref(), StatKind::Time)?;
        Ok(to_u64(selectivity) > self.options.selectivity_samples
            && to_u64(time) > self.options.time_samples)
    }

    fn sample(&mut self, predicate: &NamedNode) -> Result<SamplingReport, SamplingError> {
        info!("Sampling {predicate}");
        let mut report = SamplingReport {
            predicates: 1,
            ..SamplingReport::default()
        };
        let mut shares = Vec::new();
        for backend in self.registry.find_backends_for_predicate(predicate) {
            let Backend::Endpoint(endpoint) = &backend else {
                debug!("Not sampling service {}", backend.uri());
                continue;
            };
            let status = self.registry.backend_status(endpoint.uri())?;
            if status == BackendStatus::Dead {
                debug!("Not sampling dead endpoint {}", endpoint.uri());
                continue;
            }
            match self.triple_count(&backend, endpoint.as_ref(), predicate, status) {
                Ok(triples) => shares.push((Arc::clone(endpoint), triples)),
                Err(e) => {
                    error!("Unable to count {predicate} triples of {}: {e}", endpoint.uri());
                    self.note_failure(endpoint.uri(), &e)?;
                    report.failures += 1;
                }
            }
        }
        let total = shares
            .iter()
            .fold(0_u64, |total, (_, triples)| total.saturating_add(*triples));
        if total == 0 {
            warn!("No triple found for {predicate}");
            return Ok(report);
        }

        for (endpoint, triples) in shares {
            if triples == 0 {
                continue;
            }
            report.backends += 1;
            let selectivity_quota = quota(triples, self.options.selectivity_samples, total);
            let time_quota = quota(triples, self.options.time_samples, total);
            debug!(
                "{} holds {triples}/{total} {predicate} triples, taking {selectivity_quota} selectivity and {time_quota} time samples",
                endpoint.uri()
            );
            for (kind, direction, quota) in [
                (StatKind::Selectivity, Direction::Forward, selectivity_quota),
                (StatKind::Selectivity, Direction::Reverse, selectivity_quota),
                (StatKind::Time, Direction::Forward, time_quota),
                (StatKind::Time, Direction::Reverse, time_quota),
            ] {
                match self.sample_endpoint(endpoint.as_ref(), predicate, kind, direction, quota, triples)
                {
                    Ok(samples) => report.samples += samples,
                    Err(SamplingError::Stats(e)) => return Err(e.into()),
                    Err(e) => {
                        error!(
                            "Failed to sample {direction} {kind} of {predicate} on {}: {e}",
                            endpoint.uri()
                        );
                        if let SamplingError::Backend(e) = &e {
                            self.note_failure(endpoint.uri(), e)?;
                        }
                        report.failures += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    fn triple_count(
        &self,
        backend: &Backend,
        endpoint: &dyn SparqlEndpoint,
        predicate: &NamedNode,
        status: BackendStatus,
    ) -> Result<u64, BackendError> {
        if status != BackendStatus::Slow {
            match self
                .registry
                .estimated_triple_count(backend, predicate, self.options.endpoint_timeout)
            {
                Ok(count) => return Ok(count),
                Err(e) => debug!("Counting {predicate} triples failed, using a lower bound: {e}"),
            }
        }
        endpoint.results_count_lower_bound(
            &LookupQuery::Triples {
                predicate: predicate.clone(),
            },
            self.options.lower_bound_cap,
            self.options.endpoint_timeout,
        )
    }

    /// Returns the number of recorded samples.
    fn sample_endpoint(
        &mut self,
        endpoint: &dyn SparqlEndpoint,
        predicate: &NamedNode,
        kind: StatKind,
        direction: Direction,
        quota: u64,
        upper_bound: u64,
    ) -> Result<usize, SamplingError> {
        let is_datatype_property = self.registry.is_datatype_property(predicate);
        let mut recorded = 0;
        let mut i = 0;
        while i < quota && i <= upper_bound {
            i += 1;
            let offset = if upper_bound > 1 {
                self.rng.gen_range(0..upper_bound)
            } else {
                0
            };
            let query = match direction {
                Direction::Forward => LookupQuery::SubjectAt {
                    predicate: predicate.clone(),
                    offset,
                },
                Direction::Reverse => LookupQuery::ObjectAt {
                    predicate: predicate.clone(),
                    offset,
                },
            };
            let Some(input) = endpoint
                .select(&query, self.options.endpoint_timeout)?
                .into_iter()
                .next()
            else {
                debug!("No sample at offset {offset} of {predicate} on {}", endpoint.uri());
                continue;
            };
            let value = match kind {
                StatKind::Selectivity => {
                    let mut selectivity =
                        self.selectivity(endpoint, predicate, direction, input.clone())?;
                    if selectivity == 0 && direction == Direction::Reverse && is_datatype_property {
                        // The endpoint may have returned the value without its datatype
                        if let Some(typed) = datatype_value(&input) {
                            selectivity = self.selectivity(endpoint, predicate, direction, typed)?;
                        }
                    }
                    if selectivity == 0 && direction == Direction::Reverse {
                        warn!(
                            "The predicate {predicate} has been incorrectly typed by the registry as an object property"
                        );
                        break;
                    }
                    selectivity
                }
                StatKind::Time => {
                    let start = Instant::now();
                    self.resolver.resolve(&input, predicate, direction)?;
                    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
                }
            };
            debug!("Sample #{i}: {direction} {kind} of {predicate} for {input} is {value}");
            self.store.record_sample(&PredicateSample::new(
                predicate.clone(),
                kind,
                direction,
                value,
            ))?;
            recorded += 1;
        }
        Ok(recorded)
    }

    fn selectivity(
        &self,
        endpoint: &dyn SparqlEndpoint,
        predicate: &NamedNode,
        direction: Direction,
        input: Term,
    ) -> Result<u64, BackendError> {
        let predicate = predicate.clone();
        let (count, values) = match direction {
            Direction::Forward => (
                LookupQuery::CountObjects {
                    subject: input.clone(),
                    predicate: predicate.clone(),
                },
                LookupQuery::Objects {
                    subject: input,
                    predicate,
                },
            ),
            Direction::Reverse => (
                LookupQuery::CountSubjects {
                    predicate: predicate.clone(),
                    object: input.clone(),
                },
                LookupQuery::Subjects {
                    predicate,
                    object: input,
                },
            ),
        };
        match endpoint.count(&count, self.options.endpoint_timeout) {
            Err(BackendError::Timeout { .. }) => endpoint.results_count_lower_bound(
                &values,
                self.options.lower_bound_cap,
                self.options.endpoint_timeout,
            ),
            result => result,
        }
    }

    /// Downgrades the registry status of an endpoint that failed to answer in time.
    fn note_failure(&self, backend: &NamedNode, error: &BackendError) -> Result<(), SamplingError> {
        if !error.is_transient() {
            return Ok(());
        }
        let status = match self.registry.backend_status(backend)? {
            BackendStatus::Ok => BackendStatus::Slow,
            BackendStatus::Slow | BackendStatus::Dead => BackendStatus::Dead,
        };
        warn!("Marking {backend} as {status:?}");
        self.registry.set_backend_status(backend, status)?;
        Ok(())
    }
}

/// `ceil(triples * samples / total)`
fn quota(triples: u64, samples: u64, total: u64) -> u64 {
    u64::try_from((u128::from(triples) * u128::from(samples)).div_ceil(u128::from(total)))
        .unwrap_or(u64::MAX)
}

fn to_u64(count: usize) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// The typed numeric literal a simple literal stands for, if its value is a number.
fn datatype_value(term: &Term) -> Option<Term> {
    let Term::Literal(literal) = term else {
        return None;
    };
    if literal.datatype() != xsd::STRING || literal.language().is_some() {
        return None;
    }
    let value = literal.value();
    let is_numeric = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !is_numeric || value.parse::<f64>().is_err() {
        return None;
    }
    let datatype = if value.parse::<i64>().is_ok() {
        xsd::INTEGER
    } else if value.contains(['e', 'E']) {
        xsd::DOUBLE
    } else {
        xsd::DECIMAL
    };
    Some(Literal::new_typed_literal(value, datatype).into())
}
