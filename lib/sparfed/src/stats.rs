use crate::error::StatsError;
use crate::model::{Direction, PredicateSample, StatKind};
use crate::vocab::stats;
use oxrdf::{BlankNode, Graph, Literal, NamedNode, NamedNodeRef, TripleRef};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, warn};

/// Storage of predicate statistic samples.
///
/// Samples are only appended. Reads aggregate them by averaging.
pub trait StatsStore: Send + Sync {
    /// Appends a sample.
    fn record_sample(&self, sample: &PredicateSample) -> Result<(), StatsError>;

    /// Average value of the samples of the predicate for the given kind and direction.
    ///
    /// If the predicate has no such samples, the average over all predicates computed when the store has been opened is returned instead.
    /// Averages are truncated to integers.
    fn stat(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
        direction: Direction,
    ) -> Result<u64, StatsError>;

    /// Number of samples of this kind for the predicate, in both directions.
    fn sample_count(&self, predicate: NamedNodeRef<'_>, kind: StatKind)
    -> Result<usize, StatsError>;

    fn sample_count_in_direction(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
        direction: Direction,
    ) -> Result<usize, StatsError>;

    /// All the predicates with at least one sample.
    fn predicates(&self) -> Result<Vec<NamedNode>, StatsError>;

    /// Recomputes the averages returned for predicates without samples.
    fn refresh_fallback_averages(&self) -> Result<(), StatsError>;

    /// Removes all samples.
    fn clear(&self) -> Result<(), StatsError>;
}

impl<S: StatsStore + ?Sized> StatsStore for Arc<S> {
    fn record_sample(&self, sample: &PredicateSample) -> Result<(), StatsError> {
        (**self).record_sample(sample)
    }

    fn stat(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
        direction: Direction,
    ) -> Result<u64, StatsError> {
        (**self).stat(predicate, kind, direction)
    }

    fn sample_count(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
    ) -> Result<usize, StatsError> {
        (**self).sample_count(predicate, kind)
    }

    fn sample_count_in_direction(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
        direction: Direction,
    ) -> Result<usize, StatsError> {
        (**self).sample_count_in_direction(predicate, kind, direction)
    }

    fn predicates(&self) -> Result<Vec<NamedNode>, StatsError> {
        (**self).predicates()
    }

    fn refresh_fallback_averages(&self) -> Result<(), StatsError> {
        (**self).refresh_fallback_averages()
    }

    fn clear(&self) -> Result<(), StatsError> {
        (**self).clear()
    }
}

/// A [`StatsStore`] keeping samples in memory, optionally backed by an append-only JSON lines file.
///
/// ```
/// use oxrdf::NamedNode;
/// use sparfed::{Direction, PredicateSample, PredicateStatsDb, StatKind, StatsStore};
///
/// let db = PredicateStatsDb::new();
/// let p = NamedNode::new("http://example.com/p")?;
/// for value in [2, 4, 6] {
///     db.record_sample(&PredicateSample::new(p.clone(), StatKind::Selectivity, Direction::Forward, value))?;
/// }
/// assert_eq!(db.stat(p.as_ref(), StatKind::Selectivity, Direction::Forward)?, 4);
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Default)]
pub struct PredicateStatsDb {
    samples: RwLock<Samples>,
    fallback: RwLock<FxHashMap<(StatKind, Direction), u64>>,
    log: Option<(PathBuf, Mutex<File>)>,
}

impl PredicateStatsDb {
    /// A new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the store persisted in the given file, creating it if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StatsError> {
        let path = path.as_ref();
        let mut samples = Samples::default();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SampleRecord>(&line)
                    .map_err(|e| e.to_string())
                    .and_then(SampleRecord::into_sample)
                {
                    Ok(sample) => samples.push(sample),
                    Err(e) => warn!(
                        "Skipping invalid sample at line {} of {}: {e}",
                        i + 1,
                        path.display()
                    ),
                }
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Loaded {} samples from {}", samples.all.len(), path.display());
        let db = Self {
            fallback: RwLock::new(samples.fallback_averages()),
            samples: RwLock::new(samples),
            log: Some((path.to_owned(), Mutex::new(file))),
        };
        Ok(db)
    }

    /// Renders all samples as RDF using the [`stats`](crate::vocab::stats) vocabulary.
    pub fn to_graph(&self) -> Graph {
        let mut graph = Graph::new();
        for sample in &self.samples.read().unwrap_or_else(PoisonError::into_inner).all {
            let node = BlankNode::default();
            let link = match sample.kind {
                StatKind::Selectivity => stats::SELECTIVITY_SAMPLE,
                StatKind::Time => stats::TIME_SAMPLE,
            };
            graph.insert(TripleRef::new(&sample.predicate, link, &node));
            graph.insert(TripleRef::new(
                &node,
                stats::DIRECTION,
                &Literal::new_simple_literal(sample.direction.as_str()),
            ));
            graph.insert(TripleRef::new(
                &node,
                stats::TIMESTAMP,
                &Literal::from(sample.timestamp),
            ));
            graph.insert(TripleRef::new(
                &node,
                stats::VALUE,
                &Literal::from(sample.value),
            ));
        }
        graph
    }

    /// Number of samples in the store.
    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .all
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn total(&self, predicate: NamedNodeRef<'_>, kind: StatKind, direction: Direction) -> Total {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total(predicate, kind, direction)
    }
}

impl StatsStore for PredicateStatsDb {
    fn record_sample(&self, sample: &PredicateSample) -> Result<(), StatsError> {
        if let Some((_, file)) = &self.log {
            let mut line = serde_json::to_string(&SampleRecord::from(sample))?;
            line.push('\n');
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample.clone());
        Ok(())
    }

    fn stat(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
        direction: Direction,
    ) -> Result<u64, StatsError> {
        if let Some(average) = self.total(predicate, kind, direction).average() {
            return Ok(average);
        }
        Ok(self
            .fallback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind, direction))
            .copied()
            .unwrap_or(0))
    }

    fn sample_count(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
    ) -> Result<usize, StatsError> {
        Ok(self.total(predicate, kind, Direction::Forward).count
            + self.total(predicate, kind, Direction::Reverse).count)
    }

    fn sample_count_in_direction(
        &self,
        predicate: NamedNodeRef<'_>,
        kind: StatKind,
        direction: Direction,
    ) -> Result<usize, StatsError> {
        Ok(self.total(predicate, kind, direction).count)
    }

    fn predicates(&self) -> Result<Vec<NamedNode>, StatsError> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = FxHashSet::default();
        Ok(samples
            .all
            .iter()
            .filter(|s| seen.insert(&s.predicate))
            .map(|s| s.predicate.clone())
            .collect())
    }

    fn refresh_fallback_averages(&self) -> Result<(), StatsError> {
        let averages = self
            .samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fallback_averages();
        *self.fallback.write().unwrap_or_else(PoisonError::into_inner) = averages;
        Ok(())
    }

    fn clear(&self) -> Result<(), StatsError> {
        if let Some((path, file)) = &self.log {
            file.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_len(0)?;
            debug!("Cleared {}", path.display());
        }
        *self.samples.write().unwrap_or_else(PoisonError::into_inner) = Samples::default();
        self.fallback
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// The samples, with running totals per predicate, kind and direction.
#[derive(Default)]
struct Samples {
    all: Vec<PredicateSample>,
    totals: FxHashMap<String, FxHashMap<(StatKind, Direction), Total>>,
}

impl Samples {
    fn push(&mut self, sample: PredicateSample) {
        self.totals
            .entry(sample.predicate.as_str().to_owned())
            .or_default()
            .entry((sample.kind, sample.direction))
            .or_default()
            .add(sample.value);
        self.all.push(sample);
    }

    fn total(&self, predicate: NamedNodeRef<'_>, kind: StatKind, direction: Direction) -> Total {
        self.totals
            .get(predicate.as_str())
            .and_then(|totals| totals.get(&(kind, direction)))
            .copied()
            .unwrap_or_default()
    }

    fn fallback_averages(&self) -> FxHashMap<(StatKind, Direction), u64> {
        let mut totals = FxHashMap::<_, Total>::default();
        for (key, total) in self.totals.values().flatten() {
            totals.entry(*key).or_default().merge(*total);
        }
        totals
            .into_iter()
            .filter_map(|(key, total)| Some((key, total.average()?)))
            .collect()
    }
}

#[derive(Default, Clone, Copy)]
struct Total {
    sum: u128,
    count: usize,
}

impl Total {
    fn add(&mut self, value: u64) {
        self.sum += u128::from(value);
        self.count += 1;
    }

    fn merge(&mut self, other: Self) {
        self.sum += other.sum;
        self.count += other.count;
    }

    /// Integer average, rounded toward zero.
    fn average(self) -> Option<u64> {
        let count = u128::try_from(self.count).ok().filter(|c| *c > 0)?;
        Some(u64::try_from(self.sum / count).unwrap_or(u64::MAX))
    }
}

/// Serialized form of a sample.
#[derive(Serialize, Deserialize)]
struct SampleRecord {
    predicate: String,
    kind: StatKind,
    direction: Direction,
    value: u64,
    timestamp: u64,
}

impl SampleRecord {
    fn into_sample(self) -> Result<PredicateSample, String> {
        Ok(PredicateSample {
            predicate: NamedNode::new(self.predicate).map_err(|e| e.to_string())?,
            kind: self.kind,
            direction: self.direction,
            value: self.value,
            timestamp: self.timestamp,
        })
    }
}

impl From<&PredicateSample> for SampleRecord {
    fn from(sample: &PredicateSample) -> Self {
        Self {
            predicate: sample.predicate.as_str().to_owned(),
            kind: sample.kind,
            direction: sample.direction,
            value: sample.value,
            timestamp: sample.timestamp,
        }
    }
}
