//! Batched, cached lookups against the node and predicate normalization
//! services.
//!
//! Every raw key is looked up at most once per run: keys already in the
//! [`NormalizationCache`] are skipped before any request is made, and a chunk
//! whose request fails is recorded as [`CacheEntry::Unresolved`] so it is not
//! retried. The cache is shared between worker threads behind a single lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::http::{self, MAX_RETRIES};
use crate::model::{EdgeRecord, KgxNode, VariantNode};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_WORKERS: usize = 4;
pub const NODE_NORM_URL: &str = "https://nodenormalization-sri.renci.org/get_normalized_nodes";
pub const EDGE_NORM_URL: &str = "https://edgenormalization-sri.renci.org/resolve_predicate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierLabel {
    pub identifier: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// A resolved node as returned by the node normalization service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeNormRecord {
    pub id: IdentifierLabel,
    #[serde(default)]
    pub equivalent_identifiers: Vec<IdentifierLabel>,
    #[serde(default, rename = "type")]
    pub types: Vec<String>,
}

impl NodeNormRecord {
    pub fn equivalent_ids(&self) -> impl Iterator<Item = &str> {
        self.equivalent_identifiers
            .iter()
            .map(|item| item.identifier.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateRecord {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry<R> {
    Unresolved,
    Resolved(R),
}

/// Raw key to lookup outcome. A key that is absent has not been looked up yet.
#[derive(Debug)]
pub struct NormalizationCache<R> {
    entries: Mutex<HashMap<String, CacheEntry<R>>>,
}

pub type NodeCache = NormalizationCache<NodeNormRecord>;
pub type PredicateCache = NormalizationCache<PredicateRecord>;

impl<R> Default for NormalizationCache<R> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> NormalizationCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache pre-populated from an earlier run.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, CacheEntry<R>)>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn unresolved_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|entry| matches!(entry, CacheEntry::Unresolved))
            .count()
    }

    pub fn insert(&self, key: String, entry: CacheEntry<R>) {
        self.lock().insert(key, entry);
    }

    pub fn into_entries(self) -> HashMap<String, CacheEntry<R>> {
        self.entries
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` with the entries locked once, instead of locking per key.
    pub fn read<T>(&self, f: impl FnOnce(&HashMap<String, CacheEntry<R>>) -> T) -> T {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<R>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn merge_batch(
        &self,
        chunk: &[String],
        outcome: Result<HashMap<String, Option<R>>, KiraError>,
    ) {
        let mut entries = self.lock();
        match outcome {
            Ok(mut mapping) => {
                for key in chunk {
                    let entry = match mapping.remove(key) {
                        Some(Some(record)) => CacheEntry::Resolved(record),
                        _ => CacheEntry::Unresolved,
                    };
                    entries.insert(key.clone(), entry);
                }
                for (key, value) in mapping {
                    let entry = value.map_or(CacheEntry::Unresolved, CacheEntry::Resolved);
                    entries.insert(key, entry);
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    keys = chunk.len(),
                    "normalization batch failed; marking chunk unresolved"
                );
                for key in chunk {
                    entries.insert(key.clone(), CacheEntry::Unresolved);
                }
            }
        }
    }
}

impl<R: Clone> NormalizationCache<R> {
    pub fn get(&self, key: &str) -> Option<CacheEntry<R>> {
        self.lock().get(key).cloned()
    }
}

/// Remote side of normalization. One call per chunk; an `Err` fails the whole chunk.
pub trait NormalizationClient: Send + Sync {
    fn lookup_nodes(
        &self,
        curies: &[String],
    ) -> Result<HashMap<String, Option<NodeNormRecord>>, KiraError>;
    fn lookup_predicates(
        &self,
        predicates: &[String],
    ) -> Result<HashMap<String, Option<PredicateRecord>>, KiraError>;
}

#[derive(Clone)]
pub struct NodeNormHttpClient {
    client: Client,
    node_url: String,
    edge_url: String,
}

impl NodeNormHttpClient {
    pub fn new(node_url: &str, edge_url: &str) -> Result<Self, KiraError> {
        let client = http::build_client(Some(Duration::from_secs(120)))
            .map_err(|err| KiraError::NormalizationHttp(err.to_string()))?;
        Ok(Self {
            client,
            node_url: node_url.to_string(),
            edge_url: edge_url.to_string(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "normalization request failed".to_string());
        Err(KiraError::NormalizationStatus { status, message })
    }
}

#[derive(Serialize)]
struct CurieQuery<'a> {
    curies: &'a [String],
}

impl NormalizationClient for NodeNormHttpClient {
    fn lookup_nodes(
        &self,
        curies: &[String],
    ) -> Result<HashMap<String, Option<NodeNormRecord>>, KiraError> {
        let body = CurieQuery { curies };
        let response = http::send_with_retries(MAX_RETRIES, || {
            self.client.post(&self.node_url).json(&body)
        })
        .map_err(|failure| KiraError::NormalizationHttp(failure.error.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| KiraError::NormalizationHttp(err.to_string()))
    }

    fn lookup_predicates(
        &self,
        predicates: &[String],
    ) -> Result<HashMap<String, Option<PredicateRecord>>, KiraError> {
        let response = http::send_with_retries(MAX_RETRIES, || {
            let mut request = self
                .client
                .get(&self.edge_url)
                .query(&[("version", "latest")]);
            for predicate in predicates {
                request = request.query(&[("predicate", predicate.as_str())]);
            }
            request
        })
        .map_err(|failure| KiraError::NormalizationHttp(failure.error.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| KiraError::NormalizationHttp(err.to_string()))
    }
}

/// How resolved type lists and equivalents are stored on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryMode {
    /// One list element per type, for JSON output.
    #[default]
    Itemized,
    /// A single `|`-joined element, for delimited output.
    Joined,
}

/// Something that can be looked up by a raw key and rewritten from a
/// resolved node record.
pub trait Normalizable {
    fn lookup_key(&self) -> &str;
    fn apply(&mut self, record: &NodeNormRecord, mode: CategoryMode);
}

impl Normalizable for KgxNode {
    fn lookup_key(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, record: &NodeNormRecord, mode: CategoryMode) {
        if let Some(label) = &record.id.label {
            self.name = label.clone();
        }
        if !record.types.is_empty() {
            self.category = match mode {
                CategoryMode::Itemized => record.types.clone(),
                CategoryMode::Joined => vec![record.types.join("|")],
            };
        }
        let equivalents = record.equivalent_ids().map(str::to_string).collect::<Vec<_>>();
        if !equivalents.is_empty() {
            self.equivalent_identifiers = match mode {
                CategoryMode::Itemized => equivalents,
                CategoryMode::Joined => vec![equivalents.join("|")],
            };
        }
        self.id = record.id.identifier.clone();
    }
}

impl Normalizable for VariantNode {
    fn lookup_key(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, record: &NodeNormRecord, _mode: CategoryMode) {
        let previous = std::mem::take(&mut self.id);
        self.synonyms.insert(previous);
        self.synonyms
            .extend(record.equivalent_ids().map(str::to_string));
        if let Some(label) = &record.id.label {
            self.name = label.clone();
        }
        self.id = record.id.identifier.clone();
    }
}

pub struct EntityNormalizer<C> {
    client: C,
    chunk_size: usize,
    workers: usize,
    mode: CategoryMode,
}

impl<C: NormalizationClient> EntityNormalizer<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            mode: CategoryMode::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_mode(mut self, mode: CategoryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Normalizes `entities` in place and returns the raw keys that did not
    /// resolve. Failed entities are left untouched.
    pub fn normalize_nodes<T: Normalizable>(
        &self,
        entities: &mut [T],
        cache: &NodeCache,
    ) -> BTreeSet<String> {
        let pending = pending_keys(entities.iter().map(|entity| entity.lookup_key()), cache);
        tracing::debug!(unique = pending.len(), "nodes to normalize");
        self.resolve(&pending, cache, |chunk| self.client.lookup_nodes(chunk));

        let mode = self.mode;
        cache.read(|entries| {
            let mut failed = BTreeSet::new();
            for entity in entities.iter_mut() {
                match entries.get(entity.lookup_key()) {
                    Some(CacheEntry::Resolved(record)) => entity.apply(record, mode),
                    _ => {
                        failed.insert(entity.lookup_key().to_string());
                    }
                }
            }
            failed
        })
    }

    /// Normalizes edge predicates in place: `relation` becomes the resolved
    /// identifier and `edge_label` the `biolink:` form of the label. Unresolved
    /// predicates are returned and the edge is left as it was.
    pub fn normalize_predicates<'e, I>(&self, edges: I, cache: &PredicateCache) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'e mut EdgeRecord>,
    {
        let mut edges = edges.into_iter().collect::<Vec<_>>();
        let pending = pending_keys(
            edges
                .iter()
                .map(|edge| edge.predicate.as_str())
                .filter(|predicate| !predicate.is_empty()),
            cache,
        );
        tracing::debug!(unique = pending.len(), "predicates to normalize");
        self.resolve(&pending, cache, |chunk| self.client.lookup_predicates(chunk));

        cache.read(|entries| {
            let mut failed = BTreeSet::new();
            for edge in edges.iter_mut() {
                match entries.get(edge.predicate.as_str()) {
                    Some(CacheEntry::Resolved(record)) if !edge.predicate.is_empty() => {
                        if let Some(identifier) = &record.identifier {
                            edge.relation = identifier.clone();
                        }
                        if let Some(label) = &record.label {
                            edge.edge_label = format!("biolink:{label}");
                        }
                    }
                    _ => {
                        failed.insert(edge.predicate.clone());
                    }
                }
            }
            failed
        })
    }

    fn resolve<R, F>(&self, keys: &[String], cache: &NormalizationCache<R>, fetch: F)
    where
        R: Send,
        F: Fn(&[String]) -> Result<HashMap<String, Option<R>>, KiraError> + Sync,
    {
        let chunks = keys.chunks(self.chunk_size).collect::<Vec<_>>();
        if chunks.is_empty() {
            return;
        }
        let total = chunks.len();
        let workers = self.workers.min(total);

        if workers <= 1 {
            for (index, chunk) in chunks.iter().enumerate() {
                tracing::debug!(chunk = index + 1, total, size = chunk.len(), "normalizing chunk");
                cache.merge_batch(chunk, fetch(chunk));
            }
            return;
        }

        let next = AtomicUsize::new(0);
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(chunk) = chunks.get(index) else {
                            break;
                        };
                        tracing::debug!(
                            chunk = index + 1,
                            total,
                            size = chunk.len(),
                            "normalizing chunk"
                        );
                        cache.merge_batch(chunk, fetch(chunk));
                    }
                });
            }
        });
    }
}

/// Unique keys not yet present in the cache, in a stable order.
fn pending_keys<'k, R>(
    keys: impl Iterator<Item = &'k str>,
    cache: &NormalizationCache<R>,
) -> Vec<String> {
    cache.read(|entries| {
        keys.filter(|key| !entries.contains_key(*key))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    })
}

/// Normalization failures grouped by curie prefix, for the end-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureSummary {
    pub by_prefix: BTreeMap<String, BTreeSet<String>>,
}

impl FailureSummary {
    /// Keys without a `prefix:` part are not curies and are left out.
    pub fn from_failures<'a, I>(failures: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut by_prefix: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for failure in failures {
            if let Some((prefix, local)) = failure.split_once(':') {
                by_prefix
                    .entry(prefix.to_string())
                    .or_default()
                    .insert(local.to_string());
            }
        }
        Self { by_prefix }
    }

    pub fn total(&self) -> usize {
        self.by_prefix.values().map(BTreeSet::len).sum()
    }

    pub fn log(&self, what: &str) {
        for (prefix, ids) in &self.by_prefix {
            let joined = ids.iter().cloned().collect::<Vec<_>>().join(",");
            tracing::info!(
                kind = what,
                prefix = %prefix,
                count = ids.len(),
                ids = %joined,
                "normalization failures"
            );
        }
    }
}
