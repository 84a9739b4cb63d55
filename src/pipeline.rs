use std::collections::BTreeSet;
use std::io::BufWriter;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use chrono::Utc;
use serde::Serialize;

use crate::cancel::CancelFlag;
use crate::config::ResolvedConfig;
use crate::domain::DatasetKind;
use crate::download::{ArchiveDownloader, DownloadReport};
use crate::error::KiraError;
use crate::kgx::{KgxWriter, WriteCounts};
use crate::model::{KgxNode, PredicateTable, VariantNode};
use crate::normalize::{
    EntityNormalizer, FailureSummary, NodeCache, NormalizationClient, PredicateCache,
};
use crate::reference::TISSUES;
use crate::scanner::{
    EdgeStream, QtlArchive, RemapTables, ScanOptions, ScanStats, SeenIds, harvest_nodes,
};
use crate::store::Store;
use crate::variant_norm::{VariantNormalizer, normalize_in_chunks};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sink that only forwards events to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Mutable state of a single run. Nothing here outlives the run unless the
/// caller passes the same context again.
#[derive(Debug, Default)]
pub struct RunContext {
    pub node_cache: NodeCache,
    pub predicate_cache: PredicateCache,
    pub seen: SeenIds,
    pub harvest_stats: ScanStats,
    pub edge_stats: ScanStats,
}

impl RunContext {
    /// Starts a run with node lookups carried over from an earlier one.
    pub fn with_node_cache(node_cache: NodeCache) -> Self {
        Self {
            node_cache,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub output_path: String,
    pub started_at: String,
    pub gtex_version: u32,
    pub archives: DownloadReport,
    pub genes: usize,
    pub anatomy: usize,
    pub variants: usize,
    pub written: WriteCounts,
    pub harvest: ScanStats,
    pub edges: ScanStats,
    pub node_failures: FailureSummary,
    pub variant_failures: FailureSummary,
    pub predicate_failures: Vec<String>,
    pub elapsed_ms: u64,
}

pub struct Pipeline<D, N, V> {
    config: ResolvedConfig,
    store: Store,
    downloader: D,
    normalizer: EntityNormalizer<N>,
    variants: V,
    cancel: CancelFlag,
}

impl<D, N, V> Pipeline<D, N, V>
where
    D: ArchiveDownloader,
    N: NormalizationClient,
    V: VariantNormalizer,
{
    pub fn new(
        config: ResolvedConfig,
        store: Store,
        downloader: D,
        normalizer: EntityNormalizer<N>,
        variants: V,
    ) -> Self {
        Self {
            config,
            store,
            downloader,
            normalizer,
            variants,
            cancel: CancelFlag::default(),
        }
    }

    /// Raising `cancel` stops the run at the next check; the archives and any
    /// partial output are removed on the way out.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn run(&self, sink: &dyn ProgressSink) -> Result<RunSummary, KiraError> {
        let mut context = RunContext::default();
        self.run_with_context(&mut context, sink)
    }

    pub fn run_with_context(
        &self,
        context: &mut RunContext,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, KiraError> {
        let started = Instant::now();
        let started_at = Utc::now().to_rfc3339();
        let output_path = self.store.validate_output(&self.config.output_file)?;
        self.store.ensure_scratch_dir()?;

        let version = self.config.gtex_version;
        let archive_paths = DatasetKind::ALL
            .iter()
            .map(|kind| self.store.archive_path(*kind, version))
            .collect::<Vec<_>>();
        let _guard = self
            .store
            .archive_guard(archive_paths.clone(), self.config.keep_archives);

        sink.event(ProgressEvent {
            message: format!("phase=Download; fetching GTEx v{version} archives"),
            elapsed: Some(started.elapsed()),
        });
        let files = DatasetKind::ALL
            .iter()
            .map(|kind| kind.archive_file_name(version))
            .collect::<Vec<_>>();
        let report = self.downloader.fetch(
            &self.config.source_base_url,
            &files,
            self.store.scratch_dir().as_std_path(),
        )?;
        self.cancel.check()?;

        let mut options = if self.config.test_mode {
            ScanOptions::test_mode()
        } else {
            ScanOptions::default()
        };
        options.cancel = self.cancel.clone();
        let archives = DatasetKind::ALL
            .iter()
            .zip(&archive_paths)
            .map(|(kind, path)| QtlArchive::open(path.as_std_path(), *kind, options.clone()))
            .collect::<Result<Vec<_>, KiraError>>()?;

        sink.event(ProgressEvent {
            message: "phase=Scan; harvesting genes and variants".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let mut genes = Vec::new();
        let mut variants = Vec::new();
        for archive in &archives {
            let harvested = harvest_nodes(archive, &mut context.seen, &mut context.harvest_stats)?;
            genes.extend(harvested.genes);
            variants.extend(harvested.variants);
        }
        let gene_count = genes.len();
        let variant_count = variants.len();

        sink.event(ProgressEvent {
            message: format!("phase=Normalize; {gene_count} genes, {} tissues", TISSUES.len()),
            elapsed: Some(started.elapsed()),
        });
        let mut nodes = genes;
        nodes.extend(anatomy_nodes());
        let node_failed = self.normalizer.normalize_nodes(&mut nodes, &context.node_cache);
        retain_normalized(&mut nodes, &node_failed);
        self.cancel.check()?;

        sink.event(ProgressEvent {
            message: format!("phase=Normalize; {variant_count} sequence variants"),
            elapsed: Some(started.elapsed()),
        });
        let variant_failed = normalize_in_chunks(
            &self.variants,
            &mut variants,
            &context.node_cache,
            self.config.variant_chunk_size,
            &self.cancel,
        )?;
        variants.retain(VariantNode::is_normalized);

        let remap = RemapTables::from_nodes(&nodes, &variants);

        let mut predicates = PredicateTable::default();
        let predicate_failed = if self.config.normalize_predicates {
            self.normalizer
                .normalize_predicates(predicates.templates_mut(), &context.predicate_cache)
        } else {
            BTreeSet::new()
        };
        self.cancel.check()?;

        sink.event(ProgressEvent {
            message: format!("phase=Write; writing {}", output_path),
            elapsed: Some(started.elapsed()),
        });
        let written = self.write_document(
            &output_path,
            &nodes,
            &variants,
            &archives,
            &remap,
            &predicates,
            context,
        )?;

        let node_failures = FailureSummary::from_failures(&node_failed);
        let variant_failures = FailureSummary::from_failures(&variant_failed);
        node_failures.log("node");
        variant_failures.log("variant");
        for predicate in &predicate_failed {
            tracing::info!(predicate = %predicate, "predicate not normalized");
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} nodes, {} edges",
                written.nodes, written.edges
            ),
            elapsed: Some(started.elapsed()),
        });

        Ok(RunSummary {
            output_path: output_path.to_string(),
            started_at,
            gtex_version: version,
            archives: report,
            genes: gene_count,
            anatomy: TISSUES.len(),
            variants: variant_count,
            written,
            harvest: context.harvest_stats.clone(),
            edges: context.edge_stats.clone(),
            node_failures,
            variant_failures,
            predicate_failures: predicate_failed.into_iter().collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_document(
        &self,
        output_path: &Utf8Path,
        nodes: &[KgxNode],
        variants: &[VariantNode],
        archives: &[QtlArchive],
        remap: &RemapTables,
        predicates: &PredicateTable,
        context: &mut RunContext,
    ) -> Result<WriteCounts, KiraError> {
        let temp = self.store.output_temp()?;
        let mut writer = KgxWriter::new(BufWriter::new(temp));
        writer.begin()?;
        writer.write_nodes(nodes)?;
        for variant in variants {
            self.cancel.check()?;
            writer.write_variant(variant)?;
        }
        writer.begin_edges()?;
        for archive in archives {
            let mut stream = EdgeStream::new(archive, remap);
            for edge in &mut stream {
                writer.write_edge(&predicates.build_edge(&edge?))?;
            }
            tracing::info!(
                kind = %archive.kind(),
                missing = stream.stats().missing_remaps,
                malformed = stream.stats().malformed_rows,
                "edge pass complete"
            );
            context.edge_stats.merge(stream.stats());
        }
        let (buffered, counts) = writer.finish()?;
        let temp = buffered
            .into_inner()
            .map_err(|err| KiraError::Serialization(err.to_string()))?;
        Store::persist_output(temp, output_path)?;
        Ok(counts)
    }
}

/// One anatomy shell per known tissue.
pub fn anatomy_nodes() -> Vec<KgxNode> {
    TISSUES
        .iter()
        .map(|(tissue, uberon)| KgxNode::anatomy(tissue, uberon))
        .collect()
}

/// Drops nodes that failed normalization or were left without a category.
fn retain_normalized(nodes: &mut Vec<KgxNode>, failed: &BTreeSet<String>) {
    let before = nodes.len();
    nodes.retain(|node| !failed.contains(&node.id) && !node.category.is_empty());
    if nodes.len() < before {
        tracing::info!(removed = before - nodes.len(), "dropped unnormalized nodes");
    }
}
