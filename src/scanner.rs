//! Two-pass scanning of the tissue-partitioned QTL archives.
//!
//! Pass 1 ([`harvest_nodes`]) collects one gene shell and one variant shell per
//! distinct raw id. Pass 2 ([`EdgeStream`]) re-reads the same members after
//! normalization and yields edges whose endpoints are canonical ids.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use regex::Regex;
use serde::Serialize;

use crate::cancel::CancelFlag;
use crate::domain::{DatasetKind, strip_version};
use crate::error::KiraError;
use crate::hgvs;
use crate::model::{KgxNode, QtlEdge, RawAssociationRecord, VariantNode};
use crate::reference::tissue_uberon_id;

pub const COLUMN_COUNT: usize = 12;
pub const TEST_MODE_TISSUE: &str = "Salivary";
pub const TEST_MODE_ROW_LIMIT: usize = 5000;

const VARIANT_COLUMN: usize = 0;
const GENE_COLUMN: usize = 1;
const P_VALUE_COLUMN: usize = 6;
const SLOPE_COLUMN: usize = 7;

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Only members whose name contains this string are scanned.
    pub member_filter: Option<String>,
    /// Maximum number of data rows read from each member.
    pub row_limit: Option<usize>,
    /// Polled once per row; a raised flag ends the scan with `Cancelled`.
    pub cancel: CancelFlag,
}

impl ScanOptions {
    pub fn test_mode() -> Self {
        Self {
            member_filter: Some(TEST_MODE_TISSUE.to_string()),
            row_limit: Some(TEST_MODE_ROW_LIMIT),
            cancel: CancelFlag::default(),
        }
    }
}

/// A significant-pairs member inside an archive, located by byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub tissue: String,
    offset: u64,
    size: u64,
}

/// Raw lines of a decompressed member. Lines are bytes so that a row with
/// invalid UTF-8 is reported as malformed instead of ending the scan.
struct MemberLines {
    reader: BufReader<MultiGzDecoder<Take<File>>>,
}

impl Iterator for MemberLines {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => Some(Ok(line)),
            Err(err) => Some(Err(err)),
        }
    }
}

/// An indexed QTL archive. Members are read straight from the tar file, so
/// the archive can be scanned any number of times without extracting it.
#[derive(Debug, Clone)]
pub struct QtlArchive {
    path: PathBuf,
    kind: DatasetKind,
    members: Vec<ArchiveMember>,
    options: ScanOptions,
}

impl QtlArchive {
    pub fn open(path: &Path, kind: DatasetKind, options: ScanOptions) -> Result<Self, KiraError> {
        let pattern = member_pattern(kind)?;
        let file = File::open(path).map_err(|err| KiraError::Archive(err.to_string()))?;
        let mut archive = tar::Archive::new(file);
        let entries = archive
            .entries_with_seek()
            .map_err(|err| KiraError::Archive(err.to_string()))?;

        let mut members = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Archive(err.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|err| KiraError::Archive(err.to_string()))?
                .to_string_lossy()
                .into_owned();
            let Some(captures) = pattern.captures(&name) else {
                tracing::debug!(member = %name, "skipping non-pairs member");
                continue;
            };
            if let Some(filter) = &options.member_filter {
                if !name.contains(filter.as_str()) {
                    continue;
                }
            }
            let tissue = captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            members.push(ArchiveMember {
                tissue,
                offset: entry.raw_file_position(),
                size: entry.size(),
                name,
            });
        }

        tracing::info!(
            archive = %path.display(),
            kind = %kind,
            members = members.len(),
            "indexed archive"
        );
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            members,
            options,
        })
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn members(&self) -> &[ArchiveMember] {
        &self.members
    }

    /// Data lines of a member; the header line is already consumed.
    fn open_member(&self, member: &ArchiveMember) -> Result<MemberLines, KiraError> {
        let mut file = File::open(&self.path).map_err(|err| KiraError::Archive(err.to_string()))?;
        file.seek(SeekFrom::Start(member.offset))
            .map_err(|err| KiraError::Archive(err.to_string()))?;
        let decoder = MultiGzDecoder::new(file.take(member.size));
        let mut lines = MemberLines {
            reader: BufReader::new(decoder),
        };
        if let Some(header) = lines.next() {
            header.map_err(|err| KiraError::Archive(format!("{}: {err}", member.name)))?;
        }
        Ok(lines)
    }
}

fn member_pattern(kind: DatasetKind) -> Result<Regex, KiraError> {
    Regex::new(&format!(
        r"(?:^|/)([^/.]+)\.v\d+\.{}$",
        regex::escape(kind.member_suffix())
    ))
    .map_err(|err| KiraError::Archive(err.to_string()))
}

/// Splits one tab separated data line into a record. The error is the reason
/// the row is malformed.
pub fn parse_row(
    kind: DatasetKind,
    tissue: &str,
    line: &str,
) -> Result<RawAssociationRecord, String> {
    let columns = line
        .trim_end_matches(['\r', '\n'])
        .split('\t')
        .collect::<Vec<_>>();
    if columns.len() != COLUMN_COUNT {
        return Err(format!(
            "expected {COLUMN_COUNT} columns, found {}",
            columns.len()
        ));
    }

    let gene_column = columns[GENE_COLUMN];
    let gene = match kind {
        DatasetKind::Expression => gene_column,
        DatasetKind::Splicing => gene_column
            .split(':')
            .nth(4)
            .ok_or_else(|| format!("phenotype id without gene segment: {gene_column}"))?,
    };
    let gene_id = strip_version(gene);
    if gene_id.is_empty() {
        return Err("empty gene id".to_string());
    }

    let p_value = columns[P_VALUE_COLUMN]
        .parse::<f64>()
        .map_err(|_| format!("invalid p-value: {}", columns[P_VALUE_COLUMN]))?;
    let slope = columns[SLOPE_COLUMN]
        .parse::<f64>()
        .map_err(|_| format!("invalid slope: {}", columns[SLOPE_COLUMN]))?;

    Ok(RawAssociationRecord {
        tissue: tissue.to_string(),
        variant_id: columns[VARIANT_COLUMN].to_string(),
        gene_id: gene_id.to_string(),
        p_value,
        slope,
    })
}

/// Decodes a raw line and parses it; any failure is a malformed row.
fn parse_raw_row(
    kind: DatasetKind,
    tissue: &str,
    line: &[u8],
) -> Result<RawAssociationRecord, String> {
    let line = std::str::from_utf8(line)
        .map_err(|err| format!("row is not valid UTF-8: {err}"))?;
    parse_row(kind, tissue, line)
}

/// Raw ids already turned into shells, shared by the scans of both archives.
#[derive(Debug, Default)]
pub struct SeenIds {
    pub genes: HashSet<String>,
    pub variants: HashSet<String>,
    /// Variants that could not be encoded; their rows produce no nodes.
    pub rejected: HashSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub members_scanned: usize,
    pub members_skipped: usize,
    pub rows: usize,
    pub malformed_rows: usize,
    pub rejected_variants: usize,
    pub missing_remaps: usize,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.members_scanned += other.members_scanned;
        self.members_skipped += other.members_skipped;
        self.rows += other.rows;
        self.malformed_rows += other.malformed_rows;
        self.rejected_variants += other.rejected_variants;
        self.missing_remaps += other.missing_remaps;
    }
}

#[derive(Debug, Default)]
pub struct HarvestedNodes {
    pub genes: Vec<KgxNode>,
    pub variants: Vec<VariantNode>,
}

fn report_malformed(member: &str, line: usize, reason: String) {
    let err = KiraError::MalformedRecord {
        member: member.to_string(),
        line,
        reason,
    };
    tracing::warn!(error = %err, "skipping row");
}

/// Pass 1: returns the gene and variant shells for ids not yet in `seen`.
pub fn harvest_nodes(
    archive: &QtlArchive,
    seen: &mut SeenIds,
    stats: &mut ScanStats,
) -> Result<HarvestedNodes, KiraError> {
    let mut harvested = HarvestedNodes::default();
    let row_limit = archive.options.row_limit.unwrap_or(usize::MAX);

    for member in archive.members() {
        if tissue_uberon_id(&member.tissue).is_none() {
            let err = KiraError::UnknownTissue(member.tissue.clone());
            tracing::warn!(member = %member.name, error = %err, "skipping member");
            stats.members_skipped += 1;
            continue;
        }
        tracing::info!(member = %member.name, "harvesting nodes");
        stats.members_scanned += 1;

        let lines = archive.open_member(member)?;
        for (index, line) in lines.take(row_limit).enumerate() {
            archive.options.cancel.check()?;
            let line_no = index + 2;
            let line = line.map_err(|err| KiraError::Archive(format!("{}: {err}", member.name)))?;
            stats.rows += 1;
            let record = match parse_raw_row(archive.kind(), &member.tissue, &line) {
                Ok(record) => record,
                Err(reason) => {
                    stats.malformed_rows += 1;
                    report_malformed(&member.name, line_no, reason);
                    continue;
                }
            };

            if seen.rejected.contains(&record.variant_id) {
                continue;
            }
            if !seen.variants.contains(&record.variant_id) {
                match hgvs::encode(&record.variant_id) {
                    Ok(hgvs) => {
                        harvested
                            .variants
                            .push(VariantNode::from_hgvs(&record.variant_id, &hgvs));
                        seen.variants.insert(record.variant_id.clone());
                    }
                    Err(err) => {
                        tracing::warn!(
                            variant = %record.variant_id,
                            error = %err,
                            "variant not encodable"
                        );
                        stats.rejected_variants += 1;
                        seen.rejected.insert(record.variant_id);
                        continue;
                    }
                }
            }
            if seen.genes.insert(record.gene_id.clone()) {
                harvested.genes.push(KgxNode::gene(&record.gene_id));
            }
        }
    }

    tracing::info!(
        kind = %archive.kind(),
        genes = harvested.genes.len(),
        variants = harvested.variants.len(),
        "harvest complete"
    );
    Ok(harvested)
}

/// Raw id to canonical id, built from the normalized node sets.
#[derive(Debug, Clone, Default)]
pub struct RemapTables {
    /// Gene ids and tissue labels.
    pub nodes: HashMap<String, String>,
    pub variants: HashMap<String, String>,
}

impl RemapTables {
    pub fn from_nodes(nodes: &[KgxNode], variants: &[VariantNode]) -> Self {
        let nodes = nodes
            .iter()
            .map(|node| (node.original_id.clone(), node.id.clone()))
            .collect();
        let variants = variants
            .iter()
            .filter(|variant| variant.is_normalized())
            .map(|variant| (variant.original_id.clone(), variant.id.clone()))
            .collect();
        Self { nodes, variants }
    }

    fn node(&self, raw: &str) -> Result<&str, KiraError> {
        self.nodes
            .get(raw)
            .map(String::as_str)
            .ok_or_else(|| KiraError::MissingRemap(raw.to_string()))
    }

    fn variant(&self, raw: &str) -> Result<&str, KiraError> {
        self.variants
            .get(raw)
            .map(String::as_str)
            .ok_or_else(|| KiraError::MissingRemap(raw.to_string()))
    }
}

struct OpenMember {
    name: String,
    tissue: String,
    anatomy_id: String,
    lines: std::iter::Take<std::iter::Enumerate<MemberLines>>,
    edges: usize,
    missing_remaps: usize,
}

impl OpenMember {
    fn log_complete(&self) {
        tracing::info!(
            member = %self.name,
            edges = self.edges,
            missing_remaps = self.missing_remaps,
            "member complete"
        );
    }
}

/// Pass 2: a lazy, single-pass iterator over the edges of one archive.
///
/// Rows that are malformed or reference an id without a canonical mapping
/// are skipped and counted; only read errors and cancellation are yielded
/// as `Err`, after which the stream is fused.
pub struct EdgeStream<'a> {
    archive: &'a QtlArchive,
    remap: &'a RemapTables,
    next_member: usize,
    current: Option<OpenMember>,
    stats: ScanStats,
    failed: bool,
}

impl<'a> EdgeStream<'a> {
    pub fn new(archive: &'a QtlArchive, remap: &'a RemapTables) -> Self {
        Self {
            archive,
            remap,
            next_member: 0,
            current: None,
            stats: ScanStats::default(),
            failed: false,
        }
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    fn advance_member(&mut self) -> Result<bool, KiraError> {
        while let Some(member) = self.archive.members().get(self.next_member) {
            self.next_member += 1;
            let anatomy_id = match self.remap.node(&member.tissue) {
                Ok(id) => id.to_string(),
                Err(err) => {
                    tracing::warn!(member = %member.name, error = %err, "skipping member");
                    self.stats.members_skipped += 1;
                    continue;
                }
            };
            tracing::info!(member = %member.name, "emitting edges");
            self.stats.members_scanned += 1;
            let row_limit = self.archive.options.row_limit.unwrap_or(usize::MAX);
            let lines = self.archive.open_member(member)?;
            self.current = Some(OpenMember {
                name: member.name.clone(),
                tissue: member.tissue.clone(),
                anatomy_id,
                lines: lines.enumerate().take(row_limit),
                edges: 0,
                missing_remaps: 0,
            });
            return Ok(true);
        }
        Ok(false)
    }

    fn edge_for(&mut self, record: &RawAssociationRecord, anatomy_id: &str) -> Option<QtlEdge> {
        let remap = self.remap;
        let endpoints = remap
            .variant(&record.variant_id)
            .and_then(|variant| Ok((variant, remap.node(&record.gene_id)?)));
        match endpoints {
            Ok((variant_id, gene_id)) => Some(QtlEdge {
                kind: self.archive.kind(),
                anatomy_id: anatomy_id.to_string(),
                gene_id: gene_id.to_string(),
                variant_id: variant_id.to_string(),
                p_value: record.p_value,
                slope: record.slope,
            }),
            Err(err) => {
                tracing::debug!(error = %err, "skipping row");
                self.stats.missing_remaps += 1;
                if let Some(current) = self.current.as_mut() {
                    current.missing_remaps += 1;
                }
                None
            }
        }
    }
}

impl Iterator for EdgeStream<'_> {
    type Item = Result<QtlEdge, KiraError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.current.is_none() {
                match self.advance_member() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(err) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                }
            }
            if let Err(err) = self.archive.options.cancel.check() {
                self.failed = true;
                return Some(Err(err));
            }
            let current = self.current.as_mut()?;
            let Some((index, line)) = current.lines.next() else {
                current.log_complete();
                self.current = None;
                continue;
            };
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(KiraError::Archive(format!("{}: {err}", current.name))));
                }
            };
            self.stats.rows += 1;
            let parsed = parse_raw_row(self.archive.kind(), &current.tissue, &line);
            let anatomy_id = current.anatomy_id.clone();
            let record = match parsed {
                Ok(record) => record,
                Err(reason) => {
                    self.stats.malformed_rows += 1;
                    report_malformed(&current.name, index + 2, reason);
                    continue;
                }
            };
            if let Some(edge) = self.edge_for(&record, &anatomy_id) {
                if let Some(current) = self.current.as_mut() {
                    current.edges += 1;
                }
                return Some(Ok(edge));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(variant: &str, gene: &str, pval: &str, slope: &str) -> String {
        let mut columns = vec!["0"; COLUMN_COUNT];
        columns[VARIANT_COLUMN] = variant;
        columns[GENE_COLUMN] = gene;
        columns[P_VALUE_COLUMN] = pval;
        columns[SLOPE_COLUMN] = slope;
        columns.join("\t")
    }

    #[test]
    fn splicing_gene_from_phenotype() {
        let line = row(
            "chr1_100_A_C_b38",
            "chr1:497299:498399:clu_51878:ENSG00000237094.11",
            "1e-5",
            "-0.2",
        );
        let record = parse_row(DatasetKind::Splicing, "Liver", &line).unwrap();
        assert_eq!(record.gene_id, "ENSG00000237094");
        assert_eq!(record.slope, -0.2);
    }

    #[test]
    fn invalid_utf8_row_is_malformed() {
        let mut line = b"ENSG\xff\xfe".to_vec();
        line.extend_from_slice(row("chr1_100_A_C_b38", "ENSG1", "1e-5", "0.1").as_bytes());
        let err = parse_raw_row(DatasetKind::Expression, "Liver", &line).unwrap_err();
        assert!(err.contains("UTF-8"));
    }

    #[test]
    fn short_row_is_malformed() {
        let err = parse_row(DatasetKind::Expression, "Liver", "a\tb\tc").unwrap_err();
        assert!(err.contains("12 columns"));
    }

    #[test]
    fn member_names() {
        let pattern = member_pattern(DatasetKind::Expression).unwrap();
        let captures = pattern
            .captures(
                "GTEx_Analysis_v8_eQTL/Minor_Salivary_Gland.v8.signif_variant_gene_pairs.txt.gz",
            )
            .unwrap();
        assert_eq!(&captures[1], "Minor_Salivary_Gland");
        assert!(
            pattern
                .captures("GTEx_Analysis_v8_eQTL/Liver.v8.egenes.txt.gz")
                .is_none()
        );
        let splicing = member_pattern(DatasetKind::Splicing).unwrap();
        assert!(
            splicing
                .captures(
                    "GTEx_Analysis_v8_sQTL/Cells_EBV-transformed_lymphocytes.v8.sqtl_signifpairs.txt.gz",
                )
                .is_some()
        );
    }
}
