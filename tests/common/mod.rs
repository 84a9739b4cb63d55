#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use kira_qtl_kgx::download::{ArchiveDownloader, DownloadReport};
use kira_qtl_kgx::error::KiraError;
use kira_qtl_kgx::normalize::{
    IdentifierLabel, NodeNormRecord, NormalizationClient, PredicateRecord,
};

pub const V1: &str = "chr1_1413898_T_C_b38";
pub const V2: &str = "chr2_200_ACG_._b38";
pub const V3: &str = "chr1_500_A_AT_b38";
pub const V_STRUCTURAL: &str = "chr1_100_A_<DEL>_b38";

const HEADER: &str = "variant_id\tgene_id\ttss_distance\tma_samples\tma_count\tmaf\t\
                      pval_nominal\tslope\tslope_se\tpval_nominal_threshold\t\
                      min_pval_nominal\tpval_beta";

pub fn pairs_row(variant: &str, gene: &str, p_value: &str, slope: &str) -> String {
    format!("{variant}\t{gene}\t1000\t10\t11\t0.05\t{p_value}\t{slope}\t0.1\t1e-4\t1e-9\t1e-6")
}

pub fn gz_member(rows: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    writeln!(encoder, "{HEADER}").unwrap();
    for row in rows {
        writeln!(encoder, "{row}").unwrap();
    }
    encoder.finish().unwrap()
}

/// Like [`gz_member`], for rows that are not valid UTF-8.
pub fn gz_member_bytes(rows: &[Vec<u8>]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    writeln!(encoder, "{HEADER}").unwrap();
    for row in rows {
        encoder.write_all(row).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap()
}

pub fn write_archive(path: &Path, members: &[(&str, Vec<u8>)]) {
    let file = File::create(path).unwrap();
    let mut builder = tar::Builder::new(file);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.finish().unwrap();
}

/// Expression archive: Liver (2 rows), Lung (a malformed row, an
/// unencodable variant, 1 row), an unknown tissue and a non-pairs member.
pub fn write_expression_archive(path: &Path) {
    let liver = gz_member(&[
        pairs_row(V1, "ENSG00000000001.5", "1e-8", "0.5"),
        pairs_row(V2, "ENSG00000000002.1", "2e-7", "-0.3"),
    ]);
    let lung = gz_member(&[
        "broken\trow\twith\tfew\tcolumns".to_string(),
        pairs_row(V_STRUCTURAL, "ENSG00000000003.1", "1e-5", "0.2"),
        pairs_row(V1, "ENSG00000000001.5", "3e-6", "-0.1"),
    ]);
    let mystery = gz_member(&[pairs_row(V1, "ENSG00000000009.1", "1e-5", "0.2")]);
    write_archive(
        path,
        &[
            ("GTEx_Analysis_v8_eQTL/Liver.v8.egenes.txt.gz", gz_member(&[])),
            (
                "GTEx_Analysis_v8_eQTL/Liver.v8.signif_variant_gene_pairs.txt.gz",
                liver,
            ),
            (
                "GTEx_Analysis_v8_eQTL/Lung.v8.signif_variant_gene_pairs.txt.gz",
                lung,
            ),
            (
                "GTEx_Analysis_v8_eQTL/Mystery_Tissue.v8.signif_variant_gene_pairs.txt.gz",
                mystery,
            ),
        ],
    );
}

/// Splicing archive: Liver with 2 rows, one sharing gene and variant with
/// the expression archive.
pub fn write_splicing_archive(path: &Path) {
    let liver = gz_member(&[
        pairs_row(V1, "chr1:497299:498399:clu_1:ENSG00000000001.5", "1e-9", "0.9"),
        pairs_row(V3, "chr1:600:700:clu_2:ENSG00000000004.2", "4e-6", "-0.2"),
    ]);
    write_archive(
        path,
        &[(
            "GTEx_Analysis_v8_sQTL/Liver.v8.sqtl_signifpairs.txt.gz",
            liver,
        )],
    );
}

/// Resolves every `ENSEMBL:` and `UBERON:` curie, and the `HGVS:` curies in
/// `variants`; returns `null` for everything else. Batches containing a key
/// from `failing` return an error.
#[derive(Default)]
pub struct MockNormalizer {
    pub node_calls: Mutex<Vec<Vec<String>>>,
    pub predicate_calls: Mutex<Vec<Vec<String>>>,
    pub variants: HashMap<String, String>,
    pub failing: BTreeSet<String>,
    pub omit: BTreeSet<String>,
}

impl MockNormalizer {
    pub fn node_call_count(&self) -> usize {
        self.node_calls.lock().unwrap().len()
    }

    pub fn submitted_keys(&self) -> Vec<String> {
        self.node_calls
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

pub fn record(id: &str, label: &str, types: &[&str], equivalents: &[&str]) -> NodeNormRecord {
    NodeNormRecord {
        id: IdentifierLabel {
            identifier: id.to_string(),
            label: Some(label.to_string()),
        },
        equivalent_identifiers: equivalents
            .iter()
            .map(|item| IdentifierLabel {
                identifier: item.to_string(),
                label: None,
            })
            .collect(),
        types: types.iter().map(|item| item.to_string()).collect(),
    }
}

impl NormalizationClient for MockNormalizer {
    fn lookup_nodes(
        &self,
        curies: &[String],
    ) -> Result<HashMap<String, Option<NodeNormRecord>>, KiraError> {
        self.node_calls.lock().unwrap().push(curies.to_vec());
        if curies.iter().any(|curie| self.failing.contains(curie)) {
            return Err(KiraError::NormalizationStatus {
                status: 500,
                message: "mock failure".to_string(),
            });
        }
        let mut mapping = HashMap::new();
        for curie in curies {
            if self.omit.contains(curie) {
                continue;
            }
            let resolved = if let Some(gene) = curie.strip_prefix("ENSEMBL:") {
                let canonical = format!("NCBIGene:{}", gene.trim_start_matches("ENSG"));
                let label = format!("GENE{}", gene.trim_start_matches("ENSG0"));
                Some(record(
                    &canonical,
                    &label,
                    &["biolink:Gene", "biolink:NamedThing"],
                    &[canonical.as_str(), curie.as_str()],
                ))
            } else if curie.starts_with("UBERON:") {
                Some(record(
                    curie,
                    "tissue",
                    &["biolink:AnatomicalEntity"],
                    &[curie.as_str()],
                ))
            } else {
                self.variants.get(curie).map(|canonical| {
                    record(
                        canonical,
                        "rs1",
                        &["biolink:SequenceVariant"],
                        &[canonical.as_str(), "DBSNP:rs1"],
                    )
                })
            };
            mapping.insert(curie.clone(), resolved);
        }
        Ok(mapping)
    }

    fn lookup_predicates(
        &self,
        predicates: &[String],
    ) -> Result<HashMap<String, Option<PredicateRecord>>, KiraError> {
        self.predicate_calls.lock().unwrap().push(predicates.to_vec());
        Ok(predicates
            .iter()
            .map(|predicate| {
                let resolved = match predicate.as_str() {
                    "CTD:increases_expression_of" => Some(PredicateRecord {
                        identifier: Some("RO:0003003".to_string()),
                        label: Some("increases_expression_of".to_string()),
                    }),
                    "CTD:decreases_expression_of" => Some(PredicateRecord {
                        identifier: Some("RO:0003002".to_string()),
                        label: Some("decreases_expression_of".to_string()),
                    }),
                    _ => None,
                };
                (predicate.clone(), resolved)
            })
            .collect())
    }
}

/// Copies archives prepared in `source` instead of downloading them.
pub struct MockDownloader {
    pub source: PathBuf,
    pub calls: Mutex<usize>,
    pub fail: bool,
}

impl MockDownloader {
    pub fn new(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            calls: Mutex::new(0),
            fail: false,
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl ArchiveDownloader for MockDownloader {
    fn fetch(
        &self,
        base_url: &str,
        files: &[String],
        dest_dir: &Path,
    ) -> Result<DownloadReport, KiraError> {
        *self.calls.lock().unwrap() += 1;
        let mut report = DownloadReport::default();
        for file in files {
            let destination = dest_dir.join(file);
            if self.fail && file.contains("sQTL") {
                return Err(KiraError::TransferExhausted {
                    url: format!("{base_url}/{file}"),
                    attempts: 4,
                    message: "connection reset".to_string(),
                });
            }
            fs::copy(self.source.join(file), &destination).unwrap();
            report.retrieved += 1;
            report.files.push(destination);
        }
        Ok(report)
    }
}
