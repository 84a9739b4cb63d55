use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::DatasetKind;

pub const SEQUENCE_VARIANT_CATEGORY: [&str; 5] = [
    "sequence_variant",
    "genomic_entity",
    "molecular_entity",
    "biological_entity",
    "named_thing",
];

pub const GENE_CATEGORY: [&str; 7] = [
    "gene",
    "gene_or_gene_product",
    "macromolecular_machine",
    "genomic_entity",
    "molecular_entity",
    "biological_entity",
    "named_thing",
];

/// One parsed row of a significant-pairs member.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAssociationRecord {
    pub tissue: String,
    pub variant_id: String,
    pub gene_id: String,
    pub p_value: f64,
    pub slope: f64,
}

/// Gene or anatomy node, in the KGX node layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KgxNode {
    pub id: String,
    #[serde(skip_serializing)]
    pub original_id: String,
    pub name: String,
    pub category: Vec<String>,
    pub equivalent_identifiers: Vec<String>,
}

impl KgxNode {
    pub fn gene(gene_id: &str) -> Self {
        let curie = format!("ENSEMBL:{gene_id}");
        Self {
            id: curie.clone(),
            original_id: gene_id.to_string(),
            name: gene_id.to_string(),
            category: GENE_CATEGORY.iter().map(|item| item.to_string()).collect(),
            equivalent_identifiers: vec![curie],
        }
    }

    /// Anatomy nodes start without a category; only normalization assigns one.
    pub fn anatomy(tissue: &str, uberon_id: &str) -> Self {
        let curie = format!("UBERON:{uberon_id}");
        Self {
            id: curie.clone(),
            original_id: tissue.to_string(),
            name: tissue.replace('_', " "),
            category: Vec::new(),
            equivalent_identifiers: vec![curie],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantNode {
    pub id: String,
    pub name: String,
    pub original_id: String,
    pub synonyms: BTreeSet<String>,
}

impl VariantNode {
    pub fn from_hgvs(raw_variant_id: &str, hgvs: &str) -> Self {
        Self {
            id: format!("HGVS:{hgvs}"),
            name: hgvs.to_string(),
            original_id: raw_variant_id.to_string(),
            synonyms: BTreeSet::new(),
        }
    }

    pub fn is_normalized(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Serialized shape of a variant node; borrowed so it never clones the synonyms.
#[derive(Debug, Serialize)]
pub struct VariantNodeOut<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub category: &'a [&'static str],
    pub equivalent_identifiers: &'a BTreeSet<String>,
}

impl<'a> From<&'a VariantNode> for VariantNodeOut<'a> {
    fn from(node: &'a VariantNode) -> Self {
        Self {
            id: &node.id,
            name: &node.name,
            category: &SEQUENCE_VARIANT_CATEGORY,
            equivalent_identifiers: &node.synonyms,
        }
    }
}

/// Association between a variant and a gene, with canonical ids for both
/// endpoints and the tissue.
#[derive(Debug, Clone, PartialEq)]
pub struct QtlEdge {
    pub kind: DatasetKind,
    pub anatomy_id: String,
    pub gene_id: String,
    pub variant_id: String,
    pub p_value: f64,
    pub slope: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PredicateKind {
    IncreasesExpression,
    DecreasesExpression,
    AffectsSplicing,
}

impl PredicateKind {
    pub const ALL: [PredicateKind; 3] = [
        PredicateKind::IncreasesExpression,
        PredicateKind::DecreasesExpression,
        PredicateKind::AffectsSplicing,
    ];

    /// Splicing edges always affect splicing; expression edges follow the sign of the slope.
    pub fn for_edge(kind: DatasetKind, slope: f64) -> Self {
        match kind {
            DatasetKind::Splicing => PredicateKind::AffectsSplicing,
            DatasetKind::Expression if slope > 0.0 => PredicateKind::IncreasesExpression,
            DatasetKind::Expression => PredicateKind::DecreasesExpression,
        }
    }

    pub fn local_name(&self) -> &'static str {
        match self {
            PredicateKind::IncreasesExpression => "increases_expression_of",
            PredicateKind::DecreasesExpression => "decreases_expression_of",
            PredicateKind::AffectsSplicing => "affects_splicing_of",
        }
    }

    pub fn template(&self) -> EdgeRecord {
        let local = self.local_name();
        EdgeRecord {
            subject: String::new(),
            predicate: format!("CTD:{local}"),
            edge_label: format!("biolink:{local}"),
            object: String::new(),
            relation: format!("CTD:{local}"),
            expressed_in: String::new(),
            p_value: 0.0,
            slope: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub subject: String,
    #[serde(skip_serializing)]
    pub predicate: String,
    pub edge_label: String,
    pub object: String,
    pub relation: String,
    pub expressed_in: String,
    pub p_value: f64,
    pub slope: f64,
}

/// Predicate labels for the three edge kinds, possibly rewritten by predicate
/// normalization.
#[derive(Debug, Clone)]
pub struct PredicateTable {
    templates: Vec<(PredicateKind, EdgeRecord)>,
}

impl Default for PredicateTable {
    fn default() -> Self {
        Self {
            templates: PredicateKind::ALL
                .iter()
                .map(|kind| (*kind, kind.template()))
                .collect(),
        }
    }
}

impl PredicateTable {
    pub fn templates_mut(&mut self) -> Vec<&mut EdgeRecord> {
        self.templates.iter_mut().map(|(_, edge)| edge).collect()
    }

    pub fn get(&self, kind: PredicateKind) -> Option<&EdgeRecord> {
        self.templates
            .iter()
            .find(|(candidate, _)| *candidate == kind)
            .map(|(_, edge)| edge)
    }

    pub fn build_edge(&self, edge: &QtlEdge) -> EdgeRecord {
        let kind = PredicateKind::for_edge(edge.kind, edge.slope);
        let mut record = self.get(kind).cloned().unwrap_or_else(|| kind.template());
        record.subject = edge.variant_id.clone();
        record.object = edge.gene_id.clone();
        record.expressed_in = edge.anatomy_id.clone();
        record.p_value = edge.p_value;
        record.slope = edge.slope;
        record
    }
}
