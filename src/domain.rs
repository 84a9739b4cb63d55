use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

/// Which QTL archive a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Expression,
    Splicing,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Expression, DatasetKind::Splicing];

    pub fn short_name(&self) -> &'static str {
        match self {
            DatasetKind::Expression => "eqtl",
            DatasetKind::Splicing => "sqtl",
        }
    }

    pub fn archive_file_name(&self, gtex_version: u32) -> String {
        match self {
            DatasetKind::Expression => format!("GTEx_Analysis_v{gtex_version}_eQTL.tar"),
            DatasetKind::Splicing => format!("GTEx_Analysis_v{gtex_version}_sQTL.tar"),
        }
    }

    /// Suffix of the significant-pairs members inside the archive.
    pub fn member_suffix(&self) -> &'static str {
        match self {
            DatasetKind::Expression => "signif_variant_gene_pairs.txt.gz",
            DatasetKind::Splicing => "sqtl_signifpairs.txt.gz",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenomeBuild {
    B37,
    B38,
}

impl GenomeBuild {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenomeBuild::B37 => "b37",
            GenomeBuild::B38 => "b38",
        }
    }
}

impl fmt::Display for GenomeBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GenomeBuild {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "b37" => Ok(GenomeBuild::B37),
            "b38" => Ok(GenomeBuild::B38),
            _ => Err(KiraError::UnknownReference(value.to_string())),
        }
    }
}

/// A GTEx variant id such as `chr1_1413898_T_C_b38`, split into its fields.
///
/// Chromosomes X and Y are stored as 23 and 24, the numbering used by the
/// reference accession table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantId {
    pub chromosome: u8,
    pub position: u64,
    pub reference: String,
    pub alternate: String,
    pub build: GenomeBuild,
}

impl FromStr for VariantId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let body = trimmed.strip_prefix("chr").unwrap_or(trimmed);
        let parts = body.split('_').collect::<Vec<_>>();
        let [chromosome, position, reference, alternate, build] = parts.as_slice() else {
            return Err(KiraError::InvalidVariantId(value.to_string()));
        };

        let build: GenomeBuild = build
            .parse()
            .map_err(|_| KiraError::UnknownReference(value.to_string()))?;
        let chromosome = match *chromosome {
            "X" => 23,
            "Y" => 24,
            other => other
                .parse::<u8>()
                .map_err(|_| KiraError::UnknownReference(value.to_string()))?,
        };
        let position = position
            .parse::<u64>()
            .map_err(|_| KiraError::InvalidVariantId(value.to_string()))?;
        if reference.is_empty()
            || alternate.is_empty()
            || !reference.is_ascii()
            || !alternate.is_ascii()
        {
            return Err(KiraError::InvalidVariantId(value.to_string()));
        }

        Ok(Self {
            chromosome,
            position,
            reference: reference.to_string(),
            alternate: alternate.to_string(),
            build,
        })
    }
}

/// Removes the `.N` version suffix from an Ensembl gene id.
pub fn strip_version(gene_id: &str) -> &str {
    gene_id.split('.').next().unwrap_or(gene_id)
}
