use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::error::KiraError;
use crate::model::VariantNode;
use crate::normalize::{EntityNormalizer, NodeCache, NormalizationClient};

pub const DEFAULT_VARIANT_CHUNK_SIZE: usize = 10_000;

/// Which collaborator enriches the sequence variant shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariantNormalization {
    #[default]
    NodeNorm,
    HgvsOnly,
}

impl VariantNormalization {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantNormalization::NodeNorm => "node-norm",
            VariantNormalization::HgvsOnly => "hgvs-only",
        }
    }

    pub fn parse(value: &str) -> Result<Self, KiraError> {
        match value {
            "node-norm" => Ok(VariantNormalization::NodeNorm),
            "hgvs-only" => Ok(VariantNormalization::HgvsOnly),
            other => Err(KiraError::ConfigParse(format!(
                "unknown variant normalization mode: {other}"
            ))),
        }
    }
}

/// Enriches a batch of variant shells in place. Each shell arrives with its
/// `HGVS:` curie as id; a shell left with an empty id has failed.
pub trait VariantNormalizer {
    /// Returns the lookup keys (`HGVS:` curies) that did not resolve.
    fn batch_normalize(
        &self,
        variants: &mut [VariantNode],
        cache: &NodeCache,
    ) -> Result<BTreeSet<String>, KiraError>;
}

/// Resolves HGVS curies through the node normalization service. Variants the
/// service does not know keep their HGVS curie as id and as their only synonym.
pub struct NodeNormVariantNormalizer<C> {
    normalizer: EntityNormalizer<C>,
}

impl<C: NormalizationClient> NodeNormVariantNormalizer<C> {
    pub fn new(normalizer: EntityNormalizer<C>) -> Self {
        Self { normalizer }
    }
}

impl<C: NormalizationClient> VariantNormalizer for NodeNormVariantNormalizer<C> {
    fn batch_normalize(
        &self,
        variants: &mut [VariantNode],
        cache: &NodeCache,
    ) -> Result<BTreeSet<String>, KiraError> {
        let unresolved = self.normalizer.normalize_nodes(variants, cache);
        let mut failed = BTreeSet::new();
        for variant in variants.iter_mut() {
            if unresolved.contains(&variant.id) {
                variant.synonyms.insert(variant.id.clone());
                failed.insert(variant.id.clone());
            }
        }
        Ok(failed)
    }
}

/// Keeps the HGVS curie as the canonical id.
#[derive(Debug, Clone, Copy, Default)]
pub struct HgvsOnlyNormalizer;

impl VariantNormalizer for HgvsOnlyNormalizer {
    fn batch_normalize(
        &self,
        variants: &mut [VariantNode],
        _cache: &NodeCache,
    ) -> Result<BTreeSet<String>, KiraError> {
        for variant in variants.iter_mut() {
            if variant.is_normalized() {
                variant.synonyms.insert(variant.id.clone());
            }
        }
        Ok(BTreeSet::new())
    }
}

/// Runs `normalizer` over `variants` in chunks of `chunk_size`, logging
/// progress every 200 000 variants.
pub fn normalize_in_chunks<V: VariantNormalizer + ?Sized>(
    normalizer: &V,
    variants: &mut [VariantNode],
    cache: &NodeCache,
    chunk_size: usize,
    cancel: &CancelFlag,
) -> Result<BTreeSet<String>, KiraError> {
    let total = variants.len();
    let chunk_size = chunk_size.max(1);
    let mut failed = BTreeSet::new();
    let mut done = 0usize;
    for chunk in variants.chunks_mut(chunk_size) {
        cancel.check()?;
        failed.extend(normalizer.batch_normalize(chunk, cache)?);
        let before = done;
        done += chunk.len();
        if done / 200_000 > before / 200_000 {
            tracing::info!(progress = done, total, "normalizing sequence variants");
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hgvs_only_keeps_curie() {
        let mut variants = vec![VariantNode::from_hgvs(
            "chr1_100_A_C_b38",
            "NC_000001.11:g.100A>C",
        )];
        let failed = HgvsOnlyNormalizer
            .batch_normalize(&mut variants, &NodeCache::new())
            .unwrap();
        assert!(failed.is_empty());
        assert_eq!(variants[0].id, "HGVS:NC_000001.11:g.100A>C");
        assert_eq!(variants[0].synonyms.len(), 1);
    }

    #[test]
    fn mode_names() {
        assert_eq!(
            VariantNormalization::parse("hgvs-only").unwrap(),
            VariantNormalization::HgvsOnly
        );
        assert!(VariantNormalization::parse("clingen").is_err());
        assert_eq!(VariantNormalization::NodeNorm.as_str(), "node-norm");
    }
}
