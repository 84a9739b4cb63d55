//! Conversion of GTEx variant ids into genomic HGVS expressions.

use crate::domain::VariantId;
use crate::error::KiraError;
use crate::reference::{DEFAULT_PATCH, chromosome_accession};

/// Encodes a raw variant id (`chr1_1413898_T_C_b38`) as a genomic HGVS
/// expression (`NC_000001.11:g.1413898T>C`).
pub fn encode(raw_variant_id: &str) -> Result<String, KiraError> {
    let variant: VariantId = raw_variant_id.parse()?;
    encode_variant(&variant).map_err(|err| match err {
        KiraError::UnsupportedVariant(_) => {
            KiraError::UnsupportedVariant(raw_variant_id.to_string())
        }
        KiraError::UnknownReference(_) => KiraError::UnknownReference(raw_variant_id.to_string()),
        KiraError::InvalidVariantId(_) => KiraError::InvalidVariantId(raw_variant_id.to_string()),
        other => other,
    })
}

/// The `HGVS:` curie used as the variant node id.
pub fn encode_curie(raw_variant_id: &str) -> Result<String, KiraError> {
    encode(raw_variant_id).map(|hgvs| format!("HGVS:{hgvs}"))
}

pub fn encode_variant(variant: &VariantId) -> Result<String, KiraError> {
    let accession = chromosome_accession(variant.build, DEFAULT_PATCH, variant.chromosome)
        .ok_or_else(|| {
            KiraError::UnknownReference(format!("{}:{}", variant.build, variant.chromosome))
        })?;
    let variation = describe_change(variant)?;
    Ok(format!("{accession}:g.{variation}"))
}

/// `position + delta`, rejecting coordinates past the end of `u64`.
fn shift(position: u64, delta: u64) -> Result<u64, KiraError> {
    position
        .checked_add(delta)
        .ok_or_else(|| KiraError::InvalidVariantId(format!("position {position} out of range")))
}

fn describe_change(variant: &VariantId) -> Result<String, KiraError> {
    let position = variant.position;
    let reference = variant.reference.as_str();
    let alternate = variant.alternate.as_str();
    let len_ref = reference.len() as u64;
    let len_alt = alternate.len() as u64;
    let unsupported = || KiraError::UnsupportedVariant(format!("{reference}>{alternate}"));

    if alternate == "." {
        if len_ref == 1 {
            return Ok(format!("{position}del"));
        }
        return Ok(format!("{position}_{}del", shift(position, len_ref - 1)?));
    }

    if alternate.starts_with('<') {
        return Err(unsupported());
    }

    if len_ref == 1 && len_alt == 1 {
        return Ok(format!("{position}{reference}>{alternate}"));
    }

    if len_alt > len_ref && alternate.starts_with(reference) {
        let diff = len_alt - len_ref;
        let offset = len_alt - diff;
        let inserted = alternate.get(offset as usize..).ok_or_else(unsupported)?;
        return Ok(format!(
            "{}_{}ins{inserted}",
            shift(position, offset - 1)?,
            shift(position, offset)?
        ));
    }

    if len_ref > len_alt && reference.starts_with(alternate) {
        let diff = len_ref - len_alt;
        let offset = len_ref - diff;
        let start = shift(position, offset)?;
        if diff == 1 {
            return Ok(format!("{start}del"));
        }
        return Ok(format!("{start}_{}del", shift(start, diff - 1)?));
    }

    Err(unsupported())
}
