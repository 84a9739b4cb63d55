//! Fixed lookup tables: GTEx tissue labels to UBERON ids and genome builds
//! to RefSeq chromosome accessions.

use crate::domain::GenomeBuild;

/// Patch level used for every accession lookup.
pub const DEFAULT_PATCH: &str = "p1";

/// Tissue label (as used in GTEx member file names) to UBERON local id.
pub static TISSUES: &[(&str, &str)] = &[
    ("Adipose_Subcutaneous", "0002190"),
    ("Adipose_Visceral_Omentum", "0003688"),
    ("Adrenal_Gland", "0018303"),
    ("Artery_Aorta", "0004178"),
    ("Artery_Coronary", "0002111"),
    ("Artery_Tibial", "0007610"),
    ("Brain_Amygdala", "0001876"),
    ("Brain_Anterior_cingulate_cortex_BA24", "0006101"),
    ("Brain_Caudate_basal_ganglia", "0002420"),
    ("Brain_Cerebellar_Hemisphere", "0002245"),
    ("Brain_Cerebellum", "0002037"),
    ("Brain_Cortex", "0001851"),
    ("Brain_Frontal_Cortex_BA9", "0013540"),
    ("Brain_Hippocampus", "0002310"),
    ("Brain_Hypothalamus", "0001898"),
    ("Brain_Nucleus_accumbens_basal_ganglia", "0001882"),
    ("Brain_Putamen_basal_ganglia", "0001874"),
    ("Brain_Spinal_cord_cervical_c-1", "0002726"),
    ("Brain_Substantia_nigra", "0002038"),
    ("Breast_Mammary_Tissue", "0001911"),
    ("Cells_Cultured_fibroblasts", "0015764"),
    ("Cells_EBV-transformed_lymphocytes", "0001744"),
    ("Colon_Sigmoid", "0001159"),
    ("Colon_Transverse", "0001157"),
    ("Esophagus_Gastroesophageal_Junction", "0007650"),
    ("Esophagus_Mucosa", "0002469"),
    ("Esophagus_Muscularis", "0004648"),
    ("Heart_Atrial_Appendage", "0006618"),
    ("Heart_Left_Ventricle", "0002084"),
    ("Kidney_Cortex", "0001225"),
    ("Liver", "0002107"),
    ("Lung", "0002048"),
    ("Minor_Salivary_Gland", "0001830"),
    ("Muscle_Skeletal", "0001134"),
    ("Nerve_Tibial", "0001323"),
    ("Ovary", "0000992"),
    ("Pancreas", "0001264"),
    ("Pituitary", "0000007"),
    ("Prostate", "0002367"),
    ("Skin_Not_Sun_Exposed_Suprapubic", "0036149"),
    ("Skin_Sun_Exposed_Lower_leg", "0004264"),
    ("Small_Intestine_Terminal_Ileum", "0002116"),
    ("Spleen", "0002106"),
    ("Stomach", "0000945"),
    ("Testis", "0000473"),
    ("Thyroid", "0002046"),
    ("Uterus", "0000995"),
    ("Vagina", "0000996"),
    ("Whole_Blood", "0000178"),
];

// Index 0 is chromosome 1; 22 and 23 are X and Y.
static B37_P1: [&str; 24] = [
    "NC_000001.10",
    "NC_000002.11",
    "NC_000003.11",
    "NC_000004.11",
    "NC_000005.9",
    "NC_000006.11",
    "NC_000007.13",
    "NC_000008.10",
    "NC_000009.11",
    "NC_000010.10",
    "NC_000011.9",
    "NC_000012.11",
    "NC_000013.10",
    "NC_000014.8",
    "NC_000015.9",
    "NC_000016.9",
    "NC_000017.10",
    "NC_000018.9",
    "NC_000019.9",
    "NC_000020.10",
    "NC_000021.8",
    "NC_000022.10",
    "NC_000023.10",
    "NC_000024.9",
];

static B38_P1: [&str; 24] = [
    "NC_000001.11",
    "NC_000002.12",
    "NC_000003.12",
    "NC_000004.12",
    "NC_000005.10",
    "NC_000006.12",
    "NC_000007.14",
    "NC_000008.11",
    "NC_000009.12",
    "NC_000010.11",
    "NC_000011.10",
    "NC_000012.12",
    "NC_000013.11",
    "NC_000014.9",
    "NC_000015.10",
    "NC_000016.10",
    "NC_000017.11",
    "NC_000018.10",
    "NC_000019.10",
    "NC_000020.11",
    "NC_000021.9",
    "NC_000022.11",
    "NC_000023.11",
    "NC_000024.10",
];

pub fn tissue_uberon_id(tissue: &str) -> Option<&'static str> {
    TISSUES
        .iter()
        .find(|(label, _)| *label == tissue)
        .map(|(_, id)| *id)
}

pub fn tissue_curie(tissue: &str) -> Option<String> {
    tissue_uberon_id(tissue).map(|id| format!("UBERON:{id}"))
}

/// RefSeq accession for a chromosome (1-24) of the given build and patch.
pub fn chromosome_accession(
    build: GenomeBuild,
    patch: &str,
    chromosome: u8,
) -> Option<&'static str> {
    let table = match (build, patch) {
        (GenomeBuild::B37, "p1") => &B37_P1,
        (GenomeBuild::B38, "p1") => &B38_P1,
        _ => return None,
    };
    let index = usize::from(chromosome).checked_sub(1)?;
    table.get(index).copied()
}
