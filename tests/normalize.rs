mod common;

use std::collections::BTreeSet;

use assert_matches::assert_matches;

use common::MockNormalizer;
use kira_qtl_kgx::domain::DatasetKind;
use kira_qtl_kgx::model::{KgxNode, PredicateKind, PredicateTable, QtlEdge};
use kira_qtl_kgx::normalize::{CacheEntry, EntityNormalizer, NodeCache, PredicateCache};

fn genes(ids: &[&str]) -> Vec<KgxNode> {
    ids.iter().map(|id| KgxNode::gene(id)).collect()
}

#[test]
fn duplicate_ids_are_looked_up_once() {
    let normalizer = EntityNormalizer::new(MockNormalizer::default()).with_workers(1);
    let cache = NodeCache::new();
    let mut nodes = genes(&["ENSG1", "ENSG2", "ENSG1", "ENSG1"]);

    let failed = normalizer.normalize_nodes(&mut nodes, &cache);

    assert!(failed.is_empty());
    assert_eq!(normalizer.client().node_call_count(), 1);
    assert_eq!(normalizer.client().submitted_keys().len(), 2);
    assert!(nodes.iter().all(|node| node.id.starts_with("NCBIGene:")));
    assert_eq!(nodes[0].id, nodes[2].id);
    assert_eq!(nodes[0].original_id, "ENSG1");
    assert_eq!(nodes[0].category, vec!["biolink:Gene", "biolink:NamedThing"]);
}

#[test]
fn cached_keys_are_not_resubmitted() {
    let client = MockNormalizer {
        omit: BTreeSet::from(["ENSEMBL:ENSG2".to_string()]),
        ..MockNormalizer::default()
    };
    let normalizer = EntityNormalizer::new(client).with_workers(1);
    let cache = NodeCache::new();

    let mut first = genes(&["ENSG1", "ENSG2"]);
    let failed = normalizer.normalize_nodes(&mut first, &cache);
    assert_eq!(failed, BTreeSet::from(["ENSEMBL:ENSG2".to_string()]));
    assert_matches!(cache.get("ENSEMBL:ENSG2"), Some(CacheEntry::Unresolved));
    assert_eq!(first[1].id, "ENSEMBL:ENSG2");

    let mut second = genes(&["ENSG2", "ENSG1", "ENSG3"]);
    let failed = normalizer.normalize_nodes(&mut second, &cache);
    assert_eq!(failed, BTreeSet::from(["ENSEMBL:ENSG2".to_string()]));
    assert_eq!(normalizer.client().node_call_count(), 2);
    let submitted = normalizer.client().submitted_keys();
    assert_eq!(
        submitted.iter().filter(|key| *key == "ENSEMBL:ENSG2").count(),
        1
    );
    assert!(submitted.contains(&"ENSEMBL:ENSG3".to_string()));
}

#[test]
fn failed_chunk_degrades_to_unresolved() {
    let client = MockNormalizer {
        failing: BTreeSet::from(["ENSEMBL:ENSGBAD".to_string()]),
        ..MockNormalizer::default()
    };
    let normalizer = EntityNormalizer::new(client)
        .with_chunk_size(2)
        .with_workers(3);
    let cache = NodeCache::new();
    let mut nodes = genes(&["ENSG1", "ENSG2", "ENSG3", "ENSGBAD", "ENSG5", "ENSG6"]);

    let failed = normalizer.normalize_nodes(&mut nodes, &cache);

    assert_eq!(normalizer.client().node_call_count(), 3);
    assert_eq!(cache.len(), 6);
    assert_eq!(cache.unresolved_count(), 2);
    assert_eq!(failed.len(), 2);
    assert!(failed.contains("ENSEMBL:ENSGBAD"));
    let resolved = nodes
        .iter()
        .filter(|node| node.id.starts_with("NCBIGene:"))
        .count();
    assert_eq!(resolved, 4);
}

#[test]
fn injected_cache_skips_remote_calls() {
    let cache = NodeCache::from_entries([(
        "ENSEMBL:ENSG1".to_string(),
        CacheEntry::Resolved(common::record("NCBIGene:1", "A1BG", &["biolink:Gene"], &[])),
    )]);
    let normalizer = EntityNormalizer::new(MockNormalizer::default());
    let mut nodes = genes(&["ENSG1"]);

    let failed = normalizer.normalize_nodes(&mut nodes, &cache);

    assert!(failed.is_empty());
    assert_eq!(normalizer.client().node_call_count(), 0);
    assert_eq!(nodes[0].id, "NCBIGene:1");
    assert_eq!(nodes[0].name, "A1BG");
    // no equivalents returned, so the shell's list is kept
    assert_eq!(nodes[0].equivalent_identifiers, vec!["ENSEMBL:ENSG1"]);
}

#[test]
fn predicates_rewrite_relation_and_label() {
    let normalizer = EntityNormalizer::new(MockNormalizer::default());
    let cache = PredicateCache::new();
    let mut table = PredicateTable::default();

    let failed = normalizer.normalize_predicates(table.templates_mut(), &cache);

    assert_eq!(
        failed,
        BTreeSet::from(["CTD:affects_splicing_of".to_string()])
    );
    let increases = table.get(PredicateKind::IncreasesExpression).unwrap();
    assert_eq!(increases.relation, "RO:0003003");
    assert_eq!(increases.edge_label, "biolink:increases_expression_of");
    let splicing = table.get(PredicateKind::AffectsSplicing).unwrap();
    assert_eq!(splicing.relation, "CTD:affects_splicing_of");

    let edge = table.build_edge(&QtlEdge {
        kind: DatasetKind::Expression,
        anatomy_id: "UBERON:0002107".to_string(),
        gene_id: "NCBIGene:1".to_string(),
        variant_id: "HGVS:NC_000001.11:g.100A>C".to_string(),
        p_value: 1e-6,
        slope: -1.5,
    });
    assert_eq!(edge.relation, "RO:0003002");

    let again = normalizer.normalize_predicates(table.templates_mut(), &cache);
    assert_eq!(again.len(), 1);
    assert_eq!(
        normalizer.client().predicate_calls.lock().unwrap().len(),
        1
    );
}
