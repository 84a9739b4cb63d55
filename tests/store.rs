use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_qtl_kgx::domain::DatasetKind;
use kira_qtl_kgx::error::KiraError;
use kira_qtl_kgx::store::Store;

fn store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Store::new(root))
}

#[test]
fn guard_removes_archives_on_drop() {
    let (_temp, store) = store();
    store.ensure_scratch_dir().unwrap();
    let archive = store.archive_path(DatasetKind::Expression, 8);
    std::fs::write(archive.as_std_path(), b"tar").unwrap();

    {
        let _guard = store.archive_guard(vec![archive.clone()], false);
    }

    assert!(!archive.as_std_path().exists());
    assert!(!store.scratch_dir().as_std_path().exists());
}

#[test]
fn guard_keeps_archives_when_asked() {
    let (_temp, store) = store();
    store.ensure_scratch_dir().unwrap();
    let archive = store.archive_path(DatasetKind::Splicing, 8);
    std::fs::write(archive.as_std_path(), b"tar").unwrap();

    drop(store.archive_guard(vec![archive.clone()], true));

    assert!(archive.as_std_path().exists());
}

#[test]
fn output_is_only_visible_once_persisted() {
    let (_temp, store) = store();
    let dest = store.validate_output("gtex_kgx.json").unwrap();

    let mut temp = store.output_temp().unwrap();
    temp.write_all(b"{\"nodes\":[],\"edges\":[]}").unwrap();
    assert!(!dest.as_std_path().exists());
    Store::persist_output(temp, &dest).unwrap();

    assert!(dest.as_std_path().exists());
    assert_matches!(
        store.validate_output("gtex_kgx.json"),
        Err(KiraError::OutputExists(_))
    );
}

#[test]
fn abandoned_output_is_removed() {
    let (_temp, store) = store();
    {
        let mut temp = store.output_temp().unwrap();
        temp.write_all(b"{\"nodes\":[").unwrap();
    }
    let entries = std::fs::read_dir(store.output_dir().as_std_path())
        .unwrap()
        .count();
    assert_eq!(entries, 0);
}
