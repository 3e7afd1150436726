use std::fs;

use super::*;

fn fixture(dir: &Path) -> PathBuf {
    let src = dir.join("src");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("flake.nix"), "{ }").unwrap();
    fs::write(src.join("sub/data"), "payload").unwrap();
    src
}

#[test]
fn insertion_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = LocalStore::open(dir.path().join("store"))?;
    let src = fixture(dir.path());

    let first = store.add_path(&src, "source")?;
    let second = store.add_path(&src, "source")?;
    assert_eq!(first, second);
    assert!(first.starts_with(store.root()));
    assert!(first.join("sub/data").exists());
    Ok(())
}

#[test]
fn content_changes_the_address() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = LocalStore::open(dir.path().join("store"))?;
    let src = fixture(dir.path());

    let before = store.add_path(&src, "source")?;
    fs::write(src.join("sub/data"), "different payload")?;
    let after = store.add_path(&src, "source")?;
    assert_ne!(before, after);
    Ok(())
}

#[test]
fn foreign_paths_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = LocalStore::open(dir.path().join("store"))?;
    let src = fixture(dir.path());

    let inserted = store.add_path(&src, "source")?;
    store.assert_store_path(&inserted)?;

    let err = store.assert_store_path(&src).unwrap_err();
    assert!(matches!(err, StoreError::NotInStore(_)));

    // a path under the root that was never inserted does not pass either
    let missing = store.root().join("does-not-exist");
    assert!(store.assert_store_path(&missing).is_err());
    Ok(())
}

#[test]
fn allow_list_records_paths() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = LocalStore::open(dir.path().join("store"))?;
    let src = fixture(dir.path());

    let inserted = store.add_path(&src, "source")?;
    assert!(store.allowed_paths().is_empty());
    store.insert_allowed_path(&inserted);
    store.insert_allowed_path(&inserted);
    assert_eq!(store.allowed_paths(), vec![inserted]);
    Ok(())
}
