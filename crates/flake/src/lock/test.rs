use std::fs;

use super::*;

const REV1: &str = "1111111111111111111111111111111111111111";
const REV2: &str = "2222222222222222222222222222222222222222";
const REV3: &str = "3333333333333333333333333333333333333333";

fn id(s: &str) -> FlakeId {
    FlakeId::try_from(s.to_owned()).unwrap()
}

fn r(s: &str) -> FlakeRef {
    s.parse().unwrap()
}

/// A two-level closure: the root pins flake `beta` and non-flake `support`;
/// `beta` itself pins flake `gamma`.
fn sample() -> LockFile {
    let gamma = FlakeEntry {
        r#ref: r(&format!("github:alice/gamma/{REV3}")),
        flake_entries: BTreeMap::new(),
        non_flake_entries: BTreeMap::new(),
    };
    let beta = FlakeEntry {
        r#ref: r(&format!("github:alice/beta/{REV1}")),
        flake_entries: [(id("gamma"), gamma)].into_iter().collect(),
        non_flake_entries: BTreeMap::new(),
    };
    LockFile {
        flake_entries: [(id("beta"), beta)].into_iter().collect(),
        non_flake_entries: [(id("support"), r(&format!("github:alice/support/{REV2}")))]
            .into_iter()
            .collect(),
    }
}

#[test]
fn write_then_read_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flake.lock");

    let lock = sample();
    lock.write(&path)?;
    assert_eq!(LockFile::read(&path)?, lock);
    Ok(())
}

#[test]
fn serialization_is_reproducible() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flake.lock");

    let lock = sample();
    lock.write(&path)?;
    let first = fs::read(&path)?;

    LockFile::read(&path)?.write(&path)?;
    let second = fs::read(&path)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn the_canonical_shape_is_emitted() -> anyhow::Result<()> {
    let text = String::from_utf8(sample().to_json_bytes()?)?;

    assert!(text.contains("\"version\": 1"));
    // 4-space indentation, keys in sorted order
    assert!(text.contains("    \"nonFlakeRequires\""));
    assert!(text.contains("    \"requires\""));
    assert!(text.contains(&format!("\"uri\": \"github:alice/beta/{REV1}\"")));
    assert!(text.contains(&format!("\"uri\": \"github:alice/support/{REV2}\"")));
    // empty nested maps are omitted from entries
    assert!(!text.contains("\"requires\": {}"));
    Ok(())
}

#[test]
fn missing_file_is_an_empty_lock() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let lock = LockFile::read(&dir.path().join("flake.lock"))?;
    assert!(lock.is_empty());
    Ok(())
}

#[test]
fn mutable_references_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flake.lock");
    fs::write(
        &path,
        r#"{
    "version": 1,
    "nonFlakeRequires": {},
    "requires": {
        "beta": {
            "uri": "github:alice/beta"
        }
    }
}"#,
    )?;

    let err = LockFile::read(&path).unwrap_err();
    assert!(matches!(err, Error::MutableRef(_)));
    assert!(err.to_string().contains("github:alice/beta"));
    Ok(())
}

#[test]
fn unsupported_version_names_the_path() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flake.lock");
    fs::write(&path, r#"{"version": 3, "nonFlakeRequires": {}, "requires": {}}"#)?;

    let err = LockFile::read(&path).unwrap_err();
    assert!(matches!(err, Error::VersionMismatch { version: 3, .. }));
    assert!(err.to_string().contains("flake.lock"));
    Ok(())
}
