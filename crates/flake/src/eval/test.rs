use std::fs;
use std::path::PathBuf;

use super::*;

fn eval_str(dir: &Path, text: &str) -> Result<Value, Error> {
    let path = dir.join("flake.nix");
    fs::write(&path, text).unwrap();
    eval_file(&path)
}

const METADATA: &str = r#"{
  name = "alpha";
  description = "top-level test flake";
  requires = [ "github:alice/beta" "nixpkgs" ];
  nonFlakeRequires = {
    support = "github:alice/support";
  };
  provides = deps: {
    hello = deps.beta.outPath;
  };
  meta.license = "mit";
  epoch = 2023;
  experimental = true;
}"#;

#[test]
fn lowers_the_metadata_subset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = eval_str(dir.path(), METADATA)?;
    let attrs = value.require_attrs()?;

    assert_eq!(attrs["name"].require_string()?, "alpha");
    assert_eq!(
        attrs["description"].require_string()?,
        "top-level test flake"
    );

    let requires = attrs["requires"].require_list()?;
    let names = requires
        .iter()
        .map(|v| v.require_string())
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(names, vec!["github:alice/beta", "nixpkgs"]);

    let non_flake = attrs["nonFlakeRequires"].require_attrs()?;
    assert_eq!(non_flake["support"].require_string()?, "github:alice/support");

    let lambda = attrs["provides"].require_lambda()?;
    assert!(lambda.text.starts_with("deps:"));

    // nested attribute paths land as nested sets
    let meta = attrs["meta"].require_attrs()?;
    assert_eq!(meta["license"].require_string()?, "mit");

    assert_eq!(attrs["epoch"].kind, Kind::Integer(2023));
    assert_eq!(attrs["experimental"].kind, Kind::Bool(true));
    Ok(())
}

#[test]
fn positions_point_into_the_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = eval_str(dir.path(), METADATA)?;
    let attrs = value.require_attrs()?;

    // `name` is defined on line 2
    assert_eq!(attrs["name"].pos.line, 2);
    assert!(attrs["name"].pos.file.ends_with("flake.nix"));
    Ok(())
}

#[test]
fn coercion_errors_name_kind_and_position() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let value = eval_str(dir.path(), METADATA)?;
    let attrs = value.require_attrs()?;

    let err = attrs["requires"].require_string().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("expected a string"), "{message}");
    assert!(message.contains("found a list"), "{message}");
    assert!(message.contains("flake.nix:4"), "{message}");
    Ok(())
}

#[test]
fn interpolation_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let err = eval_str(dir.path(), "{ name = \"a${toString 1}\"; }").unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
    assert!(err.to_string().contains("interpolation"));
    Ok(())
}

#[test]
fn references_and_inherit_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(matches!(
        eval_str(dir.path(), "{ name = someVariable; }").unwrap_err(),
        Error::Unsupported { .. }
    ));
    assert!(matches!(
        eval_str(dir.path(), "{ inherit name; }").unwrap_err(),
        Error::Unsupported { .. }
    ));
    Ok(())
}

#[test]
fn recursive_attrsets_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let err = eval_str(dir.path(), "rec { name = \"a\"; }").unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
    assert!(err.to_string().contains("recursive"));

    // nested recursive sets are rejected too
    let err = eval_str(dir.path(), "{ meta = rec { license = \"mit\"; }; }").unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
    Ok(())
}

#[test]
fn duplicate_attributes_are_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let err = eval_str(dir.path(), "{ name = \"a\"; name = \"b\"; }").unwrap_err();
    assert!(matches!(err, Error::Duplicate { .. }));
    Ok(())
}

#[test]
fn syntax_errors_are_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let err = eval_str(dir.path(), "{ name = ; }").unwrap_err();
    assert!(matches!(err, Error::Syntax { .. }));
    Ok(())
}

#[test]
fn missing_files_fail_to_read() {
    let err = eval_file(&PathBuf::from("/does/not/exist/flake.nix")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn constructed_values_render() {
    let mut entry = std::collections::BTreeMap::new();
    entry.insert("outPath".to_owned(), Value::string("/store/x"));
    entry.insert("revCount".to_owned(), Value::integer(12));
    entry.insert(
        "provides".to_owned(),
        Value::app(
            Value {
                kind: Kind::Lambda(Lambda {
                    text: "deps: { }".into(),
                    pos: Pos::synthetic(),
                }),
                pos: Pos::synthetic(),
            },
            Value::self_ref(),
        ),
    );
    let rendered = Value::attrs(entry).to_string();
    assert!(rendered.contains("outPath = \"/store/x\""), "{rendered}");
    assert!(rendered.contains("revCount = 12"), "{rendered}");
    assert!(rendered.contains("«self»"), "{rendered}");
}
