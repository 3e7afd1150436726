use super::*;

const REV: &str = "0123456789abcdef0123456789abcdef01234567";

/// Strings already in canonical form: rendering the parse reproduces them.
const CANONICAL: &[&str] = &[
    "nixpkgs",
    "nixpkgs/release-23.11",
    "nixpkgs/release-23.11/0123456789abcdef0123456789abcdef01234567",
    "nixpkgs/0123456789abcdef0123456789abcdef01234567",
    "github:NixOS/nixpkgs",
    "github:NixOS/nixpkgs/release-23.11",
    "github:alice/proj/0123456789abcdef0123456789abcdef01234567",
    "github:NixOS/nixpkgs/release-23.11?rev=0123456789abcdef0123456789abcdef01234567",
    "git://example.org/repo.git",
    "git+https://example.org/repo.git",
    "git+ssh://git@example.org/repo.git?ref=main",
    "git+https://example.org/repo.git?ref=main&rev=0123456789abcdef0123456789abcdef01234567",
    "/home/alice/proj",
    "/home/alice/proj?ref=trunk",
    "./proj",
    "../elsewhere/proj",
];

#[test]
fn canonical_round_trip() -> anyhow::Result<()> {
    for s in CANONICAL {
        let parsed: FlakeRef = s.parse()?;
        assert_eq!(parsed.to_string(), *s, "rendering of {s}");
        let reparsed: FlakeRef = parsed.to_string().parse()?;
        assert_eq!(reparsed, parsed, "round trip of {s}");
    }
    Ok(())
}

#[test]
fn alternate_spellings_normalize() -> anyhow::Result<()> {
    // a pinned GitHub reference renders its revision as the third segment
    let query: FlakeRef = format!("github:alice/proj?rev={REV}").parse()?;
    let segment: FlakeRef = format!("github:alice/proj/{REV}").parse()?;
    assert_eq!(query, segment);
    assert_eq!(query.to_string(), format!("github:alice/proj/{REV}"));

    // file:// is sugar for a bare path
    let sugar: FlakeRef = "file:///tmp/proj".parse()?;
    assert_eq!(sugar, "/tmp/proj".parse()?);
    assert_eq!("file://./proj".parse::<FlakeRef>()?, "./proj".parse()?);

    // git+git:// collapses to the bare git scheme
    let nested: FlakeRef = "git+git://example.org/repo.git".parse()?;
    assert_eq!(nested.to_string(), "git://example.org/repo.git");

    // query parameters override path segments
    let both: FlakeRef = "github:alice/proj/unstable?ref=stable".parse()?;
    assert_eq!(both.r#ref.as_deref(), Some("stable"));
    Ok(())
}

#[test]
fn shapes_are_recognized() -> anyhow::Result<()> {
    assert!(matches!(
        "nixpkgs".parse::<FlakeRef>()?.data,
        FlakeRefData::Alias { .. }
    ));
    assert!(matches!(
        "github:NixOS/nixpkgs".parse::<FlakeRef>()?.data,
        FlakeRefData::GitHub { .. }
    ));
    assert!(matches!(
        "git://example.org/repo.git".parse::<FlakeRef>()?.data,
        FlakeRefData::Git { .. }
    ));
    assert!(matches!(
        "git+https://example.org/repo.git".parse::<FlakeRef>()?.data,
        FlakeRefData::Git { .. }
    ));
    assert!(matches!(
        "/tmp/proj".parse::<FlakeRef>()?.data,
        FlakeRefData::Path { .. }
    ));
    Ok(())
}

#[test]
fn predicates() -> anyhow::Result<()> {
    let alias: FlakeRef = "nixpkgs".parse()?;
    assert!(!alias.is_direct());
    assert!(!alias.is_immutable());

    let github: FlakeRef = "github:alice/proj".parse()?;
    assert!(github.is_direct());
    assert!(!github.is_immutable());

    let pinned: FlakeRef = format!("github:alice/proj/{REV}").parse()?;
    assert!(pinned.is_direct());
    assert!(pinned.is_immutable());

    let refined: FlakeRef = format!("github:alice/proj/trunk?rev={REV}").parse()?;
    let base = refined.base_ref();
    assert_eq!(base, "github:alice/proj".parse()?);
    assert!(base.r#ref.is_none() && base.rev.is_none());
    Ok(())
}

#[test]
fn rejects_malformed_references() {
    assert!(matches!(
        "github:alice".parse::<FlakeRef>(),
        Err(ParseError::Unrecognized(_))
    ));
    assert!(matches!(
        "".parse::<FlakeRef>(),
        Err(ParseError::Unrecognized(_))
    ));
    assert!(matches!(
        "1nvalid".parse::<FlakeRef>(),
        Err(ParseError::Unrecognized(_))
    ));
    assert!(matches!(
        "nixpkgs?foo=bar".parse::<FlakeRef>(),
        Err(ParseError::BadParam { .. })
    ));
    // a relative file:// remainder would render as an alias, so it is
    // rejected rather than mis-parsed
    assert!(matches!(
        "file://myproject".parse::<FlakeRef>(),
        Err(ParseError::Unrecognized(_))
    ));
    assert!(matches!(
        "github:alice/proj?rev=zznotahash".parse::<FlakeRef>(),
        Err(ParseError::BadRev(_))
    ));
    assert!(matches!(
        "nixpkgs/re!f".parse::<FlakeRef>(),
        Err(ParseError::BadRef(_))
    ));
}

#[test]
fn rev_validation() {
    assert!(REV.parse::<Rev>().is_ok());
    assert_eq!(REV.parse::<Rev>().unwrap().to_string(), REV);
    // too short, too long, not hex
    assert!("0123".parse::<Rev>().is_err());
    assert!(format!("{REV}ab").parse::<Rev>().is_err());
    assert!("zz23456789abcdef0123456789abcdef01234567".parse::<Rev>().is_err());
}

#[test]
fn id_validation() {
    assert!(FlakeId::try_from("nixpkgs".to_owned()).is_ok());
    assert!(FlakeId::try_from("home-manager_2".to_owned()).is_ok());
    assert!(FlakeId::try_from("".to_owned()).is_err());
    assert!(FlakeId::try_from("2fa".to_owned()).is_err());
    assert!(FlakeId::try_from("has space".to_owned()).is_err());
}
