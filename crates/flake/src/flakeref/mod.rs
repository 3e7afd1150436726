//! # Flake Reference Format
//!
//! This module provides parsing and handling of flake references, the
//! polymorphic addresses used to name flake and non-flake sources.
//!
//! ## Reference Forms
//!
//! A reference is one of four shapes:
//!
//! - **Alias** — a bare identifier resolved through the registries, e.g.
//!   `nixpkgs` or `nixpkgs/release-23.11`.
//! - **GitHub** — a hosted repository fetched as a tarball, e.g.
//!   `github:NixOS/nixpkgs`, `github:NixOS/nixpkgs/release-23.11` or
//!   `github:NixOS/nixpkgs/<40-hex-rev>`.
//! - **Git** — an arbitrary git URL fetched by cloning, e.g.
//!   `git://example.org/repo.git` or `git+https://example.org/repo.git`.
//! - **Path** — a local git checkout, e.g. `/home/alice/proj`, `./proj` or
//!   `file:///home/alice/proj`.
//!
//! Every form accepts the query refinements `?ref=NAME` and `?rev=HEX`, which
//! pin the reference to a branch (or tag) and to an exact commit respectively.
//! A reference carrying a `rev` is **immutable**: fetching it is reproducible.
//! Every form except an alias is **direct**: it can be fetched without
//! consulting a registry.
//!
//! ## Key Types
//!
//! - [`FlakeRef`] - A parsed reference with its optional refinements.
//! - [`FlakeRefData`] - The shape-specific payload of a reference.
//! - [`FlakeId`] - A validated alias or flake identifier.
//! - [`Rev`] - A validated 40-character hexadecimal commit hash.
//!
//! ## Canonical Form
//!
//! [`FlakeRef`] implements `Display` such that parsing the rendered string
//! yields a structurally equal reference. The renderer prefers path segments
//! over query parameters where the shape allows it; notably a pinned GitHub
//! reference without a branch renders its revision as the third path segment,
//! the form embedded in lock files.

use std::fmt::{self, Display};
use std::path::PathBuf;
use std::str::FromStr;

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::{all_consuming, map, opt, recognize, rest, verify};
use nom::sequence::{preceded, tuple};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
mod tests;

//================================================================================================
// Types
//================================================================================================

/// A validated flake identifier, used for aliases and flake names.
///
/// Identifiers start with an ASCII letter followed by letters, digits,
/// `_` or `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct FlakeId(String);

/// A parsed flake reference.
///
/// The shape-specific payload lives in [`FlakeRefData`]; the `ref` and `rev`
/// refinements apply uniformly to every shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlakeRef {
    /// The shape-specific payload.
    pub data: FlakeRefData,
    /// The requested branch or tag, if any.
    pub r#ref: Option<String>,
    /// The pinned commit hash, if any.
    pub rev: Option<Rev>,
}

/// The shape-specific payload of a [`FlakeRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlakeRefData {
    /// An indirect name, resolved through the registries.
    Alias {
        /// The alias identifier.
        id: FlakeId,
    },
    /// A repository hosted on GitHub, fetched via tarball archive.
    GitHub {
        /// The repository owner.
        owner: String,
        /// The repository name.
        repo: String,
    },
    /// An arbitrary git URL, fetched by cloning.
    Git {
        /// The clone URL, including its scheme.
        url: String,
    },
    /// A local directory containing a git checkout.
    Path {
        /// The directory path.
        path: PathBuf,
    },
}

/// An error encountered while validating a [`FlakeId`].
#[derive(Error, Debug, PartialEq, Eq)]
#[error("'{0}' is not a valid flake identifier")]
pub struct IdError(String);

/// An error encountered while parsing a [`FlakeRef`] from its string form.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The reference matched none of the known shapes.
    #[error("'{0}' is not a valid flake reference")]
    Unrecognized(String),
    /// A query parameter other than `ref` or `rev` was given.
    #[error("flake reference '{uri}' carries unsupported parameter '{param}'")]
    BadParam {
        /// The full reference string.
        uri: String,
        /// The offending parameter.
        param: String,
    },
    /// A `ref` refinement is not a valid branch or tag name.
    #[error("'{0}' is not a valid git ref name")]
    BadRef(String),
    /// A `rev` refinement is not a 40-character hex commit hash.
    #[error(transparent)]
    BadRev(#[from] RevError),
}

/// A validated SHA-1 commit hash, rendered as 40 hexadecimal characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rev([u8; 20]);

/// An error encountered while validating a [`Rev`].
#[derive(Error, Debug, PartialEq, Eq)]
#[error("'{0}' is not a 40-character hex commit hash")]
pub struct RevError(String);

/// The shape-specific payload before refinement validation.
enum RawData<'a> {
    Alias {
        id: &'a str,
        first: Option<&'a str>,
        second: Option<&'a str>,
    },
    GitHub {
        owner: &'a str,
        repo: &'a str,
        extra: Option<&'a str>,
    },
    Git {
        url: &'a str,
    },
    Path {
        path: &'a str,
    },
}

/// The raw parse result, prior to refinement validation.
struct RawRef<'a> {
    data: RawData<'a>,
    r#ref: Option<&'a str>,
    rev: Option<&'a str>,
}

//================================================================================================
// Impls
//================================================================================================

impl FlakeId {
    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FlakeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FlakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FlakeId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlakeId::try_from(s.to_owned())
    }
}

impl TryFrom<String> for FlakeId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let mut chars = s.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            },
            _ => false,
        };
        if valid { Ok(FlakeId(s)) } else { Err(IdError(s)) }
    }
}

impl FlakeRef {
    /// Constructs an alias reference without refinements.
    #[must_use]
    pub fn alias(id: FlakeId) -> Self {
        FlakeRefData::Alias { id }.into()
    }

    /// Constructs a GitHub reference without refinements.
    #[must_use]
    pub fn github(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        FlakeRefData::GitHub {
            owner: owner.into(),
            repo: repo.into(),
        }
        .into()
    }

    /// Constructs a git reference without refinements.
    #[must_use]
    pub fn git(url: impl Into<String>) -> Self {
        FlakeRefData::Git { url: url.into() }.into()
    }

    /// Constructs a local path reference without refinements.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        FlakeRefData::Path { path: path.into() }.into()
    }

    /// Returns the reference stripped of its `ref` and `rev` refinements.
    #[must_use]
    pub fn base_ref(&self) -> Self {
        FlakeRef {
            data: self.data.clone(),
            r#ref: None,
            rev: None,
        }
    }

    /// Returns the same reference with its branch refinement replaced.
    #[must_use]
    pub fn with_ref(mut self, r#ref: impl Into<String>) -> Self {
        self.r#ref = Some(r#ref.into());
        self
    }

    /// Returns the same reference with its commit refinement replaced.
    #[must_use]
    pub fn with_rev(mut self, rev: Rev) -> Self {
        self.rev = Some(rev);
        self
    }

    /// Whether fetching this reference is reproducible.
    #[must_use]
    pub fn is_immutable(&self) -> bool {
        self.rev.is_some()
    }

    /// Whether this reference can be fetched without consulting a registry.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        !matches!(self.data, FlakeRefData::Alias { .. })
    }
}

impl From<FlakeRefData> for FlakeRef {
    fn from(data: FlakeRefData) -> Self {
        FlakeRef {
            data,
            r#ref: None,
            rev: None,
        }
    }
}

impl Display for FlakeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            FlakeRefData::Alias { id } => {
                id.fmt(f)?;
                if let Some(r) = &self.r#ref {
                    write!(f, "/{r}")?;
                }
                if let Some(v) = &self.rev {
                    write!(f, "/{v}")?;
                }
                Ok(())
            },
            FlakeRefData::GitHub { owner, repo } => {
                write!(f, "github:{owner}/{repo}")?;
                match (&self.r#ref, &self.rev) {
                    (Some(r), Some(v)) => write!(f, "/{r}?rev={v}"),
                    (Some(r), None) => write!(f, "/{r}"),
                    (None, Some(v)) => write!(f, "/{v}"),
                    (None, None) => Ok(()),
                }
            },
            FlakeRefData::Git { url } => {
                if url.starts_with("git://") {
                    write!(f, "{url}")?;
                } else {
                    write!(f, "git+{url}")?;
                }
                query(f, &self.r#ref, &self.rev)
            },
            FlakeRefData::Path { path } => {
                write!(f, "{}", path.display())?;
                query(f, &self.r#ref, &self.rev)
            },
        }
    }
}

impl FromStr for FlakeRef {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = parse(s)?;
        FlakeRef::try_from(raw)
    }
}

impl TryFrom<&str> for FlakeRef {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl<'a> TryFrom<RawRef<'a>> for FlakeRef {
    type Error = ParseError;

    fn try_from(raw: RawRef<'a>) -> Result<Self, Self::Error> {
        let mut r#ref = None;
        let mut rev = None;

        let data = match raw.data {
            RawData::Alias { id, first, second } => {
                match (first, second) {
                    (Some(a), None) => match Rev::from_str(a) {
                        Ok(v) => rev = Some(v),
                        Err(_) => r#ref = Some(a),
                    },
                    (Some(a), Some(b)) => {
                        r#ref = Some(a);
                        rev = Some(b.parse()?);
                    },
                    _ => (),
                }
                // the identifier grammar already constrains the characters
                let id = FlakeId(id.to_owned());
                FlakeRefData::Alias { id }
            },
            RawData::GitHub { owner, repo, extra } => {
                if let Some(x) = extra {
                    match Rev::from_str(x) {
                        Ok(v) => rev = Some(v),
                        Err(_) => r#ref = Some(x),
                    }
                }
                FlakeRefData::GitHub {
                    owner: owner.to_owned(),
                    repo: repo.to_owned(),
                }
            },
            RawData::Git { url } => FlakeRefData::Git {
                url: url.to_owned(),
            },
            RawData::Path { path } => FlakeRefData::Path { path: path.into() },
        };

        // query parameters override path segments
        if let Some(r) = raw.r#ref {
            r#ref = Some(r);
        }
        if let Some(v) = raw.rev {
            rev = Some(v.parse()?);
        }

        if let Some(r) = &r#ref {
            if !valid_git_ref(r) {
                return Err(ParseError::BadRef((*r).to_owned()));
            }
        }

        Ok(FlakeRef {
            data,
            r#ref: r#ref.map(ToOwned::to_owned),
            rev,
        })
    }
}

impl Rev {
    /// Returns the raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Rev {
    type Err = RevError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(RevError(s.to_owned()));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| RevError(s.to_owned()))?;
        Ok(Rev(bytes))
    }
}

impl TryFrom<&[u8]> for Rev {
    type Error = RevError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes
            .try_into()
            .map(Rev)
            .map_err(|_| RevError(hex::encode(bytes)))
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Parses a body without its query into the raw shape.
fn body(input: &str) -> IResult<&str, RawData<'_>> {
    alt((github_body, git_body, path_body, alias_body))(input)
}

fn alias_body(input: &str) -> IResult<&str, RawData<'_>> {
    map(
        tuple((
            identifier,
            opt(preceded(tag("/"), segment)),
            opt(preceded(tag("/"), segment)),
        )),
        |(id, first, second)| RawData::Alias { id, first, second },
    )(input)
}

fn git_body(input: &str) -> IResult<&str, RawData<'_>> {
    alt((
        map(
            preceded(tag("git+"), verify(rest, |s: &str| s.contains("://"))),
            |url| RawData::Git { url },
        ),
        map(recognize(tuple((tag("git://"), rest))), |url| {
            RawData::Git { url }
        }),
    ))(input)
}

fn github_body(input: &str) -> IResult<&str, RawData<'_>> {
    map(
        tuple((
            tag("github:"),
            segment,
            tag("/"),
            segment,
            opt(preceded(tag("/"), segment)),
        )),
        |(_, owner, _, repo, extra)| RawData::GitHub { owner, repo, extra },
    )(input)
}

fn path_body(input: &str) -> IResult<&str, RawData<'_>> {
    // the path left after an optional file:// prefix must be absolute or
    // dot-prefixed, or it would render as an alias and not round-trip
    map(
        verify(preceded(opt(tag("file://")), rest), |s: &str| {
            s.starts_with('/')
                || s.starts_with("./")
                || s.starts_with("../")
                || s == "."
                || s == ".."
        }),
        |path| RawData::Path { path },
    )(input)
}

/// A flake identifier: an ASCII letter followed by letters, digits, `_` or `-`.
fn identifier(input: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
        |s: &str| s.starts_with(|c: char| c.is_ascii_alphabetic()),
    )(input)
}

/// A path segment: anything up to the next `/` or the query.
fn segment(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != '/' && c != '?')(input)
}

/// Splits off and validates the query, then parses the body.
fn parse(input: &str) -> Result<RawRef<'_>, ParseError> {
    let (body_str, params) = match input.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (input, None),
    };

    let (_, data) = all_consuming(body)(body_str)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| ParseError::Unrecognized(input.to_owned()))?;

    let mut r#ref = None;
    let mut rev = None;
    if let Some(params) = params {
        for pair in params.split('&') {
            match pair.split_once('=') {
                Some(("ref", v)) => r#ref = Some(v),
                Some(("rev", v)) => rev = Some(v),
                _ => {
                    return Err(ParseError::BadParam {
                        uri: input.to_owned(),
                        param: pair.to_owned(),
                    });
                },
            }
        }
    }

    Ok(RawRef { data, r#ref, rev })
}

/// Renders the `?ref=…&rev=…` query for shapes without segment refinements.
fn query(f: &mut fmt::Formatter<'_>, r#ref: &Option<String>, rev: &Option<Rev>) -> fmt::Result {
    match (r#ref, rev) {
        (Some(r), Some(v)) => write!(f, "?ref={r}&rev={v}"),
        (Some(r), None) => write!(f, "?ref={r}"),
        (None, Some(v)) => write!(f, "?rev={v}"),
        (None, None) => Ok(()),
    }
}

/// The branch and tag name subset accepted as a `ref` refinement.
fn valid_git_ref(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        },
        _ => false,
    }
}
