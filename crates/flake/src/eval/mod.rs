//! # Flake Metadata Evaluation
//!
//! A `flake.nix` is written in the Nix expression language, but the metadata
//! the resolver consumes is declarative: an attribute set of literals plus
//! one function (`provides`) that is handed to consumers unevaluated. This
//! module evaluates exactly that subset, using the `rnix` parser as its
//! front-end.
//!
//! Supported forms are attribute sets (including nested attribute paths),
//! string literals without interpolation, lists, integers, the boolean
//! identifiers, parentheses and lambdas. A lambda is not reduced; it is
//! captured as a [`Lambda`] handle carrying its source text and position.
//! Everything else is rejected with a positioned diagnostic rather than
//! silently skipped.
//!
//! Coercions ([`Value::require_attrs`], [`Value::require_string`],
//! [`Value::require_list`], [`Value::require_lambda`]) report the expected
//! and actual kind together with the source position, mirroring the
//! diagnostics of a full evaluator.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rnix::Root;
use rnix::ast::{self, HasEntry};
use rowan::ast::AstNode;
use thiserror::Error;

#[cfg(test)]
mod test;

//================================================================================================
// Types
//================================================================================================

/// An error encountered while evaluating flake metadata.
#[derive(Error, Debug)]
pub enum Error {
    /// The metadata file could not be read.
    #[error("could not read '{path}'")]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The metadata file is not syntactically valid Nix.
    #[error("syntax error in '{file}': {message}")]
    Syntax {
        /// The file that failed to parse.
        file: PathBuf,
        /// The parser's first complaint.
        message: String,
    },
    /// The metadata file contains no expression at all.
    #[error("'{file}' does not contain an expression")]
    Empty {
        /// The offending file.
        file: PathBuf,
    },
    /// The expression uses syntax outside the declarative metadata subset.
    #[error("{found} is not supported in flake metadata, at {pos}")]
    Unsupported {
        /// A description of the rejected construct.
        found: &'static str,
        /// Where it occurred.
        pos: Pos,
    },
    /// An attribute was defined twice.
    #[error("attribute '{attr}' defined more than once, at {pos}")]
    Duplicate {
        /// The attribute name.
        attr: String,
        /// Where the second definition occurred.
        pos: Pos,
    },
    /// A value had the wrong kind for the requested coercion.
    #[error("expected {expected}, found {found}, at {pos}")]
    Coercion {
        /// The kind the caller required.
        expected: &'static str,
        /// The kind actually present.
        found: &'static str,
        /// Where the value came from.
        pos: Pos,
    },
}

/// The payload of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// A string literal.
    String(String),
    /// An integer literal.
    Integer(i64),
    /// A boolean.
    Bool(bool),
    /// A list of values.
    List(Vec<Value>),
    /// An attribute set, keyed in sorted order.
    Attrs(BTreeMap<String, Value>),
    /// An unevaluated function.
    Lambda(Lambda),
    /// An unevaluated application of a function to an argument.
    App {
        /// The function.
        func: Box<Value>,
        /// The argument.
        arg: Box<Value>,
    },
    /// A reference to the enclosing attribute set.
    ///
    /// Used when constructing the dependency closure: each flake's `provides`
    /// is applied to the closure set itself, and the knot is tied by whatever
    /// evaluator consumes the value.
    SelfRef,
}

/// An unevaluated function captured from source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lambda {
    /// The verbatim source text of the function.
    pub text: String,
    /// Where the function was defined.
    pub pos: Pos,
}

/// A source position for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pos {
    /// The file the value came from; empty for constructed values.
    pub file: PathBuf,
    /// 1-based line, or 0 for constructed values.
    pub line: u32,
    /// 1-based column, or 0 for constructed values.
    pub column: u32,
}

/// An evaluated metadata value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// The payload.
    pub kind: Kind,
    /// Where the value came from.
    pub pos: Pos,
}

struct Lowerer<'a> {
    file: &'a Path,
    text: &'a str,
}

//================================================================================================
// Impls
//================================================================================================

impl Pos {
    /// The position used for values constructed by the resolver itself.
    #[must_use]
    pub fn synthetic() -> Self {
        Pos::default()
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "<generated>")
        } else {
            write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
        }
    }
}

impl Value {
    /// Constructs a synthetic string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Value {
            kind: Kind::String(s.into()),
            pos: Pos::synthetic(),
        }
    }

    /// Constructs a synthetic integer value.
    #[must_use]
    pub fn integer(i: i64) -> Self {
        Value {
            kind: Kind::Integer(i),
            pos: Pos::synthetic(),
        }
    }

    /// Constructs a synthetic attribute set.
    #[must_use]
    pub fn attrs(map: BTreeMap<String, Value>) -> Self {
        Value {
            kind: Kind::Attrs(map),
            pos: Pos::synthetic(),
        }
    }

    /// Constructs an unevaluated application node.
    #[must_use]
    pub fn app(func: Value, arg: Value) -> Self {
        Value {
            kind: Kind::App {
                func: Box::new(func),
                arg: Box::new(arg),
            },
            pos: Pos::synthetic(),
        }
    }

    /// Constructs a reference to the enclosing attribute set.
    #[must_use]
    pub fn self_ref() -> Self {
        Value {
            kind: Kind::SelfRef,
            pos: Pos::synthetic(),
        }
    }

    /// A short description of this value's kind, used in diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            Kind::String(_) => "a string",
            Kind::Integer(_) => "an integer",
            Kind::Bool(_) => "a boolean",
            Kind::List(_) => "a list",
            Kind::Attrs(_) => "an attribute set",
            Kind::Lambda(_) => "a function",
            Kind::App { .. } => "an application",
            Kind::SelfRef => "a self reference",
        }
    }

    /// Coerces to an attribute set.
    pub fn require_attrs(&self) -> Result<&BTreeMap<String, Value>, Error> {
        match &self.kind {
            Kind::Attrs(map) => Ok(map),
            _ => Err(self.coercion("an attribute set")),
        }
    }

    /// Coerces to a string.
    pub fn require_string(&self) -> Result<&str, Error> {
        match &self.kind {
            Kind::String(s) => Ok(s),
            _ => Err(self.coercion("a string")),
        }
    }

    /// Coerces to a list.
    pub fn require_list(&self) -> Result<&[Value], Error> {
        match &self.kind {
            Kind::List(items) => Ok(items),
            _ => Err(self.coercion("a list")),
        }
    }

    /// Coerces to an unevaluated function.
    pub fn require_lambda(&self) -> Result<&Lambda, Error> {
        match &self.kind {
            Kind::Lambda(lambda) => Ok(lambda),
            _ => Err(self.coercion("a function")),
        }
    }

    fn coercion(&self, expected: &'static str) -> Error {
        Error::Coercion {
            expected,
            found: self.kind_name(),
            pos: self.pos.clone(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, 0)
    }
}

impl<'a> Lowerer<'a> {
    fn pos(&self, node: &rnix::SyntaxNode) -> Pos {
        let offset = u32::from(node.text_range().start()) as usize;
        let mut line = 1;
        let mut column = 1;
        for c in self.text[..offset.min(self.text.len())].chars() {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Pos {
            file: self.file.to_owned(),
            line,
            column,
        }
    }

    fn lower(&self, expr: ast::Expr) -> Result<Value, Error> {
        let pos = self.pos(expr.syntax());
        match expr {
            ast::Expr::AttrSet(set) => self.lower_attrs(&set),
            ast::Expr::Str(s) => Ok(Value {
                kind: Kind::String(self.literal_string(&s)?),
                pos,
            }),
            ast::Expr::List(list) => {
                let mut items = Vec::new();
                for item in list.items() {
                    items.push(self.lower(item)?);
                }
                Ok(Value {
                    kind: Kind::List(items),
                    pos,
                })
            },
            ast::Expr::Lambda(lambda) => Ok(Value {
                kind: Kind::Lambda(Lambda {
                    text: lambda.syntax().text().to_string(),
                    pos: pos.clone(),
                }),
                pos,
            }),
            ast::Expr::Literal(lit) => match lit.kind() {
                ast::LiteralKind::Integer(i) => {
                    let value = i.value().map_err(|_| Error::Unsupported {
                        found: "this integer literal",
                        pos: pos.clone(),
                    })?;
                    Ok(Value {
                        kind: Kind::Integer(value),
                        pos,
                    })
                },
                _ => Err(Error::Unsupported {
                    found: "this literal",
                    pos,
                }),
            },
            ast::Expr::Ident(ident) => {
                let name = ident
                    .ident_token()
                    .map(|t| t.text().to_string())
                    .unwrap_or_default();
                match name.as_str() {
                    "true" => Ok(Value {
                        kind: Kind::Bool(true),
                        pos,
                    }),
                    "false" => Ok(Value {
                        kind: Kind::Bool(false),
                        pos,
                    }),
                    _ => Err(Error::Unsupported {
                        found: "an identifier reference",
                        pos,
                    }),
                }
            },
            ast::Expr::Paren(paren) => {
                let inner = paren.expr().ok_or(Error::Unsupported {
                    found: "an empty parenthesis",
                    pos: pos.clone(),
                })?;
                self.lower(inner)
            },
            _ => Err(Error::Unsupported {
                found: "this expression",
                pos,
            }),
        }
    }

    fn lower_attrs(&self, set: &ast::AttrSet) -> Result<Value, Error> {
        let pos = self.pos(set.syntax());
        if set.rec_token().is_some() {
            return Err(Error::Unsupported {
                found: "a recursive attribute set",
                pos,
            });
        }
        let mut map = BTreeMap::new();
        for entry in set.entries() {
            match entry {
                ast::Entry::Inherit(inherit) => {
                    return Err(Error::Unsupported {
                        found: "inherit",
                        pos: self.pos(inherit.syntax()),
                    });
                },
                ast::Entry::AttrpathValue(entry) => {
                    let entry_pos = self.pos(entry.syntax());
                    let path = entry.attrpath().ok_or(Error::Unsupported {
                        found: "an attribute without a name",
                        pos: entry_pos.clone(),
                    })?;
                    let names = path
                        .attrs()
                        .map(|attr| self.attr_name(attr))
                        .collect::<Result<Vec<_>, _>>()?;
                    let value = entry.value().ok_or(Error::Unsupported {
                        found: "an attribute without a value",
                        pos: entry_pos.clone(),
                    })?;
                    let value = self.lower(value)?;
                    insert_nested(&mut map, &names, value, &entry_pos)?;
                },
            }
        }
        Ok(Value {
            kind: Kind::Attrs(map),
            pos,
        })
    }

    fn attr_name(&self, attr: ast::Attr) -> Result<String, Error> {
        match attr {
            ast::Attr::Ident(ident) => Ok(ident
                .ident_token()
                .map(|t| t.text().to_string())
                .unwrap_or_default()),
            ast::Attr::Str(s) => self.literal_string(&s),
            ast::Attr::Dynamic(dynamic) => Err(Error::Unsupported {
                found: "a dynamic attribute name",
                pos: self.pos(dynamic.syntax()),
            }),
        }
    }

    fn literal_string(&self, s: &ast::Str) -> Result<String, Error> {
        let mut out = String::new();
        for part in s.normalized_parts() {
            match part {
                ast::InterpolPart::Literal(lit) => out.push_str(&lit),
                ast::InterpolPart::Interpolation(interpol) => {
                    return Err(Error::Unsupported {
                        found: "string interpolation",
                        pos: self.pos(interpol.syntax()),
                    });
                },
            }
        }
        Ok(out)
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Evaluates the metadata file at `path` into a [`Value`].
pub fn eval_file(path: &Path) -> Result<Value, Error> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_owned(),
        source,
    })?;
    let parse = Root::parse(&text);
    if let Some(error) = parse.errors().first() {
        return Err(Error::Syntax {
            file: path.to_owned(),
            message: error.to_string(),
        });
    }
    let expr = parse.tree().expr().ok_or(Error::Empty {
        file: path.to_owned(),
    })?;
    Lowerer { file: path, text: &text }.lower(expr)
}

fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match &value.kind {
        Kind::String(s) => write!(f, "{s:?}"),
        Kind::Integer(i) => write!(f, "{i}"),
        Kind::Bool(b) => write!(f, "{b}"),
        Kind::List(items) => {
            write!(f, "[")?;
            for item in items {
                write!(f, " ")?;
                fmt_value(item, f, depth)?;
            }
            write!(f, " ]")
        },
        Kind::Attrs(map) => {
            if map.is_empty() {
                return write!(f, "{{ }}");
            }
            writeln!(f, "{{")?;
            for (name, item) in map {
                write!(f, "{pad}  {name} = ")?;
                fmt_value(item, f, depth + 1)?;
                writeln!(f, ";")?;
            }
            write!(f, "{pad}}}")
        },
        Kind::Lambda(lambda) => write!(f, "«lambda at {}»", lambda.pos),
        Kind::App { func, arg } => {
            write!(f, "«application of ")?;
            fmt_value(func, f, depth)?;
            write!(f, " to ")?;
            fmt_value(arg, f, depth)?;
            write!(f, "»")
        },
        Kind::SelfRef => write!(f, "«self»"),
    }
}

fn insert_nested(
    map: &mut BTreeMap<String, Value>,
    names: &[String],
    value: Value,
    pos: &Pos,
) -> Result<(), Error> {
    match names {
        [] => Ok(()),
        [name] => {
            if map.insert(name.clone(), value).is_some() {
                return Err(Error::Duplicate {
                    attr: name.clone(),
                    pos: pos.clone(),
                });
            }
            Ok(())
        },
        [name, rest @ ..] => {
            let slot = map.entry(name.clone()).or_insert_with(|| Value {
                kind: Kind::Attrs(BTreeMap::new()),
                pos: pos.clone(),
            });
            match &mut slot.kind {
                Kind::Attrs(inner) => insert_nested(inner, rest, value, pos),
                _ => Err(Error::Duplicate {
                    attr: name.clone(),
                    pos: pos.clone(),
                }),
            }
        },
    }
}
