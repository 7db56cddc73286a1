//! Parsed front-end syntax, as handed over by a parser.

use crate::core::types::{TypeInfo, Var};
use crate::error::EvalError;
use serde::{Deserialize, Serialize};

/// Source location of a declaration. Lines and columns start at 1; zero
/// means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::new(message, self.line, self.column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Item {
    Wire(WireDecl),
    /// A named constant, usable from parameters of later declarations.
    Define {
        name: String,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireDecl {
    pub name: String,
    #[serde(default)]
    pub looped: bool,
    #[serde(default)]
    pub shards: Vec<ShardCall>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardCall {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub span: Span,
}

/// A parameter assignment. Unnamed parameters are positional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Expr {
    Literal(Var),
    /// A variable reference, resolved when the wire warms up.
    Variable(String),
    /// An anonymous sub-wire.
    Pipeline(Vec<ShardCall>),
    /// A wire declared in the environment.
    WireRef(String),
    /// A name bound by `Define`.
    Constant(String),
    Type(TypeInfo),
}

impl Ast {
    /// Parses a JSON-serialized syntax tree. Syntax errors carry the JSON
    /// line and column.
    pub fn from_json(json: &str) -> Result<Self, EvalError> {
        serde_json::from_str(json)
            .map_err(|e| EvalError::new(e.to_string(), e.line() as u32, e.column() as u32))
    }

    pub fn to_json(&self) -> Result<String, EvalError> {
        serde_json::to_string_pretty(self).map_err(|e| EvalError::new(e.to_string(), 0, 0))
    }

    pub fn wires(&self) -> impl Iterator<Item = &WireDecl> {
        self.items.iter().filter_map(|item| match item {
            Item::Wire(decl) => Some(decl),
            Item::Define { .. } => None,
        })
    }
}
