//! The boundary to the front end: syntax trees in, wires out.

pub mod ast;
pub mod env;

pub use ast::{Ast, Expr, Item, Param, ShardCall, Span, WireDecl};
pub use env::{Environment, eval_into, eval_wire};
