//! Evaluation environments: turn syntax trees into wires.

use crate::core::params::Parameterized;
use crate::core::registry::ShardRegistry;
use crate::core::shard::{Shard, ShardInstance};
use crate::core::types::Var;
use crate::core::wire::{SharedWire, Wire};
use crate::error::EvalError;
use crate::eval::ast::{Ast, Expr, Item, ShardCall, Span, WireDecl};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

/// Named wires and constants, plus the registry to instantiate units from.
///
/// A derived environment resolves names through its parent but defines new
/// ones locally.
#[derive(Clone)]
pub struct Environment {
    registry: Arc<ShardRegistry>,
    parent: Option<Arc<Environment>>,
    wires: HashMap<String, SharedWire>,
    defines: HashMap<String, Var>,
}

impl Environment {
    pub fn new(registry: Arc<ShardRegistry>) -> Self {
        Self {
            registry,
            parent: None,
            wires: HashMap::new(),
            defines: HashMap::new(),
        }
    }

    /// A child environment sharing `parent`'s registry.
    pub fn derive(parent: &Arc<Environment>) -> Self {
        Self {
            registry: parent.registry.clone(),
            parent: Some(parent.clone()),
            wires: HashMap::new(),
            defines: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    pub fn find_wire(&self, name: &str) -> Option<SharedWire> {
        match self.wires.get(name) {
            Some(wire) => Some(wire.clone()),
            None => self.parent.as_ref()?.find_wire(name),
        }
    }

    pub fn find_define(&self, name: &str) -> Option<Var> {
        match self.defines.get(name) {
            Some(value) => Some(value.clone()),
            None => self.parent.as_ref()?.find_define(name),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: Var) {
        self.defines.insert(name.into(), value);
    }

    pub fn add_wire(&mut self, wire: SharedWire) {
        let name = wire
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
            .to_string();
        self.wires.insert(name, wire);
    }

    /// Names of the wires defined locally, sorted.
    pub fn wire_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.wires.keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve(&self, expr: &Expr, owner: &str, span: Span) -> Result<Var, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => Ok(Var::ContextVar(name.clone())),
            Expr::Type(ty) => Ok(Var::Type(ty.clone())),
            Expr::Constant(name) => self
                .find_define(name)
                .ok_or_else(|| span.error(format!("Unknown constant: {name}"))),
            Expr::WireRef(name) => self
                .find_wire(name)
                .map(Var::Wire)
                .ok_or_else(|| span.error(format!("Unknown wire: {name}"))),
            Expr::Pipeline(calls) => {
                let mut wire = Wire::new(format!("{owner}-pipeline"));
                for call in calls {
                    wire.push(self.instantiate(call)?);
                }
                Ok(Var::Wire(wire.into_shared()))
            }
        }
    }

    fn instantiate(&self, call: &ShardCall) -> Result<ShardInstance, EvalError> {
        let mut shard = self
            .registry
            .create(&call.name)
            .ok_or_else(|| call.span.error(format!("Unknown shard: {}", call.name)))?;
        if !call.params.is_empty() {
            self.assign_params(shard.as_mut(), call)?;
        }
        Ok(ShardInstance::new(shard).at(call.span.line, call.span.column))
    }

    fn assign_params(&self, shard: &mut dyn Shard, call: &ShardCall) -> Result<(), EvalError> {
        let params: &mut dyn Parameterized = shard
            .as_parameterized()
            .ok_or_else(|| call.span.error(format!("{} takes no parameters", call.name)))?;

        for (position, param) in call.params.iter().enumerate() {
            let index = match &param.name {
                Some(name) => params.param_index(name).ok_or_else(|| {
                    call.span
                        .error(format!("{} has no parameter named {name}", call.name))
                })?,
                None => position,
            };
            let value = self.resolve(&param.value, &call.name, call.span)?;
            params
                .set_param(index, value)
                .map_err(|e| call.span.error(format!("{}: {e}", call.name)))?;
        }
        Ok(())
    }

    fn fill_wire(&self, wire: &SharedWire, decl: &WireDecl) -> Result<(), EvalError> {
        let mut instances = Vec::with_capacity(decl.shards.len());
        for call in &decl.shards {
            instances.push(self.instantiate(call)?);
        }
        let mut wire = wire.lock().unwrap_or_else(PoisonError::into_inner);
        for instance in instances {
            wire.push(instance);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("wires", &self.wire_names())
            .field("defines", &self.defines.keys().collect::<Vec<_>>())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Evaluates every declaration of `ast` into `env`.
///
/// Constants are bound first, in order. Wires are declared before any of
/// them is built, so they may reference each other regardless of order.
/// On error `env` is left untouched.
pub fn eval_into(env: &mut Environment, ast: &Ast) -> Result<(), EvalError> {
    let mut scratch = env.clone();

    for item in &ast.items {
        if let Item::Define { name, value, span } = item {
            let value = scratch.resolve(value, name, *span)?;
            scratch.define(name.clone(), value);
        }
    }

    let mut declared = Vec::new();
    for decl in ast.wires() {
        if declared.iter().any(|(name, _): &(String, SharedWire)| *name == decl.name) {
            return Err(decl.span.error(format!("Wire {} is declared twice", decl.name)));
        }
        let wire = Wire::new(decl.name.clone()).looped(decl.looped).into_shared();
        scratch.wires.insert(decl.name.clone(), wire.clone());
        declared.push((decl.name.clone(), wire));
    }

    for (decl, (_, wire)) in ast.wires().zip(&declared) {
        scratch.fill_wire(wire, decl)?;
        log::debug!("evaluated wire {} with {} shards", decl.name, decl.shards.len());
    }

    *env = scratch;
    Ok(())
}

/// Evaluates `ast` on top of `env` and returns the wire called `name`.
/// `env` itself is not modified.
pub fn eval_wire(env: &Environment, ast: &Ast, name: &str) -> Result<SharedWire, EvalError> {
    let mut scratch = env.clone();
    eval_into(&mut scratch, ast)?;
    scratch
        .wires
        .get(name)
        .cloned()
        .ok_or_else(|| EvalError::new(format!("Wire {name} is not declared"), 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TypeInfo;
    use crate::core::wire::WireState;
    use crate::eval::ast::Param;
    use crate::shards::default_registry;

    fn call(name: &str, params: Vec<Param>, line: u32) -> ShardCall {
        ShardCall {
            name: name.into(),
            params,
            span: Span::new(line, 1),
        }
    }

    fn positional(value: Expr) -> Param {
        Param { name: None, value }
    }

    fn env() -> Environment {
        Environment::new(Arc::new(default_registry()))
    }

    #[test]
    fn builds_runnable_wires_with_constants() {
        let ast = Ast {
            items: vec![
                Item::Define {
                    name: "step".into(),
                    value: Expr::Literal(Var::Int(3)),
                    span: Span::default(),
                },
                Item::Wire(WireDecl {
                    name: "main".into(),
                    shards: vec![
                        call("Input", vec![], 1),
                        call(
                            "Math.Add",
                            vec![Param {
                                name: Some("Operand".into()),
                                value: Expr::Constant("step".into()),
                            }],
                            2,
                        ),
                    ],
                    ..WireDecl::default()
                }),
            ],
        };
        let mut env = env();
        eval_into(&mut env, &ast).unwrap();
        assert_eq!(env.wire_names(), ["main"]);
        assert_eq!(env.find_define("step"), Some(Var::Int(3)));

        let wire = env.find_wire("main").unwrap();
        let mut wire = wire.lock().unwrap();
        assert_eq!(wire.shards()[1].location(), (2, 1));
        let result = wire.run_once(Var::Int(4)).unwrap();
        assert_eq!(result.state, WireState::Stopped);
        assert_eq!(result.output, Var::Int(7));
    }

    #[test]
    fn unknown_shard_reports_its_location() {
        let ast = Ast {
            items: vec![Item::Wire(WireDecl {
                name: "bad".into(),
                shards: vec![call("Pass", vec![], 1), call("Nope", vec![], 7)],
                ..WireDecl::default()
            })],
        };
        let mut env = env();
        let err = eval_into(&mut env, &ast).unwrap_err();
        assert_eq!(err.message, "Unknown shard: Nope");
        assert_eq!((err.line, err.column), (7, 1));
        assert!(env.wire_names().is_empty());
    }

    #[test]
    fn wires_may_reference_later_declarations() {
        let ast = Ast {
            items: vec![
                Item::Wire(WireDecl {
                    name: "outer".into(),
                    shards: vec![call("Do", vec![positional(Expr::WireRef("inner".into()))], 1)],
                    ..WireDecl::default()
                }),
                Item::Wire(WireDecl {
                    name: "inner".into(),
                    shards: vec![call("Math.Add", vec![positional(Expr::Literal(Var::Int(1)))], 2)],
                    ..WireDecl::default()
                }),
            ],
        };
        let wire = eval_wire(&env(), &ast, "outer").unwrap();
        let result = wire.lock().unwrap().run_once(Var::Int(1)).unwrap();
        assert_eq!(result.output, Var::Int(2));
    }

    #[test]
    fn pipelines_become_anonymous_sub_wires() {
        let ast = Ast {
            items: vec![Item::Wire(WireDecl {
                name: "main".into(),
                shards: vec![call(
                    "Do",
                    vec![positional(Expr::Pipeline(vec![
                        call("Math.Add", vec![positional(Expr::Literal(Var::Int(5)))], 1),
                        call("Set", vec![positional(Expr::Literal(Var::from("x")))], 1),
                    ]))],
                    1,
                )],
                ..WireDecl::default()
            })],
        };
        let wire = eval_wire(&env(), &ast, "main").unwrap();
        let mut wire = wire.lock().unwrap();
        assert_eq!(wire.run_once(Var::Int(1)).unwrap().output, Var::Int(6));
        let exposed = &wire.composed().unwrap().exposed;
        assert_eq!(exposed[0].name, "x");
        assert_eq!(exposed[0].exposed_type, TypeInfo::Int);
    }

    #[test]
    fn derived_environments_resolve_through_the_parent() {
        let mut root = env();
        root.define("limit", Var::Int(10));
        root.add_wire(Wire::new("shared").with_shard(crate::shards::core::Pass).into_shared());
        let root = Arc::new(root);

        let mut child = Environment::derive(&root);
        let ast = Ast {
            items: vec![Item::Wire(WireDecl {
                name: "local".into(),
                shards: vec![
                    call("Do", vec![positional(Expr::WireRef("shared".into()))], 1),
                    call("Math.Add", vec![positional(Expr::Constant("limit".into()))], 2),
                ],
                ..WireDecl::default()
            })],
        };
        eval_into(&mut child, &ast).unwrap();
        assert!(child.find_wire("shared").is_some());
        assert!(root.find_wire("local").is_none());
        let wire = child.find_wire("local").unwrap();
        assert_eq!(wire.lock().unwrap().run_once(Var::Int(5)).unwrap().output, Var::Int(15));
    }

    #[test]
    fn failed_evaluation_leaves_the_environment_untouched() {
        let mut env = env();
        env.define("limit", Var::Int(10));
        let kept = Wire::new("kept").with_shard(crate::shards::core::Pass).into_shared();
        env.add_wire(kept.clone());

        let ast = Ast {
            items: vec![
                Item::Define {
                    name: "limit".into(),
                    value: Expr::Literal(Var::Int(99)),
                    span: Span::default(),
                },
                Item::Define {
                    name: "extra".into(),
                    value: Expr::Literal(Var::Int(1)),
                    span: Span::default(),
                },
                Item::Wire(WireDecl {
                    name: "kept".into(),
                    shards: vec![call("Input", vec![], 3)],
                    ..WireDecl::default()
                }),
                Item::Wire(WireDecl {
                    name: "broken".into(),
                    shards: vec![call("Pass", vec![], 8), call("Nope", vec![], 9)],
                    ..WireDecl::default()
                }),
            ],
        };
        let err = eval_into(&mut env, &ast).unwrap_err();
        assert_eq!(err.line, 9);

        assert_eq!(env.wire_names(), ["kept"]);
        assert!(Arc::ptr_eq(&env.find_wire("kept").unwrap(), &kept));
        assert_eq!(kept.lock().unwrap().shards().len(), 1);
        assert_eq!(kept.lock().unwrap().shards()[0].name(), "Pass");
        assert_eq!(env.find_define("limit"), Some(Var::Int(10)));
        assert_eq!(env.find_define("extra"), None);
    }

    #[test]
    fn bad_parameters_are_rejected() {
        let ast = Ast {
            items: vec![Item::Wire(WireDecl {
                name: "main".into(),
                shards: vec![call(
                    "Math.Add",
                    vec![Param {
                        name: Some("Missing".into()),
                        value: Expr::Literal(Var::Int(1)),
                    }],
                    4,
                )],
                ..WireDecl::default()
            })],
        };
        let err = eval_wire(&env(), &ast, "main").unwrap_err();
        assert!(err.message.contains("no parameter named Missing"));
        assert_eq!(err.line, 4);

        let missing_wire = Ast::default();
        assert!(eval_wire(&env(), &missing_wire, "main").is_err());
    }
}
