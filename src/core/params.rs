//! Parameter declarations and the compose-time parameter binder.

use crate::core::compose::{InstanceData, compose_shared};
use crate::core::context::Context;
use crate::core::scope::VarSlot;
use crate::core::shard::ShardInstance;
use crate::core::types::{ExposedTypeInfo, TypeInfo, Var, derive_type_info, match_types};
use crate::error::{ActivationError, ComposeError, ParamError};

/// Declaration of one parameter of a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: &'static str,
    pub help: &'static str,
    pub types: Vec<TypeInfo>,
}

impl ParameterInfo {
    pub fn new(name: &'static str, help: &'static str, types: Vec<TypeInfo>) -> Self {
        Self { name, help, types }
    }

    /// Whether `value` may be assigned. Variable references and nested wires
    /// are accepted when the declaration lists a `ContextVar` or `Wire` type;
    /// their full check happens at composition.
    pub fn accepts(&self, value: &Var) -> bool {
        match value {
            Var::ContextVar(_) => self.types.iter().any(|t| matches!(t, TypeInfo::ContextVar(_))),
            Var::Wire(_) => self.types.contains(&TypeInfo::Wire),
            literal => {
                let ty = derive_type_info(literal);
                self.types
                    .iter()
                    .filter(|t| !matches!(t, TypeInfo::ContextVar(_)))
                    .any(|t| match_types(&ty, t))
            }
        }
    }

    pub fn check(&self, value: &Var) -> Result<(), ParamError> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(ParamError::InvalidValue {
                name: self.name.to_string(),
                found: format!("{}", derive_type_info(value)),
            })
        }
    }
}

/// Units with declared parameters.
pub trait Parameterized {
    fn parameters(&self) -> Vec<ParameterInfo>;

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError>;

    fn get_param(&self, index: usize) -> Var;

    fn param_index(&self, name: &str) -> Option<usize> {
        self.parameters().iter().position(|p| p.name == name)
    }
}

/// A parameter value that is either a literal or a variable reference
/// resolved at warmup.
#[derive(Debug, Clone, Default)]
pub struct ParamVar {
    value: Var,
    slot: Option<VarSlot>,
}

impl ParamVar {
    pub fn new(value: Var) -> Self {
        Self { value, slot: None }
    }

    /// The value as assigned, before resolution.
    pub fn value(&self) -> &Var {
        &self.value
    }

    pub fn set(&mut self, value: Var) {
        self.value = value;
        self.slot = None;
    }

    pub fn variable_name(&self) -> Option<&str> {
        match &self.value {
            Var::ContextVar(name) => Some(name),
            _ => None,
        }
    }

    pub fn warmup(&mut self, context: &Context<'_>) -> Result<(), ActivationError> {
        if let Var::ContextVar(name) = &self.value {
            let slot = context
                .find_variable(name)
                .ok_or_else(|| ActivationError::MissingVariable(name.clone()))?;
            self.slot = Some(slot);
        }
        Ok(())
    }

    pub fn cleanup(&mut self) {
        self.slot = None;
    }

    /// The current value: the variable's content once resolved, the literal
    /// otherwise.
    pub fn get(&self) -> Var {
        match &self.slot {
            Some(slot) => slot.get(),
            None => self.value.clone(),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&Var) -> R) -> R {
        match &self.slot {
            Some(slot) => slot.with(f),
            None => f(&self.value),
        }
    }
}

/// Variables a unit's parameters pulled into composition.
#[derive(Debug, Default)]
pub(crate) struct BoundParameters {
    pub required: Vec<ExposedTypeInfo>,
    pub exposed: Vec<ExposedTypeInfo>,
}

/// Type-checks every parameter of `instance` and composes nested wires.
pub(crate) fn bind_parameters(
    instance: &mut ShardInstance,
    position: usize,
    data: &InstanceData,
) -> Result<BoundParameters, ComposeError> {
    let mut bound = BoundParameters::default();
    let shard_name = instance.name();
    let scoped = instance
        .shard()
        .as_variables()
        .map(|vars| vars.scoped_variables(&data.input_type))
        .unwrap_or_default();
    let Some(params) = instance.shard_mut().as_parameterized() else {
        return Ok(bound);
    };

    for (index, info) in params.parameters().iter().enumerate() {
        let value = params.get_param(index);
        let param_error = |reason: String| ComposeError::Parameter {
            shard: shard_name.to_string(),
            position,
            param: info.name.to_string(),
            reason,
        };

        match &value {
            Var::ContextVar(name) => {
                let accepted: Vec<&TypeInfo> = info
                    .types
                    .iter()
                    .filter(|t| matches!(t, TypeInfo::ContextVar(_)))
                    .collect();
                if accepted.is_empty() {
                    return Err(param_error(format!("does not accept variable reference {name}")));
                }
                let found = data
                    .find_variable(name)
                    .ok_or_else(|| ComposeError::MissingVariable {
                        name: name.clone(),
                        shard: shard_name.to_string(),
                        position,
                    })?;
                let as_ref = TypeInfo::var_of(found.exposed_type.clone());
                if !accepted.iter().any(|t| match_types(&as_ref, t)) {
                    return Err(param_error(format!(
                        "variable {name} has type {}, which is not accepted",
                        found.exposed_type
                    )));
                }
                bound.required.push(ExposedTypeInfo {
                    name: name.clone(),
                    ..found.clone()
                });
            }
            Var::Wire(sub) => {
                if !info.types.contains(&TypeInfo::Wire) {
                    return Err(param_error("does not accept a wire".to_string()));
                }
                let mut nested = data.nested(data.input_type.clone());
                nested.shared.extend(scoped.iter().cloned());
                let result = compose_shared(sub, &nested).map_err(|e| ComposeError::NestedWire {
                    shard: shard_name.to_string(),
                    position,
                    param: info.name.to_string(),
                    source: Box::new(e),
                })?;
                bound.required.extend(
                    result
                        .required
                        .into_iter()
                        .filter(|r| !scoped.iter().any(|s| s.name == r.name)),
                );
                bound.exposed.extend(result.exposed);
            }
            literal => {
                if !info.accepts(literal) {
                    return Err(param_error(format!(
                        "expected one of {:?}, found {}",
                        info.types,
                        derive_type_info(literal)
                    )));
                }
            }
        }
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_acceptance_follows_declared_types() {
        let info = ParameterInfo::new(
            "Operand",
            "",
            vec![TypeInfo::Int, TypeInfo::var_of(TypeInfo::Int)],
        );
        assert!(info.accepts(&Var::Int(3)));
        assert!(info.accepts(&Var::ContextVar("n".into())));
        assert!(!info.accepts(&Var::from("three")));
        assert!(!info.accepts(&Var::None));
        assert!(matches!(
            info.check(&Var::Float(1.0)),
            Err(ParamError::InvalidValue { name, .. }) if name == "Operand"
        ));
    }

    #[test]
    fn param_var_returns_literal_until_resolved() {
        let mut p = ParamVar::new(Var::Int(9));
        assert_eq!(p.get(), Var::Int(9));
        assert_eq!(p.variable_name(), None);
        p.set(Var::ContextVar("count".into()));
        assert_eq!(p.variable_name(), Some("count"));
        assert_eq!(p.with(|v| v.clone()), Var::ContextVar("count".into()));
    }
}
