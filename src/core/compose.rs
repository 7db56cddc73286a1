//! The composition pass: static type checking and variable binding of a
//! wire before it may run.

use crate::core::channels::ChannelRegistry;
use crate::core::hash;
use crate::core::params::{BoundParameters, bind_parameters};
use crate::core::shard::ShardInstance;
use crate::core::types::{ExposedTypeInfo, TypeInfo, Var, match_types};
use crate::core::validation::ValidationResult;
use crate::core::wire::{SharedWire, Wire};
use crate::error::ComposeError;
use std::cell::RefCell;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// Units whose presence at the end of a wire means control never falls off
/// the end.
const FLOW_STOPPERS: [&str; 3] = ["Fail", "Return", "Stop"];

/// How long composition waits for a sub-wire that another thread holds.
const LOCK_WAIT: Duration = Duration::from_secs(1);

thread_local! {
    /// Shared wires being composed on this thread, outermost first.
    static COMPOSING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn wire_key(wire: &SharedWire) -> usize {
    Arc::as_ptr(wire) as usize
}

/// Marks a shared wire as being composed on this thread until dropped.
pub(crate) struct ComposeEntry(usize);

impl ComposeEntry {
    /// `None` if `wire` is already being composed further up this thread.
    pub(crate) fn enter(wire: &SharedWire) -> Option<Self> {
        let key = wire_key(wire);
        COMPOSING.with_borrow_mut(|stack| {
            if stack.contains(&key) {
                None
            } else {
                stack.push(key);
                Some(ComposeEntry(key))
            }
        })
    }
}

impl Drop for ComposeEntry {
    fn drop(&mut self) {
        COMPOSING.with_borrow_mut(|stack| {
            if let Some(index) = stack.iter().rposition(|k| *k == self.0) {
                stack.remove(index);
            }
        });
    }
}

/// Locks a wire about to be composed. A lock held by another thread is
/// waited for, up to [`LOCK_WAIT`].
fn lock_for_compose<'a>(wire: &'a SharedWire, owner: &str) -> Result<MutexGuard<'a, Wire>, ComposeError> {
    let deadline = Instant::now() + LOCK_WAIT;
    loop {
        match wire.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(TryLockError::WouldBlock) => return Err(ComposeError::Locked(owner.to_string())),
        }
    }
}

/// Composes a shared wire.
///
/// The wire is tracked while it composes, so a sub-wire that leads back to
/// it is rejected as [`ComposeError::Recursive`] without touching its lock.
/// `data.wire_name` names the wire that refers to it.
pub fn compose_shared(wire: &SharedWire, data: &InstanceData) -> Result<ComposeResult, ComposeError> {
    let Some(_entry) = ComposeEntry::enter(wire) else {
        return Err(ComposeError::Recursive(data.wire_name.clone()));
    };
    let mut guard = lock_for_compose(wire, &data.wire_name)?;
    compose_wire(&mut guard, data)
}

/// What a unit sees while being composed.
#[derive(Debug, Clone)]
pub struct InstanceData {
    /// Output type of the previous unit (or the wire's input type).
    pub input_type: TypeInfo,
    /// Input type of the wire being composed.
    pub wire_input_type: TypeInfo,
    /// Every variable visible at this point. Later entries shadow earlier ones.
    pub shared: Vec<ExposedTypeInfo>,
    pub channels: Arc<ChannelRegistry>,
    pub wire_name: String,
    pub position: usize,
}

impl InstanceData {
    /// Composition context with no inherited variables and a private channel
    /// registry.
    pub fn new(input_type: TypeInfo) -> Self {
        Self {
            wire_input_type: input_type.clone(),
            input_type,
            shared: Vec::new(),
            channels: Arc::new(ChannelRegistry::new()),
            wire_name: String::new(),
            position: 0,
        }
    }

    pub fn with_shared(mut self, shared: Vec<ExposedTypeInfo>) -> Self {
        self.shared = shared;
        self
    }

    pub fn with_channels(mut self, channels: Arc<ChannelRegistry>) -> Self {
        self.channels = channels;
        self
    }

    pub fn find_variable(&self, name: &str) -> Option<&ExposedTypeInfo> {
        self.shared.iter().rev().find(|e| e.name == name)
    }

    /// Context for a nested wire fed with `input_type`.
    pub(crate) fn nested(&self, input_type: TypeInfo) -> InstanceData {
        InstanceData {
            wire_input_type: input_type.clone(),
            input_type,
            position: 0,
            ..self.clone()
        }
    }
}

/// Outcome of a successful composition.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeResult {
    pub input_type: TypeInfo,
    pub output_type: TypeInfo,
    /// Variables the wire publishes.
    pub exposed: Vec<ExposedTypeInfo>,
    /// Variables the wire needs from its enclosing scope.
    pub required: Vec<ExposedTypeInfo>,
    /// Whether the wire ends with a unit that never falls through.
    pub flow_stopper: bool,
    pub warnings: ValidationResult,
}

/// Type-checks `wire` against `data`.
///
/// Either every unit composes or the whole wire is rejected. Results are
/// memoized on the wire: recomposing with the same input type, inherited
/// variables, units and parameter values returns the cached result. Sub-wire
/// parameters count by content, not identity.
pub fn compose_wire(wire: &mut Wire, data: &InstanceData) -> Result<ComposeResult, ComposeError> {
    let key = compose_key(wire, data);
    if let (Some(key), Some((Some(cached_key), cached))) = (key, &wire.composed)
        && *cached_key == key
    {
        log::trace!("wire {} composition cache hit", wire.name());
        return Ok(cached.clone());
    }

    wire.composed = None;
    match compose_shards(wire, data) {
        Ok(result) => {
            result.warnings.log_summary(wire.name());
            log::debug!(
                "wire {} composed: {} -> {}",
                wire.name(),
                result.input_type,
                result.output_type
            );
            wire.composed = Some((key, result.clone()));
            Ok(result)
        }
        Err(e) => {
            log::error!("wire {} failed to compose: {}", wire.name(), e);
            Err(e)
        }
    }
}

/// `None` when the wire's content cannot be read in full, which disables the
/// memo for this composition.
fn compose_key(wire: &mut Wire, data: &InstanceData) -> Option<u64> {
    let content = content_hash(wire, &mut Vec::new())?;
    Some(hash::combine(&[
        hash::hash_type(&data.input_type),
        hash::hash_exposed(&data.shared),
        Arc::as_ptr(&data.channels) as usize as u64,
        content,
    ]))
}

/// Hash of a wire's units and parameter values, following sub-wires, so
/// that editing a sub-wire invalidates the memo of every wire using it.
fn content_hash(wire: &mut Wire, visiting: &mut Vec<usize>) -> Option<u64> {
    let mut parts = vec![wire.shards.len() as u64];
    for instance in wire.shards.iter_mut() {
        let mut name = DefaultHasher::new();
        instance.name().hash(&mut name);
        parts.push(name.finish());
        let Some(params) = instance.shard_mut().as_parameterized() else {
            continue;
        };
        for index in 0..params.parameters().len() {
            match params.get_param(index) {
                Var::Wire(sub) => parts.push(sub_wire_hash(&sub, visiting)?),
                value => parts.push(hash::hash_var(&value)),
            }
        }
    }
    Some(hash::combine(&parts))
}

fn sub_wire_hash(sub: &SharedWire, visiting: &mut Vec<usize>) -> Option<u64> {
    let key = wire_key(sub);
    if visiting.contains(&key) {
        return Some(key as u64);
    }
    let mut guard = match sub.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return None,
    };
    visiting.push(key);
    let content = content_hash(&mut guard, visiting);
    visiting.pop();
    Some(hash::combine(&[key as u64, content?]))
}

fn compose_shards(wire: &mut Wire, data: &InstanceData) -> Result<ComposeResult, ComposeError> {
    let wire_name = wire.name().to_string();
    let inherited = &data.shared;
    let mut exposed: Vec<ExposedTypeInfo> = Vec::new();
    let mut required: Vec<ExposedTypeInfo> = Vec::new();
    let mut warnings = ValidationResult::new();

    let input_type = match wire.shards.first() {
        Some(first) if first.shard().input_types() == [TypeInfo::None] => TypeInfo::None,
        _ => data.input_type.clone(),
    };
    let mut previous = input_type.clone();

    for (position, instance) in wire.shards.iter_mut().enumerate() {
        let shard = instance.name();
        let inputs = instance.shard().input_types();
        let ignores_input = inputs == [TypeInfo::None];
        if !ignores_input && !inputs.iter().any(|t| match_types(&previous, t)) {
            return Err(ComposeError::InputTypeMismatch {
                shard: shard.to_string(),
                position,
                expected: inputs,
                found: previous,
            });
        }

        let mut shared = inherited.clone();
        shared.extend(exposed.iter().cloned());
        let unit_data = InstanceData {
            input_type: previous.clone(),
            wire_input_type: input_type.clone(),
            shared,
            channels: data.channels.clone(),
            wire_name: wire_name.clone(),
            position,
        };

        let bound = if instance.capabilities().parameters {
            bind_parameters(instance, position, &unit_data)?
        } else {
            BoundParameters::default()
        };

        let caps = instance.capabilities();
        let composed = if caps.compose {
            instance
                .shard_mut()
                .as_composable()
                .map(|composable| composable.compose(&unit_data))
        } else {
            None
        };
        let output = match composed {
            Some(result) => result.map_err(|e| annotate(e, shard, position, &wire_name))?,
            None => default_output(instance, &previous, position)?,
        };

        let (unit_exposed, unit_required) = match instance.shard().as_variables() {
            Some(vars) if caps.variables => (vars.exposed_variables(), vars.required_variables()),
            _ => (Vec::new(), Vec::new()),
        };

        for var in unit_required.into_iter().chain(bound.required) {
            require(&exposed, inherited, &mut required, var, shard, position)?;
        }
        for var in unit_exposed.into_iter().chain(bound.exposed) {
            expose(&mut exposed, inherited, var, shard, position, &mut warnings)?;
        }

        previous = output;
    }

    let flow_stopper = wire
        .shards
        .last()
        .is_some_and(|last| FLOW_STOPPERS.contains(&last.name()));

    wire.input_type = input_type.clone();
    wire.output_type = Some(previous.clone());

    Ok(ComposeResult {
        input_type,
        output_type: previous,
        exposed,
        required,
        flow_stopper,
        warnings,
    })
}

fn annotate(error: ComposeError, shard: &str, position: usize, wire: &str) -> ComposeError {
    match error {
        ComposeError::Message(message) => ComposeError::Shard {
            shard: shard.to_string(),
            position,
            wire: wire.to_string(),
            message,
        },
        other => other,
    }
}

/// Output type of a unit without a compose hook.
fn default_output(
    instance: &ShardInstance,
    previous: &TypeInfo,
    position: usize,
) -> Result<TypeInfo, ComposeError> {
    let outputs = instance.shard().output_types();
    match outputs.as_slice() {
        [] => Ok(TypeInfo::None),
        [single] if !single.is_any() => Ok(single.clone()),
        [_] => {
            // Any output: a pass-through, unless the unit consumes one
            // specific type, in which case nothing is known about the result.
            let inputs = instance.shard().input_types();
            match inputs.as_slice() {
                [only] if !only.is_any() && !only.is_none() => Ok(TypeInfo::Any),
                _ => Ok(previous.clone()),
            }
        }
        _ => Err(ComposeError::AmbiguousOutput {
            shard: instance.name().to_string(),
            position,
        }),
    }
}

fn lookup<'a>(
    exposed: &'a [ExposedTypeInfo],
    inherited: &'a [ExposedTypeInfo],
    name: &str,
) -> Option<(&'a ExposedTypeInfo, bool)> {
    if let Some(local) = exposed.iter().rev().find(|e| e.name == name) {
        return Some((local, true));
    }
    inherited
        .iter()
        .rev()
        .find(|e| e.name == name)
        .map(|e| (e, false))
}

fn require(
    exposed: &[ExposedTypeInfo],
    inherited: &[ExposedTypeInfo],
    required: &mut Vec<ExposedTypeInfo>,
    var: ExposedTypeInfo,
    shard: &str,
    position: usize,
) -> Result<(), ComposeError> {
    let Some((found, local)) = lookup(exposed, inherited, &var.name) else {
        return Err(ComposeError::MissingVariable {
            name: var.name,
            shard: shard.to_string(),
            position,
        });
    };

    if !match_types(&found.exposed_type, &var.exposed_type) {
        return Err(ComposeError::VariableTypeMismatch {
            name: var.name,
            shard: shard.to_string(),
            position,
            expected: var.exposed_type,
            found: found.exposed_type.clone(),
        });
    }

    if var.is_mutable && (found.is_protected || !found.is_mutable) {
        return Err(ComposeError::ProtectedVariable {
            name: var.name,
            shard: shard.to_string(),
            position,
        });
    }

    if !local && !required.iter().any(|r| r.name == var.name) {
        required.push(ExposedTypeInfo {
            exposed_type: found.exposed_type.clone(),
            is_protected: found.is_protected,
            ..var
        });
    }
    Ok(())
}

fn expose(
    exposed: &mut Vec<ExposedTypeInfo>,
    inherited: &[ExposedTypeInfo],
    var: ExposedTypeInfo,
    shard: &str,
    position: usize,
    warnings: &mut ValidationResult,
) -> Result<(), ComposeError> {
    if let Some((existing, local)) = lookup(exposed, inherited, &var.name) {
        if existing.is_protected {
            return Err(ComposeError::ProtectedVariable {
                name: var.name,
                shard: shard.to_string(),
                position,
            });
        }
        if existing.exposed_type != var.exposed_type
            && !match_types(&var.exposed_type, &existing.exposed_type)
        {
            return Err(ComposeError::IncompatibleExposure {
                name: var.name,
                shard: shard.to_string(),
                position,
                existing: existing.exposed_type.clone(),
                requested: var.exposed_type,
            });
        }
        if local {
            return Ok(());
        }
        warnings.add_warning(format!(
            "{shard} (position {position}) shadows inherited variable {}",
            var.name
        ));
    }
    exposed.push(var);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::shard::{Activation, Shard};
    use crate::core::types::Var;
    use crate::error::ActivationError;
    use crate::shards::core::{Add, Const, Fail, Get, Set};
    use crate::shards::flow::Do;

    struct Split;

    impl Shard for Split {
        fn name(&self) -> &'static str {
            "Split"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Int, TypeInfo::String]
        }
        fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
            Ok(Activation::Continue(input.clone()))
        }
    }

    #[test]
    fn constant_then_additions_compose_to_int() {
        let mut wire = Wire::new("sum")
            .with_shard(Const::new(5))
            .with_shard(Add::new(1))
            .with_shard(Add::new(1));
        let result = compose_wire(&mut wire, &InstanceData::new(TypeInfo::Int)).unwrap();
        assert_eq!(result.input_type, TypeInfo::None);
        assert_eq!(result.output_type, TypeInfo::Int);
        assert!(!result.flow_stopper);
        assert_eq!(wire.run_once(Var::Int(0)).unwrap().output, Var::Int(7));
    }

    #[test]
    fn recomposition_is_memoized_until_parameters_change() {
        let mut wire = Wire::new("memo")
            .with_shard(Add::new(1))
            .with_shard(Set::new("x"));
        let data = InstanceData::new(TypeInfo::Int);
        let first = compose_wire(&mut wire, &data).unwrap();
        let second = compose_wire(&mut wire, &data).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.exposed, vec![ExposedTypeInfo::variable("x", TypeInfo::Int)]);

        wire.shards[0]
            .shard_mut()
            .as_parameterized()
            .unwrap()
            .set_param(0, Var::Float(1.5))
            .unwrap();
        assert!(compose_wire(&mut wire, &data).is_err());
        assert!(wire.composed().is_none());
    }

    #[test]
    fn several_outputs_without_a_hook_are_ambiguous() {
        let mut wire = Wire::new("split").with_shard(Const::new(1)).with_shard(Split);
        let err = compose_wire(&mut wire, &InstanceData::new(TypeInfo::None)).unwrap_err();
        assert_eq!(
            err,
            ComposeError::AmbiguousOutput {
                shard: "Split".to_string(),
                position: 1
            }
        );
    }

    #[test]
    fn reexposing_with_another_type_fails() {
        let mut wire = Wire::new("clash")
            .with_shard(Const::new(1))
            .with_shard(Set::new("v"))
            .with_shard(Const::new("text"))
            .with_shard(Set::new("v"));
        let err = compose_wire(&mut wire, &InstanceData::new(TypeInfo::None)).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::IncompatibleExposure { ref name, position: 3, .. } if name == "v"
        ));
    }

    #[test]
    fn protected_variables_cannot_be_exposed() {
        let data = InstanceData::new(TypeInfo::Int)
            .with_shared(vec![ExposedTypeInfo::protected("limit", TypeInfo::Int)]);
        let mut wire = Wire::new("overwrite").with_shard(Set::new("limit"));
        let err = compose_wire(&mut wire, &data).unwrap_err();
        assert!(matches!(err, ComposeError::ProtectedVariable { ref name, .. } if name == "limit"));
    }

    #[test]
    fn inherited_requirements_are_reported() {
        let data = InstanceData::new(TypeInfo::None)
            .with_shared(vec![ExposedTypeInfo::variable("seed", TypeInfo::Int)]);
        let mut wire = Wire::new("reader")
            .with_shard(Get::new("seed"))
            .with_shard(Set::new("copy"))
            .with_shard(Get::new("copy"));
        let result = compose_wire(&mut wire, &data).unwrap();
        let required: Vec<&str> = result.required.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(required, ["seed"]);
        assert_eq!(result.output_type, TypeInfo::Int);
    }

    #[test]
    fn trailing_fail_marks_a_flow_stopper() {
        let mut wire = Wire::new("doomed").with_shard(Const::new(1)).with_shard(Fail::new("no"));
        let result = compose_wire(&mut wire, &InstanceData::new(TypeInfo::None)).unwrap();
        assert!(result.flow_stopper);
    }

    #[test]
    fn editing_a_sub_wire_invalidates_the_callers_memo() {
        let sub = Wire::new("sub").with_shard(Add::new(1)).into_shared();
        let mut parent = Wire::new("parent").with_shard(Do::new(sub.clone()));
        let data = InstanceData::new(TypeInfo::Int);
        assert_eq!(compose_wire(&mut parent, &data).unwrap().output_type, TypeInfo::Int);

        sub.lock().unwrap().push(ShardInstance::new(Box::new(Const::new("x"))));
        assert_eq!(compose_wire(&mut parent, &data).unwrap().output_type, TypeInfo::String);
    }

    #[test]
    fn self_reference_through_a_sub_wire_is_recursive() {
        let wire = Wire::new("loop").into_shared();
        wire.lock()
            .unwrap()
            .push(ShardInstance::new(Box::new(Do::new(wire.clone()))));
        let err = compose_shared(&wire, &InstanceData::new(TypeInfo::Int)).unwrap_err();
        match err {
            ComposeError::NestedWire { source, .. } => {
                assert!(matches!(*source, ComposeError::Recursive(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(COMPOSING.with_borrow(|stack| stack.is_empty()));
    }

    #[test]
    fn a_sub_wire_briefly_held_elsewhere_still_composes() {
        let sub = Wire::new("busy").with_shard(Add::new(2)).into_shared();
        let mut parent = Wire::new("parent").with_shard(Do::new(sub.clone()));

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = {
            let sub = sub.clone();
            std::thread::spawn(move || {
                let _guard = sub.lock().unwrap();
                locked_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(50));
            })
        };
        locked_rx.recv().unwrap();
        let result = compose_wire(&mut parent, &InstanceData::new(TypeInfo::Int)).unwrap();
        holder.join().unwrap();
        assert_eq!(result.output_type, TypeInfo::Int);
    }
}
