use crate::core::compose::InstanceData;
use crate::core::context::Context;
use crate::core::params::{ParameterInfo, Parameterized};
use crate::core::scope::{VarSlot, with_object_variable};
use crate::core::shard::{Activation, Composable, Lifecycle, Shard, Variables};
use crate::core::types::{ExposedTypeInfo, TypeInfo, Var, derive_type_info};
use crate::core::wire::{Progress, SharedWire, Wire};
use crate::error::{ActivationError, ComposeError, ParamError};
use std::sync::{MutexGuard, PoisonError};

/// Runs a sub-wire inline, feeding it this unit's input and outputting its
/// result.
///
/// The sub-wire shares the caller's scope, so it sees (and may set) the
/// caller's variables. Suspensions inside the sub-wire suspend the caller.
/// A looped sub-wire keeps iterating until one of its units stops it.
#[derive(Default)]
pub struct Do {
    wire: Option<SharedWire>,
    running: bool,
}

impl Do {
    pub fn new(wire: SharedWire) -> Self {
        Self {
            wire: Some(wire),
            running: false,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Wire>, ActivationError> {
        let wire = self
            .wire
            .as_ref()
            .ok_or_else(|| ActivationError::Failed("Do requires a Wire".to_string()))?;
        Ok(wire.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl std::fmt::Debug for Do {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Do")
            .field("has_wire", &self.wire.is_some())
            .field("running", &self.running)
            .finish()
    }
}

impl Shard for Do {
    fn name(&self) -> &'static str {
        "Do"
    }

    fn help(&self) -> &'static str {
        "Runs the given wire inline and outputs its result."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        let first = !self.running;
        let mut wire = self.lock()?;
        if first {
            wire.start(input.clone());
        }
        let progress = wire.resume();
        let name = wire.name().to_string();
        drop(wire);

        match progress {
            Progress::Suspended(point) => {
                self.running = true;
                Ok(Activation::Suspend(point))
            }
            Progress::Finished(output) => {
                self.running = false;
                Ok(Activation::Continue(output))
            }
            Progress::Failed(failure) => {
                self.running = false;
                Err(ActivationError::NestedWire {
                    wire: name,
                    message: format!("{} (position {}): {}", failure.unit, failure.position, failure.message),
                })
            }
        }
    }

    fn as_composable(&mut self) -> Option<&mut dyn Composable> {
        Some(self)
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        Some(self)
    }
}

impl Composable for Do {
    fn compose(&mut self, _data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        // The sub-wire was composed while binding the parameter.
        let wire = self
            .wire
            .as_ref()
            .ok_or_else(|| ComposeError::message("Do requires a Wire"))?;
        let guard = wire.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .output_type()
            .cloned()
            .ok_or_else(|| ComposeError::message(format!("sub-wire {} is not composed", guard.name())))
    }
}

impl Parameterized for Do {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Wire",
            "The wire to run.",
            vec![TypeInfo::None, TypeInfo::Wire],
        )]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::Wire(wire)) => {
                self.wire = Some(wire);
                Ok(())
            }
            (0, Var::None) => {
                self.wire = None;
                Ok(())
            }
            (0, other) => Err(ParamError::InvalidValue {
                name: "Wire".to_string(),
                found: derive_type_info(&other).to_string(),
            }),
            (index, _) => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match (index, &self.wire) {
            (0, Some(wire)) => Var::Wire(wire.clone()),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Do {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        self.running = false;
        let scope = context.scope().clone();
        let channels = context.channels().clone();
        let input = context.wire_input().clone();
        let mut wire = self.lock()?;
        let name = wire.name().to_string();
        wire.warmup_with_scope(input, scope, channels)
            .map_err(|e| ActivationError::NestedWire {
                wire: name,
                message: e.to_string(),
            })
    }

    fn cleanup(&mut self) {
        self.running = false;
        if let Ok(mut wire) = self.lock() {
            if wire.is_mid_run() {
                wire.end_run(Ok(Var::None));
            } else {
                wire.cleanup();
            }
        }
    }
}

/// Runs a sub-wire with its object input bound to a protected variable.
///
/// The variable is visible to the sub-wire only, for as long as each of its
/// activations lasts. Otherwise this behaves like [`Do`].
#[derive(Debug, Default)]
pub struct With {
    name: String,
    inner: Do,
    slot: Option<VarSlot>,
}

impl With {
    pub fn new(name: impl Into<String>, wire: SharedWire) -> Self {
        Self {
            name: name.into(),
            inner: Do::new(wire),
            slot: None,
        }
    }
}

impl Shard for With {
    fn name(&self) -> &'static str {
        "With"
    }

    fn help(&self) -> &'static str {
        "Binds the input object to Name while running the given wire."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        let Var::Object(object) = input else {
            return Err(ActivationError::Failed(format!(
                "With expects an Object input, found {}",
                derive_type_info(input)
            )));
        };
        let slot = self
            .slot
            .clone()
            .ok_or_else(|| ActivationError::Failed(format!("With {} was not warmed up", self.name)))?;
        let inner = &mut self.inner;
        with_object_variable(&slot, object.clone(), || inner.activate(context, input))
    }

    fn as_composable(&mut self) -> Option<&mut dyn Composable> {
        Some(self)
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        Some(self)
    }

    fn as_variables(&self) -> Option<&dyn Variables> {
        Some(self)
    }
}

impl Composable for With {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        if self.name.is_empty() {
            return Err(ComposeError::message("With requires a Name"));
        }
        if !matches!(data.input_type, TypeInfo::Object { .. }) {
            return Err(ComposeError::message(format!(
                "With expects an Object input, found {}",
                data.input_type
            )));
        }
        self.inner.compose(data)
    }
}

impl Parameterized for With {
    fn parameters(&self) -> Vec<ParameterInfo> {
        let mut params = vec![ParameterInfo::new(
            "Name",
            "The variable holding the object.",
            vec![TypeInfo::String],
        )];
        params.extend(self.inner.parameters());
        params
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::String(name)) => {
                self.name = name;
                Ok(())
            }
            (0, other) => Err(ParamError::InvalidValue {
                name: "Name".to_string(),
                found: derive_type_info(&other).to_string(),
            }),
            (1, value) => self.inner.set_param(0, value),
            (index, _) => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            1 => self.inner.get_param(0),
            _ => Var::None,
        }
    }
}

impl Lifecycle for With {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        self.slot = Some(context.declare_variable(&self.name));
        self.inner.warmup(context)
    }

    fn cleanup(&mut self) {
        self.inner.cleanup();
        self.slot = None;
    }
}

impl Variables for With {
    fn scoped_variables(&self, input_type: &TypeInfo) -> Vec<ExposedTypeInfo> {
        vec![ExposedTypeInfo::protected(self.name.clone(), input_type.clone())]
    }
}
