//! Value, variable and control units.

use crate::core::compose::InstanceData;
use crate::core::context::Context;
use crate::core::params::{ParamVar, ParameterInfo, Parameterized};
use crate::core::pool::{OutputPool, PoolHandle};
use crate::core::scope::VarSlot;
use crate::core::shard::{Activation, Composable, Lifecycle, Shard, SuspendPoint, Variables};
use crate::core::types::{
    CORE_CC, ExposedTypeInfo, FourCC, ObjectRef, TypeInfo, Var, derive_type_info, fourcc, match_types,
};
use crate::error::{ActivationError, ComposeError, ParamError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

fn name_param() -> ParameterInfo {
    ParameterInfo::new("Name", "The name of the variable.", vec![TypeInfo::String])
}

fn set_name(name: &mut String, index: usize, value: Var) -> Result<(), ParamError> {
    match (index, value) {
        (0, Var::String(s)) => {
            *name = s;
            Ok(())
        }
        (0, other) => Err(ParamError::InvalidValue {
            name: "Name".to_string(),
            found: derive_type_info(&other).to_string(),
        }),
        (index, _) => Err(ParamError::OutOfRange(index)),
    }
}

fn require_name(name: &str, shard: &str) -> Result<(), ComposeError> {
    if name.is_empty() {
        Err(ComposeError::message(format!("{shard} requires a variable Name")))
    } else {
        Ok(())
    }
}

/// Outputs a constant value.
#[derive(Debug, Default)]
pub struct Const {
    value: Var,
}

impl Const {
    pub fn new(value: impl Into<Var>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Shard for Const {
    fn name(&self) -> &'static str {
        "Const"
    }

    fn help(&self) -> &'static str {
        "Outputs the value given as parameter, ignoring its input."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::None]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        Ok(Activation::Continue(self.value.clone()))
    }

    fn as_composable(&mut self) -> Option<&mut dyn Composable> {
        Some(self)
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }
}

impl Composable for Const {
    fn compose(&mut self, _data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        Ok(derive_type_info(&self.value))
    }
}

impl Parameterized for Const {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new("Value", "The constant to output.", vec![TypeInfo::Any])]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match index {
            0 => {
                self.value = value;
                Ok(())
            }
            _ => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => self.value.clone(),
            _ => Var::None,
        }
    }
}

/// Passes its input through unchanged.
#[derive(Debug, Default)]
pub struct Pass;

impl Shard for Pass {
    fn name(&self) -> &'static str {
        "Pass"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        Ok(Activation::Continue(input.clone()))
    }
}

/// Outputs the value the wire was started with.
#[derive(Debug, Default)]
pub struct Input;

impl Shard for Input {
    fn name(&self) -> &'static str {
        "Input"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        Ok(Activation::Continue(context.wire_input().clone()))
    }

    fn as_composable(&mut self) -> Option<&mut dyn Composable> {
        Some(self)
    }
}

impl Composable for Input {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        Ok(data.wire_input_type.clone())
    }
}

/// Adds an operand to a number. Both sides must be of the same kind.
#[derive(Debug)]
pub struct Add {
    operand: ParamVar,
}

impl Default for Add {
    fn default() -> Self {
        Self {
            operand: ParamVar::new(Var::Int(0)),
        }
    }
}

impl Add {
    pub fn new(operand: impl Into<Var>) -> Self {
        Self {
            operand: ParamVar::new(operand.into()),
        }
    }
}

impl Shard for Add {
    fn name(&self) -> &'static str {
        "Math.Add"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Int, TypeInfo::Float]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Int, TypeInfo::Float]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        let sum = self.operand.with(|operand| match (input, operand) {
            (Var::Int(a), Var::Int(b)) => a.checked_add(*b).map(Var::Int).ok_or(ActivationError::Overflow),
            (Var::Float(a), Var::Float(b)) => Ok(Var::Float(a + b)),
            (a, b) => Err(ActivationError::TypeMismatch {
                expected: a.kind_name().to_string(),
                found: b.kind_name().to_string(),
            }),
        })?;
        Ok(Activation::Continue(sum))
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

impl Composable for Add {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        let operand_type = match self.operand.variable_name() {
            Some(name) => data
                .find_variable(name)
                .map(|v| v.exposed_type.clone())
                .unwrap_or(TypeInfo::None),
            None => derive_type_info(self.operand.value()),
        };
        if !match_types(&operand_type, &data.input_type) {
            return Err(ComposeError::message(format!(
                "cannot add an operand of type {operand_type} to {}",
                data.input_type
            )));
        }
        Ok(data.input_type.clone())
    }
}

impl Parameterized for Add {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Operand",
            "The value to add to the input.",
            vec![
                TypeInfo::Int,
                TypeInfo::Float,
                TypeInfo::var_of(TypeInfo::Int),
                TypeInfo::var_of(TypeInfo::Float),
            ],
        )]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match index {
            0 => {
                self.parameters()[0].check(&value)?;
                self.operand.set(value);
                Ok(())
            }
            _ => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => self.operand.value().clone(),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Add {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        self.operand.warmup(context)
    }

    fn cleanup(&mut self) {
        self.operand.cleanup();
    }
}

/// Stores its input into a wire variable, exposing it to later units.
#[derive(Debug, Default)]
pub struct Set {
    name: String,
    exposed_type: TypeInfo,
    slot: Option<VarSlot>,
}

impl Set {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Shard for Set {
    fn name(&self) -> &'static str {
        "Set"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        if let Some(slot) = &self.slot {
            slot.assign(input);
        }
        Ok(Activation::Continue(input.clone()))
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

impl Composable for Set {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        require_name(&self.name, "Set")?;
        self.exposed_type = data.input_type.clone();
        Ok(data.input_type.clone())
    }
}

impl Parameterized for Set {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![name_param()]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        set_name(&mut self.name, index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Set {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        if context.scope().is_protected(&self.name) {
            return Err(ActivationError::ProtectedVariable(self.name.clone()));
        }
        self.slot = Some(context.declare_variable(&self.name));
        Ok(())
    }

    fn cleanup(&mut self) {
        self.slot = None;
    }
}

impl Variables for Set {
    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        vec![ExposedTypeInfo::variable(self.name.clone(), self.exposed_type.clone())]
    }
}

/// Outputs the current value of a variable.
#[derive(Debug, Default)]
pub struct Get {
    name: String,
    slot: Option<VarSlot>,
}

impl Get {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: None,
        }
    }
}

impl Shard for Get {
    fn name(&self) -> &'static str {
        "Get"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        let slot = self
            .slot
            .as_ref()
            .ok_or_else(|| ActivationError::MissingVariable(self.name.clone()))?;
        Ok(Activation::Continue(slot.get()))
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

impl Composable for Get {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        require_name(&self.name, "Get")?;
        data.find_variable(&self.name)
            .map(|v| v.exposed_type.clone())
            .ok_or_else(|| ComposeError::MissingVariable {
                name: self.name.clone(),
                shard: "Get".to_string(),
                position: data.position,
            })
    }
}

impl Parameterized for Get {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![name_param()]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        set_name(&mut self.name, index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Get {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        let slot = context
            .find_variable(&self.name)
            .ok_or_else(|| ActivationError::MissingVariable(self.name.clone()))?;
        self.slot = Some(slot);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.slot = None;
    }
}

impl Variables for Get {
    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        vec![ExposedTypeInfo::read_only(self.name.clone(), TypeInfo::Any)]
    }
}

/// Overwrites an existing mutable variable with its input.
#[derive(Debug, Default)]
pub struct Update {
    name: String,
    value_type: TypeInfo,
    slot: Option<VarSlot>,
}

impl Update {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Shard for Update {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        let slot = self
            .slot
            .as_ref()
            .ok_or_else(|| ActivationError::MissingVariable(self.name.clone()))?;
        slot.assign(input);
        Ok(Activation::Continue(input.clone()))
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

impl Composable for Update {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        require_name(&self.name, "Update")?;
        let existing = data
            .find_variable(&self.name)
            .ok_or_else(|| ComposeError::MissingVariable {
                name: self.name.clone(),
                shard: "Update".to_string(),
                position: data.position,
            })?;
        if !match_types(&data.input_type, &existing.exposed_type) {
            return Err(ComposeError::VariableTypeMismatch {
                name: self.name.clone(),
                shard: "Update".to_string(),
                position: data.position,
                expected: existing.exposed_type.clone(),
                found: data.input_type.clone(),
            });
        }
        self.value_type = existing.exposed_type.clone();
        Ok(data.input_type.clone())
    }
}

impl Parameterized for Update {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![name_param()]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        set_name(&mut self.name, index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Update {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        if context.scope().is_protected(&self.name) {
            return Err(ActivationError::ProtectedVariable(self.name.clone()));
        }
        let slot = context
            .find_variable(&self.name)
            .ok_or_else(|| ActivationError::MissingVariable(self.name.clone()))?;
        self.slot = Some(slot);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.slot = None;
    }
}

impl Variables for Update {
    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        vec![ExposedTypeInfo::variable(self.name.clone(), self.value_type.clone())]
    }
}

/// Suspends the wire once, then passes its input through.
#[derive(Debug, Default)]
pub struct Pause {
    time: Var,
    paused: bool,
}

impl Pause {
    pub fn new(seconds: f64) -> Self {
        Self {
            time: Var::Float(seconds),
            paused: false,
        }
    }

    fn suspend_point(&self) -> Result<SuspendPoint, String> {
        match pause_duration(&self.time)? {
            Some(duration) => Ok(SuspendPoint::Sleep(duration)),
            None => Ok(SuspendPoint::Yield),
        }
    }
}

/// `None` for a plain yield. Negative times yield; infinite, NaN or
/// unrepresentable times are rejected.
fn pause_duration(time: &Var) -> Result<Option<Duration>, String> {
    let seconds = match time {
        Var::Int(s) => *s as f64,
        Var::Float(s) => *s,
        _ => return Ok(None),
    };
    if seconds.is_nan() {
        return Err("Pause Time must be a number, found NaN".to_string());
    }
    if seconds <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|_| format!("Pause Time {seconds} is out of range"))
}

impl Shard for Pause {
    fn name(&self) -> &'static str {
        "Pause"
    }

    fn help(&self) -> &'static str {
        "Yields to other wires, or sleeps for Time seconds."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        if self.paused {
            self.paused = false;
            return Ok(Activation::Continue(input.clone()));
        }
        let point = self.suspend_point().map_err(ActivationError::Failed)?;
        self.paused = true;
        Ok(Activation::Suspend(point))
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

impl Composable for Pause {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        pause_duration(&self.time).map_err(ComposeError::message)?;
        Ok(data.input_type.clone())
    }
}

impl Parameterized for Pause {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Time",
            "Seconds to sleep. None yields for one scheduling pass.",
            vec![TypeInfo::None, TypeInfo::Int, TypeInfo::Float],
        )]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match index {
            0 => {
                self.parameters()[0].check(&value)?;
                if pause_duration(&value).is_err() {
                    return Err(ParamError::InvalidValue {
                        name: "Time".to_string(),
                        found: format!("{value:?}"),
                    });
                }
                self.time = value;
                Ok(())
            }
            _ => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => self.time.clone(),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Pause {
    fn cleanup(&mut self) {
        self.paused = false;
    }
}

/// Type id of [`ByteBuffer`] objects.
pub const BUFFER_TYPE: FourCC = fourcc(b"bufr");

/// A zero-filled byte buffer handed out as an object.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    data: Mutex<Vec<u8>>,
}

impl ByteBuffer {
    pub fn len(&self) -> usize {
        self.with(|data| data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.data.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Outputs a fresh zeroed buffer of Size bytes on every activation.
///
/// Buffers come from an output pool and go back to it once nothing
/// downstream holds them.
#[derive(Default)]
pub struct Buffer {
    size: usize,
    pool: OutputPool<ObjectRef>,
    leased: Vec<PoolHandle>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("pooled", &self.pool.len())
            .field("leased", &self.leased.len())
            .finish()
    }
}

impl Buffer {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Returns unused buffers to the pool.
    fn reclaim(&mut self) {
        let pool = &mut self.pool;
        self.leased.retain(|&handle| {
            let held = pool.get(handle).is_some_and(|object| object.handle_count() > 1);
            if !held {
                pool.release(handle);
            }
            held
        });
        pool.recycle();
    }

    fn next_buffer(&mut self) -> ObjectRef {
        self.reclaim();
        let handle = self
            .pool
            .acquire(|| ObjectRef::new(CORE_CC, BUFFER_TYPE, ByteBuffer::default()));
        self.leased.push(handle);
        let object = match self.pool.get(handle) {
            Some(object) => object.clone(),
            None => ObjectRef::new(CORE_CC, BUFFER_TYPE, ByteBuffer::default()),
        };
        if let Some(buffer) = object.downcast_ref::<ByteBuffer>() {
            buffer.with(|data| {
                data.clear();
                data.resize(self.size, 0);
            });
        }
        object
    }
}

impl Shard for Buffer {
    fn name(&self) -> &'static str {
        "Bytes.Buffer"
    }

    fn help(&self) -> &'static str {
        "Outputs a zeroed byte buffer of Size bytes."
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::object(CORE_CC, BUFFER_TYPE)]
    }

    fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        Ok(Activation::Continue(Var::Object(self.next_buffer())))
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        Some(self)
    }
}

impl Parameterized for Buffer {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new("Size", "Length of the buffer in bytes.", vec![TypeInfo::Int])]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::Int(size)) if size >= 0 => {
                self.size = size as usize;
                Ok(())
            }
            (0, other) => Err(ParamError::InvalidValue {
                name: "Size".to_string(),
                found: format!("{other:?}"),
            }),
            (index, _) => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => Var::Int(self.size as i64),
            _ => Var::None,
        }
    }
}

impl Lifecycle for Buffer {
    fn cleanup(&mut self) {
        self.reclaim();
    }
}

/// Fails the wire with a message.
#[derive(Debug, Default)]
pub struct Fail {
    message: String,
}

impl Fail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Shard for Fail {
    fn name(&self) -> &'static str {
        "Fail"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        let message = if self.message.is_empty() {
            "Fail"
        } else {
            &self.message
        };
        Err(ActivationError::Failed(message.to_string()))
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }
}

impl Parameterized for Fail {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo::new(
            "Message",
            "The error message.",
            vec![TypeInfo::String],
        )]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::String(message)) => {
                self.message = message;
                Ok(())
            }
            (0, other) => Err(ParamError::InvalidValue {
                name: "Message".to_string(),
                found: derive_type_info(&other).to_string(),
            }),
            (index, _) => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get_param(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.message.clone()),
            _ => Var::None,
        }
    }
}

/// Ends the run successfully with its input as output.
#[derive(Debug, Default)]
pub struct Stop;

impl Shard for Stop {
    fn name(&self) -> &'static str {
        "Stop"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        Ok(Activation::Stop(input.clone()))
    }
}

/// Ends the current iteration with its input as output.
#[derive(Debug, Default)]
pub struct Return;

impl Shard for Return {
    fn name(&self) -> &'static str {
        "Return"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        Ok(Activation::Return(input.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wire::{Wire, WireState};

    #[test]
    fn const_and_add_compose_to_the_input_kind() {
        let mut wire = Wire::new("sum")
            .with_shard(Const::new(5))
            .with_shard(Add::new(1))
            .with_shard(Add::new(1));
        let result = wire.run_once(Var::Int(0)).unwrap();
        assert_eq!(result.output, Var::Int(7));
        assert_eq!(wire.output_type(), Some(&TypeInfo::Int));
        assert_eq!(wire.input_type(), &TypeInfo::None);
    }

    #[test]
    fn add_rejects_mixed_kinds_at_compose() {
        let mut wire = Wire::new("mixed").with_shard(Add::new(1.5));
        let err = wire.run_once(Var::Int(1)).unwrap_err();
        assert!(matches!(err, ComposeError::Shard { ref shard, position: 0, .. } if shard == "Math.Add"));
    }

    #[test]
    fn add_overflow_fails_the_wire() {
        let mut wire = Wire::new("overflow").with_shard(Add::new(1));
        let result = wire.run_once(Var::Int(i64::MAX)).unwrap();
        assert_eq!(result.state, WireState::Failed);
        assert_eq!(result.error.unwrap().message, "Integer overflow");
    }

    #[test]
    fn set_then_get_reads_back_the_value() {
        let mut wire = Wire::new("vars")
            .with_shard(Set::new("x"))
            .with_shard(Const::new("ignored"))
            .with_shard(Get::new("x"));
        let result = wire.run_once(Var::Int(3)).unwrap();
        assert_eq!(result.output, Var::Int(3));
        assert_eq!(wire.output_type(), Some(&TypeInfo::Int));
    }

    #[test]
    fn get_of_an_unknown_variable_is_a_compose_error() {
        let mut wire = Wire::new("missing").with_shard(Get::new("nowhere"));
        let err = wire.run_once(Var::None).unwrap_err();
        assert!(matches!(err, ComposeError::MissingVariable { ref name, .. } if name == "nowhere"));
        assert_eq!(wire.state(), WireState::Unscheduled);
    }

    #[test]
    fn update_checks_the_variable_type() {
        let mut ok = Wire::new("update")
            .with_shard(Set::new("n"))
            .with_shard(Add::new(1))
            .with_shard(Update::new("n"))
            .with_shard(Get::new("n"));
        assert_eq!(ok.run_once(Var::Int(1)).unwrap().output, Var::Int(2));

        let mut bad = Wire::new("bad-update")
            .with_shard(Set::new("n"))
            .with_shard(Const::new("text"))
            .with_shard(Update::new("n"));
        assert!(matches!(
            bad.run_once(Var::Int(1)),
            Err(ComposeError::VariableTypeMismatch { .. })
        ));
    }

    #[test]
    fn variable_operand_reads_the_current_value() {
        let mut wire = Wire::new("operand")
            .with_shard(Set::new("step"))
            .with_shard(Add::new(Var::ContextVar("step".into())));
        assert_eq!(wire.run_once(Var::Int(21)).unwrap().output, Var::Int(42));
    }

    #[test]
    fn return_skips_the_rest_and_stop_ends_the_run() {
        let mut wire = Wire::new("early")
            .with_shard(Return)
            .with_shard(Add::new(100));
        assert_eq!(wire.run_once(Var::Int(1)).unwrap().output, Var::Int(1));

        let mut stopped = Wire::new("stopper").with_shard(Stop).with_shard(Fail::new("unreachable"));
        let result = stopped.run_once(Var::Int(9)).unwrap();
        assert_eq!(result.state, WireState::Stopped);
        assert_eq!(result.output, Var::Int(9));
    }

    #[test]
    fn fail_and_stop_mark_flow_stoppers() {
        let mut wire = Wire::new("failing").with_shard(Pass).with_shard(Fail::new("nope"));
        let result = wire.run_once(Var::Int(1)).unwrap();
        assert!(wire.composed().unwrap().flow_stopper);
        assert_eq!(result.error.unwrap().message, "nope");
    }

    #[test]
    fn pause_suspends_once() {
        let mut wire = Wire::new("paused").with_shard(Pause::default()).with_shard(Pass);
        let result = wire.run_once(Var::Int(4)).unwrap();
        assert_eq!(result.output, Var::Int(4));
    }

    #[test]
    fn pause_rejects_times_it_cannot_sleep() {
        let mut forever = Wire::new("forever").with_shard(Pause::new(f64::INFINITY));
        assert!(matches!(forever.run_once(Var::None), Err(ComposeError::Shard { position: 0, .. })));
        assert_eq!(forever.state(), WireState::Unscheduled);

        let mut pause = Pause::default();
        assert!(pause.set_param(0, Var::Float(1e30)).is_err());
        assert!(pause.set_param(0, Var::Float(f64::NAN)).is_err());
        assert!(pause.set_param(0, Var::Int(i64::MAX)).is_ok());
        assert!(pause.set_param(0, Var::Float(-1.0)).is_ok());
        assert_eq!(pause.suspend_point(), Ok(SuspendPoint::Yield));

        let mut huge = Pause::new(1e30);
        assert!(huge.suspend_point().is_err());
        huge.time = Var::Float(0.5);
        assert_eq!(huge.suspend_point(), Ok(SuspendPoint::Sleep(Duration::from_millis(500))));
    }

    #[test]
    fn buffers_are_reused_once_released() {
        let mut buffer = Buffer::new(4);
        let first = buffer.next_buffer();
        let second = buffer.next_buffer();
        assert!(!first.ptr_eq(&second));
        assert_eq!(buffer.pool.len(), 2);

        first.downcast_ref::<ByteBuffer>().unwrap().with(|data| data[0] = 7);
        drop(second);
        let third = buffer.next_buffer();
        assert!(!third.ptr_eq(&first));
        assert_eq!(buffer.pool.len(), 2);
        assert_eq!(first.downcast_ref::<ByteBuffer>().unwrap().with(|data| data[0]), 7);

        drop((first, third));
        for _ in 0..5 {
            let reused = buffer.next_buffer();
            assert_eq!(reused.downcast_ref::<ByteBuffer>().unwrap().with(|data| data.clone()), vec![0; 4]);
        }
        assert_eq!(buffer.pool.len(), 2);

        buffer.cleanup();
        assert!(buffer.leased.is_empty());
        assert_eq!(buffer.pool.free_len(), 2);
    }

    #[test]
    fn buffer_outputs_a_typed_object() {
        let mut wire = Wire::new("alloc").with_shard(Buffer::new(16));
        let result = wire.run_once(Var::None).unwrap();
        assert_eq!(wire.output_type(), Some(&TypeInfo::object(CORE_CC, BUFFER_TYPE)));
        let object = result.output.as_object().unwrap();
        assert_eq!(object.downcast_ref::<ByteBuffer>().unwrap().len(), 16);
        assert!(Buffer::default().set_param(0, Var::Int(-1)).is_err());
    }

    #[test]
    fn parameters_are_type_checked() {
        let mut add = Add::default();
        assert!(add.set_param(0, Var::from("one")).is_err());
        assert!(add.set_param(0, Var::Int(2)).is_ok());
        assert_eq!(add.param_index("Operand"), Some(0));
        assert_eq!(add.set_param(3, Var::Int(1)), Err(ParamError::OutOfRange(3)));

        let mut set = Set::default();
        assert!(set.set_param(0, Var::Int(1)).is_err());
        set.set_param(0, Var::from("x")).unwrap();
        assert_eq!(set.get_param(0), Var::from("x"));
    }
}
