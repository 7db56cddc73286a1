//! Units that exchange values between wires through named channels.

use crate::core::channels::broadcast::BroadcastChannel;
use crate::core::channels::mpmc::{MpmcChannel, RecvOutcome, SendOutcome};
use crate::core::compose::InstanceData;
use crate::core::context::Context;
use crate::core::params::{ParameterInfo, Parameterized};
use crate::core::shard::{Activation, Composable, Lifecycle, Shard, SuspendPoint};
use crate::core::types::{TypeInfo, Var, derive_type_info};
use crate::error::{ActivationError, ComposeError, ParamError};
use std::sync::Arc;

fn name_param() -> ParameterInfo {
    ParameterInfo::new("Name", "The name of the channel.", vec![TypeInfo::String])
}

fn no_copy_param() -> ParameterInfo {
    ParameterInfo::new(
        "NoCopy",
        "Clone values straight into the queue without recycled storage. Only objects are shared by handle.",
        vec![TypeInfo::Bool],
    )
}

fn type_param() -> ParameterInfo {
    ParameterInfo::new("Type", "The type of the values received.", vec![TypeInfo::Type])
}

fn buffer_param() -> ParameterInfo {
    ParameterInfo::new(
        "Buffer",
        "Values to collect before outputting them as a sequence.",
        vec![TypeInfo::Int],
    )
}

fn invalid(name: &str, value: &Var) -> ParamError {
    ParamError::InvalidValue {
        name: name.to_string(),
        found: derive_type_info(value).to_string(),
    }
}

fn require_name(name: &str, shard: &str) -> Result<(), ComposeError> {
    if name.is_empty() {
        Err(ComposeError::message(format!("{shard} requires a channel Name")))
    } else {
        Ok(())
    }
}

fn init_failed(error: ComposeError) -> ActivationError {
    ActivationError::Failed(error.to_string())
}

/// Settings shared by the sending units.
#[derive(Debug, Default)]
struct SenderParams {
    name: String,
    no_copy: bool,
    value_type: TypeInfo,
}

impl SenderParams {
    fn parameters() -> Vec<ParameterInfo> {
        vec![name_param(), no_copy_param()]
    }

    fn set(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::String(name)) => self.name = name,
            (1, Var::Bool(no_copy)) => self.no_copy = no_copy,
            (0, other) => return Err(invalid("Name", &other)),
            (1, other) => return Err(invalid("NoCopy", &other)),
            (index, _) => return Err(ParamError::OutOfRange(index)),
        }
        Ok(())
    }

    fn get(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            1 => Var::Bool(self.no_copy),
            _ => Var::None,
        }
    }
}

/// Sends its input into a point-to-point channel and passes it through.
///
/// Suspends while the queue is full. Sending into a closed channel drops the
/// value.
#[derive(Default)]
pub struct Produce {
    params: SenderParams,
    channel: Option<Arc<MpmcChannel>>,
}

impl Produce {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            params: SenderParams {
                name: name.into(),
                ..SenderParams::default()
            },
            channel: None,
        }
    }

    pub fn no_copy(mut self, no_copy: bool) -> Self {
        self.params.no_copy = no_copy;
        self
    }
}

impl Shard for Produce {
    fn name(&self) -> &'static str {
        "Produce"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        let Some(channel) = &self.channel else {
            return Ok(Activation::Continue(input.clone()));
        };
        match channel.send(input) {
            SendOutcome::Delivered => Ok(Activation::Continue(input.clone())),
            SendOutcome::Full => Ok(Activation::Suspend(SuspendPoint::Yield)),
            SendOutcome::Closed => {
                log::debug!("channel {} is closed, value dropped", self.params.name);
                Ok(Activation::Continue(input.clone()))
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

impl Composable for Produce {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        require_name(&self.params.name, "Produce")?;
        self.params.value_type = data.input_type.clone();
        data.channels
            .get_and_init_mpmc(&self.params.name, &data.input_type, self.params.no_copy)?;
        Ok(data.input_type.clone())
    }
}

impl Parameterized for Produce {
    fn parameters(&self) -> Vec<ParameterInfo> {
        SenderParams::parameters()
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        self.params.set(index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        self.params.get(index)
    }
}

impl Lifecycle for Produce {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        let channel = context
            .channels()
            .get_and_init_mpmc(&self.params.name, &self.params.value_type, self.params.no_copy)
            .map_err(init_failed)?;
        self.channel = Some(channel);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.channel = None;
    }
}

/// Publishes its input to every listener of a broadcast channel and passes
/// it through.
#[derive(Default)]
pub struct Broadcast {
    params: SenderParams,
    channel: Option<Arc<BroadcastChannel>>,
}

impl Broadcast {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            params: SenderParams {
                name: name.into(),
                ..SenderParams::default()
            },
            channel: None,
        }
    }
}

impl Shard for Broadcast {
    fn name(&self) -> &'static str {
        "Broadcast"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        if let Some(channel) = &self.channel {
            let delivered = channel.publish(input);
            log::trace!("broadcast {} delivered to {} listeners", self.params.name, delivered);
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
}

impl Composable for Broadcast {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        require_name(&self.params.name, "Broadcast")?;
        self.params.value_type = data.input_type.clone();
        data.channels
            .get_and_init_broadcast(&self.params.name, &data.input_type, self.params.no_copy)?;
        Ok(data.input_type.clone())
    }
}

impl Parameterized for Broadcast {
    fn parameters(&self) -> Vec<ParameterInfo> {
        SenderParams::parameters()
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        self.params.set(index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        self.params.get(index)
    }
}

impl Lifecycle for Broadcast {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        let channel = context
            .channels()
            .get_and_init_broadcast(&self.params.name, &self.params.value_type, self.params.no_copy)
            .map_err(init_failed)?;
        self.channel = Some(channel);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.channel = None;
    }
}

/// Settings and receive logic shared by the receiving units.
#[derive(Debug)]
struct ReceiverParams {
    name: String,
    value_type: TypeInfo,
    buffer: usize,
    no_copy: bool,
    pending: Vec<Var>,
    /// Copy of the previous output, handed back to the channel for reuse.
    last: Option<Var>,
}

impl Default for ReceiverParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            value_type: TypeInfo::None,
            buffer: 1,
            no_copy: false,
            pending: Vec::new(),
            last: None,
        }
    }
}

impl ReceiverParams {
    fn parameters() -> Vec<ParameterInfo> {
        vec![name_param(), type_param(), buffer_param(), no_copy_param()]
    }

    fn set(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::String(name)) => self.name = name,
            (1, Var::Type(ty)) => self.value_type = ty,
            (1, Var::None) => self.value_type = TypeInfo::None,
            (2, Var::Int(n)) if n >= 1 => self.buffer = n as usize,
            (3, Var::Bool(no_copy)) => self.no_copy = no_copy,
            (index, other) if index < 4 => {
                let name = Self::parameters()[index].name;
                return Err(invalid(name, &other));
            }
            (index, _) => return Err(ParamError::OutOfRange(index)),
        }
        Ok(())
    }

    fn get(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            1 => Var::Type(self.value_type.clone()),
            2 => Var::Int(self.buffer as i64),
            3 => Var::Bool(self.no_copy),
            _ => Var::None,
        }
    }

    fn compose(&self, shard: &str) -> Result<TypeInfo, ComposeError> {
        require_name(&self.name, shard)?;
        if self.value_type.is_none() {
            return Err(ComposeError::message(format!("{shard} requires a Type")));
        }
        if self.buffer > 1 {
            Ok(TypeInfo::seq_of(self.value_type.clone()))
        } else {
            Ok(self.value_type.clone())
        }
    }

    /// Drains `channel` into the output. Suspends while nothing is queued and
    /// stops the wire once the channel is closed and drained.
    fn receive(&mut self, channel: &MpmcChannel) -> Activation {
        self.recycle_last(channel);
        loop {
            match channel.try_recv() {
                RecvOutcome::Value(value) if self.buffer <= 1 => return self.output(channel, value),
                RecvOutcome::Value(value) => {
                    self.pending.push(value);
                    if self.pending.len() >= self.buffer {
                        let batch = Var::Seq(std::mem::take(&mut self.pending));
                        return self.output(channel, batch);
                    }
                }
                RecvOutcome::Empty => return Activation::Suspend(SuspendPoint::Yield),
                RecvOutcome::EndOfStream if self.pending.is_empty() => {
                    log::debug!("channel {} reached end of stream", self.name);
                    return Activation::Stop(Var::None);
                }
                RecvOutcome::EndOfStream => {
                    let batch = Var::Seq(std::mem::take(&mut self.pending));
                    return self.output(channel, batch);
                }
            }
        }
    }

    fn output(&mut self, channel: &MpmcChannel, value: Var) -> Activation {
        if !channel.header().no_copy() {
            self.last = Some(value.clone());
        }
        Activation::Continue(value)
    }

    /// Returns the previous output's storage to `channel`. Batches go back
    /// one value at a time, the way they were sent.
    fn recycle_last(&mut self, channel: &MpmcChannel) {
        match self.last.take() {
            Some(Var::Seq(values)) if self.buffer > 1 => {
                for value in values {
                    channel.recycle(value);
                }
            }
            Some(value) => channel.recycle(value),
            None => {}
        }
    }

    fn release(&mut self, channel: Option<&MpmcChannel>) {
        self.pending.clear();
        match channel {
            Some(channel) => self.recycle_last(channel),
            None => self.last = None,
        }
    }
}

/// Takes values from a point-to-point channel.
#[derive(Default)]
pub struct Consume {
    params: ReceiverParams,
    channel: Option<Arc<MpmcChannel>>,
}

impl Consume {
    pub fn new(name: impl Into<String>, value_type: TypeInfo) -> Self {
        Self {
            params: ReceiverParams {
                name: name.into(),
                value_type,
                ..ReceiverParams::default()
            },
            channel: None,
        }
    }

    pub fn buffer(mut self, size: usize) -> Self {
        self.params.buffer = size.max(1);
        self
    }
}

impl Shard for Consume {
    fn name(&self) -> &'static str {
        "Consume"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::None]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        match &self.channel {
            Some(channel) => Ok(self.params.receive(channel)),
            None => Ok(Activation::Stop(Var::None)),
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

impl Composable for Consume {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        let output = self.params.compose("Consume")?;
        data.channels
            .get_and_init_mpmc(&self.params.name, &self.params.value_type, self.params.no_copy)?;
        Ok(output)
    }
}

impl Parameterized for Consume {
    fn parameters(&self) -> Vec<ParameterInfo> {
        ReceiverParams::parameters()
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        self.params.set(index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        self.params.get(index)
    }
}

impl Lifecycle for Consume {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        let channel = context
            .channels()
            .get_and_init_mpmc(&self.params.name, &self.params.value_type, self.params.no_copy)
            .map_err(init_failed)?;
        self.channel = Some(channel);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.params.release(self.channel.as_deref());
        self.channel = None;
    }
}

/// Receives every value published on a broadcast channel from warmup on.
#[derive(Default)]
pub struct Listen {
    params: ReceiverParams,
    subscription: Option<Arc<MpmcChannel>>,
}

impl Listen {
    pub fn new(name: impl Into<String>, value_type: TypeInfo) -> Self {
        Self {
            params: ReceiverParams {
                name: name.into(),
                value_type,
                ..ReceiverParams::default()
            },
            subscription: None,
        }
    }

    pub fn buffer(mut self, size: usize) -> Self {
        self.params.buffer = size.max(1);
        self
    }
}

impl Shard for Listen {
    fn name(&self) -> &'static str {
        "Listen"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::None]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
        match &self.subscription {
            Some(subscription) => Ok(self.params.receive(subscription)),
            None => Ok(Activation::Stop(Var::None)),
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

impl Composable for Listen {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError> {
        let output = self.params.compose("Listen")?;
        data.channels
            .get_and_init_broadcast(&self.params.name, &self.params.value_type, self.params.no_copy)?;
        Ok(output)
    }
}

impl Parameterized for Listen {
    fn parameters(&self) -> Vec<ParameterInfo> {
        ReceiverParams::parameters()
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        self.params.set(index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        self.params.get(index)
    }
}

impl Lifecycle for Listen {
    fn warmup(&mut self, context: &mut Context<'_>) -> Result<(), ActivationError> {
        let channel = context
            .channels()
            .get_and_init_broadcast(&self.params.name, &self.params.value_type, self.params.no_copy)
            .map_err(init_failed)?;
        self.subscription = Some(channel.subscribe());
        Ok(())
    }

    fn cleanup(&mut self) {
        self.params.release(self.subscription.as_deref());
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
    }
}

/// Name-only settings of the channel maintenance units.
#[derive(Debug, Default)]
struct ChannelName {
    name: String,
}

impl ChannelName {
    fn set(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        match (index, value) {
            (0, Var::String(name)) => {
                self.name = name;
                Ok(())
            }
            (0, other) => Err(invalid("Name", &other)),
            (index, _) => Err(ParamError::OutOfRange(index)),
        }
    }

    fn get(&self, index: usize) -> Var {
        match index {
            0 => Var::String(self.name.clone()),
            _ => Var::None,
        }
    }
}

/// Closes a channel. Consumers drain what is queued, then stop.
#[derive(Debug, Default)]
pub struct Complete {
    channel: ChannelName,
}

impl Complete {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            channel: ChannelName { name: name.into() },
        }
    }
}

impl Shard for Complete {
    fn name(&self) -> &'static str {
        "Complete"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        match context.channels().shared(&self.channel.name) {
            Ok(channel) => {
                if channel.close() {
                    log::warn!("channel {} was already closed", self.channel.name);
                }
            }
            Err(e) => log::warn!("cannot complete channel: {e}"),
        }
        Ok(Activation::Continue(input.clone()))
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }
}

impl Parameterized for Complete {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![name_param()]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        self.channel.set(index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        self.channel.get(index)
    }
}

/// Discards everything queued on a channel.
#[derive(Debug, Default)]
pub struct Flush {
    channel: ChannelName,
}

impl Flush {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            channel: ChannelName { name: name.into() },
        }
    }
}

impl Shard for Flush {
    fn name(&self) -> &'static str {
        "Flush"
    }

    fn input_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn output_types(&self) -> Vec<TypeInfo> {
        vec![TypeInfo::Any]
    }

    fn activate(&mut self, context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
        match context.channels().shared(&self.channel.name) {
            Ok(channel) => {
                let flushed = channel.flush();
                log::debug!("flushed {} values from channel {}", flushed, self.channel.name);
            }
            Err(e) => log::warn!("cannot flush channel: {e}"),
        }
        Ok(Activation::Continue(input.clone()))
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        Some(self)
    }
}

impl Parameterized for Flush {
    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![name_param()]
    }

    fn set_param(&mut self, index: usize, value: Var) -> Result<(), ParamError> {
        self.channel.set(index, value)
    }

    fn get_param(&self, index: usize) -> Var {
        self.channel.get(index)
    }
}
