use crate::core::compose::InstanceData;
use crate::core::context::Context;
use crate::core::params::Parameterized;
use crate::core::types::{ExposedTypeInfo, TypeInfo, Var};
use crate::error::{ActivationError, ComposeError};
use std::time::Duration;

/// Where a suspended activation wants to be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPoint {
    /// Resume on the next scheduling pass.
    Yield,
    /// Resume once the duration has elapsed.
    Sleep(Duration),
}

/// What a unit's activation asks the wire to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Hand the value to the next unit.
    Continue(Var),
    /// Not done yet. The same unit is activated again, with the same input,
    /// when the wire resumes.
    Suspend(SuspendPoint),
    /// End the current iteration early with this value.
    Return(Var),
    /// End the run successfully with this value.
    Stop(Var),
}

/// A computation unit.
///
/// Every unit declares its accepted input types, the output types it may
/// produce, and an activation. Optional capabilities are advertised through
/// the `as_*` accessors; the defaults advertise none.
pub trait Shard: Send {
    fn name(&self) -> &'static str;

    fn help(&self) -> &'static str {
        ""
    }

    /// Accepted input types. A single `None` accepts any input.
    fn input_types(&self) -> Vec<TypeInfo>;

    fn output_types(&self) -> Vec<TypeInfo>;

    fn activate(&mut self, context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError>;

    fn as_composable(&mut self) -> Option<&mut dyn Composable> {
        None
    }

    fn as_parameterized(&mut self) -> Option<&mut dyn Parameterized> {
        None
    }

    fn as_lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        None
    }

    fn as_variables(&self) -> Option<&dyn Variables> {
        None
    }
}

/// Units whose output type depends on their input or parameters.
pub trait Composable {
    fn compose(&mut self, data: &InstanceData) -> Result<TypeInfo, ComposeError>;
}

/// Units that acquire resources before a run and release them after.
pub trait Lifecycle {
    fn warmup(&mut self, _context: &mut Context<'_>) -> Result<(), ActivationError> {
        Ok(())
    }

    /// Runs exactly once per run, whatever ended it.
    fn cleanup(&mut self) {}
}

/// Units that publish or depend on named variables.
pub trait Variables {
    fn exposed_variables(&self) -> Vec<ExposedTypeInfo> {
        Vec::new()
    }

    fn required_variables(&self) -> Vec<ExposedTypeInfo> {
        Vec::new()
    }

    /// Variables the unit binds for the duration of its nested wires only,
    /// given the unit's input type.
    fn scoped_variables(&self, _input_type: &TypeInfo) -> Vec<ExposedTypeInfo> {
        Vec::new()
    }
}

/// Which optional hooks a unit provides, probed once per instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub compose: bool,
    pub parameters: bool,
    pub lifecycle: bool,
    pub variables: bool,
}

impl Capabilities {
    pub fn probe(shard: &mut dyn Shard) -> Self {
        Self {
            compose: shard.as_composable().is_some(),
            parameters: shard.as_parameterized().is_some(),
            lifecycle: shard.as_lifecycle().is_some(),
            variables: shard.as_variables().is_some(),
        }
    }
}

/// A unit placed in a wire, with its capability table and source location.
pub struct ShardInstance {
    pub(crate) shard: Box<dyn Shard>,
    pub(crate) caps: Capabilities,
    pub(crate) line: u32,
    pub(crate) column: u32,
    pub(crate) warmed_up: bool,
}

impl ShardInstance {
    pub fn new(mut shard: Box<dyn Shard>) -> Self {
        let caps = Capabilities::probe(shard.as_mut());
        Self {
            shard,
            caps,
            line: 0,
            column: 0,
            warmed_up: false,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn name(&self) -> &'static str {
        self.shard.name()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn location(&self) -> (u32, u32) {
        (self.line, self.column)
    }

    pub fn shard(&self) -> &dyn Shard {
        self.shard.as_ref()
    }

    pub fn shard_mut(&mut self) -> &mut dyn Shard {
        self.shard.as_mut()
    }

    pub(crate) fn cleanup(&mut self) {
        if !self.warmed_up {
            return;
        }
        self.warmed_up = false;
        if self.caps.lifecycle
            && let Some(lifecycle) = self.shard.as_lifecycle()
        {
            lifecycle.cleanup();
        }
    }
}

impl std::fmt::Debug for ShardInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardInstance")
            .field("name", &self.name())
            .field("caps", &self.caps)
            .field("line", &self.line)
            .field("column", &self.column)
            .finish()
    }
}
