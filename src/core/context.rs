use crate::core::channels::ChannelRegistry;
use crate::core::scope::{Scope, VarSlot};
use crate::core::types::Var;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// What a unit sees of its wire while warming up or activating.
pub struct Context<'a> {
    pub(crate) wire_name: &'a str,
    pub(crate) wire_id: Uuid,
    pub(crate) wire_input: &'a Var,
    pub(crate) scope: &'a Arc<Scope>,
    pub(crate) channels: &'a Arc<ChannelRegistry>,
    pub(crate) stop_flag: &'a AtomicBool,
    pub(crate) iteration: u64,
}

impl Context<'_> {
    pub fn wire_name(&self) -> &str {
        self.wire_name
    }

    pub fn wire_id(&self) -> Uuid {
        self.wire_id
    }

    /// The value the wire was scheduled with.
    pub fn wire_input(&self) -> &Var {
        self.wire_input
    }

    /// The wire's own scope. Its parent chain reaches the mesh variables.
    pub fn scope(&self) -> &Arc<Scope> {
        self.scope
    }

    pub fn find_variable(&self, name: &str) -> Option<VarSlot> {
        self.scope.find(name)
    }

    pub fn declare_variable(&self, name: &str) -> VarSlot {
        self.scope.declare(name)
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        self.channels
    }

    /// True once someone asked the wire to stop. Units that wait on external
    /// events should check this and give up.
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Completed iterations of a looped wire.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }
}
