//! Cross-wire value exchange.
//!
//! Channels are looked up by name in a [`ChannelRegistry`]. A name starts out
//! bound to a no-op placeholder; the first unit that composes against it
//! decides whether it becomes a point-to-point queue or a broadcast fan-out.
//! Later users must agree on that kind and on the value type.

pub mod broadcast;
pub mod mpmc;

use crate::core::types::{TypeInfo, match_types};
use crate::error::ComposeError;
use broadcast::BroadcastChannel;
use mpmc::MpmcChannel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Default queue capacity of a point-to-point channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// State shared by every channel kind.
#[derive(Debug)]
pub struct ChannelHeader {
    type_info: RwLock<TypeInfo>,
    closed: AtomicBool,
    no_copy: bool,
}

impl ChannelHeader {
    pub fn new(type_info: TypeInfo, no_copy: bool) -> Self {
        Self {
            type_info: RwLock::new(type_info),
            closed: AtomicBool::new(false),
            no_copy,
        }
    }

    pub fn type_info(&self) -> TypeInfo {
        self.type_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn no_copy(&self) -> bool {
        self.no_copy
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Irreversibly closes. Returns whether it was already closed.
    pub fn close(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }

    /// Checks `requested` against the declared type. An undeclared (`None`)
    /// type is replaced by the first concrete declaration.
    fn verify_type(&self, name: &str, requested: &TypeInfo) -> Result<(), ComposeError> {
        let mut current = self.type_info.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            *current = requested.clone();
            return Ok(());
        }
        if requested.is_none()
            || match_types(requested, &current)
            || match_types(&current, requested)
        {
            return Ok(());
        }
        Err(ComposeError::Channel {
            name: name.to_string(),
            reason: format!("declared as {current}, used as {requested}"),
        })
    }
}

/// A registry entry.
pub enum Channel {
    Dummy,
    Mpmc(Arc<MpmcChannel>),
    Broadcast(Arc<BroadcastChannel>),
}

impl Channel {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Channel::Dummy => "dummy",
            Channel::Mpmc(_) => "mpmc",
            Channel::Broadcast(_) => "broadcast",
        }
    }
}

/// A resolved, non-placeholder channel of either kind.
#[derive(Clone)]
pub enum SharedChannel {
    Mpmc(Arc<MpmcChannel>),
    Broadcast(Arc<BroadcastChannel>),
}

impl SharedChannel {
    pub fn close(&self) -> bool {
        match self {
            SharedChannel::Mpmc(c) => c.close(),
            SharedChannel::Broadcast(c) => c.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            SharedChannel::Mpmc(c) => c.is_closed(),
            SharedChannel::Broadcast(c) => c.is_closed(),
        }
    }

    pub fn flush(&self) -> usize {
        match self {
            SharedChannel::Mpmc(c) => c.flush(),
            SharedChannel::Broadcast(c) => c.flush(),
        }
    }
}

/// Named channels shared by every wire of a mesh.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Mutex<Channel>>>>,
    capacity: usize,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Registry whose point-to-point queues hold at most `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the entry for `name`, creating a placeholder if needed.
    pub fn get(&self, name: &str) -> Arc<Mutex<Channel>> {
        if let Some(entry) = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return entry.clone();
        }
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Channel::Dummy)))
            .clone()
    }

    /// Resolves `name` as a point-to-point channel carrying `type_info`.
    pub fn get_and_init_mpmc(
        &self,
        name: &str,
        type_info: &TypeInfo,
        no_copy: bool,
    ) -> Result<Arc<MpmcChannel>, ComposeError> {
        let entry = self.get(name);
        let mut channel = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*channel, Channel::Dummy) {
            let created = Arc::new(MpmcChannel::new(type_info.clone(), no_copy, self.capacity));
            *channel = Channel::Mpmc(created.clone());
            log::debug!("channel {name} initialized as mpmc of {type_info}");
            return Ok(created);
        }
        match &*channel {
            Channel::Mpmc(existing) => {
                existing.header().verify_type(name, type_info)?;
                Ok(existing.clone())
            }
            other => Err(kind_conflict(name, other, "mpmc")),
        }
    }

    /// Resolves `name` as a broadcast channel carrying `type_info`.
    pub fn get_and_init_broadcast(
        &self,
        name: &str,
        type_info: &TypeInfo,
        no_copy: bool,
    ) -> Result<Arc<BroadcastChannel>, ComposeError> {
        let entry = self.get(name);
        let mut channel = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*channel, Channel::Dummy) {
            let created = Arc::new(BroadcastChannel::new(type_info.clone(), no_copy, self.capacity));
            *channel = Channel::Broadcast(created.clone());
            log::debug!("channel {name} initialized as broadcast of {type_info}");
            return Ok(created);
        }
        match &*channel {
            Channel::Broadcast(existing) => {
                existing.header().verify_type(name, type_info)?;
                Ok(existing.clone())
            }
            other => Err(kind_conflict(name, other, "broadcast")),
        }
    }

    /// Resolves `name` as whichever kind it already is.
    pub fn shared(&self, name: &str) -> Result<SharedChannel, ComposeError> {
        let entry = self.get(name);
        let channel = entry.lock().unwrap_or_else(PoisonError::into_inner);
        match &*channel {
            Channel::Mpmc(c) => Ok(SharedChannel::Mpmc(c.clone())),
            Channel::Broadcast(c) => Ok(SharedChannel::Broadcast(c.clone())),
            Channel::Dummy => Err(ComposeError::Channel {
                name: name.to_string(),
                reason: "no producer or consumer has declared this channel yet".to_string(),
            }),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Closes every channel, waking all consumers into end-of-stream.
    pub fn close_all(&self) {
        let entries: Vec<Arc<Mutex<Channel>>> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for entry in entries {
            match &*entry.lock().unwrap_or_else(PoisonError::into_inner) {
                Channel::Mpmc(c) => {
                    c.close();
                }
                Channel::Broadcast(c) => {
                    c.close();
                }
                Channel::Dummy => {}
            }
        }
    }
}

fn kind_conflict(name: &str, existing: &Channel, requested: &str) -> ComposeError {
    ComposeError::Channel {
        name: name.to_string(),
        reason: format!(
            "already in use as {}, cannot be used as {requested}",
            existing.kind_name()
        ),
    }
}
