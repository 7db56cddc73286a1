//! The mesh: a worker pool that runs scheduled wires concurrently.
//!
//! Each scheduled wire becomes one tokio task driving [`Wire::resume`]. A
//! wire runs on one task at a time, so its units never activate
//! concurrently, while different wires make progress in parallel on the
//! runtime's workers.

use crate::core::channels::ChannelRegistry;
use crate::core::compose::{ComposeEntry, ComposeResult, InstanceData, compose_wire};
use crate::core::scope::{Scope, VarSlot};
use crate::core::shard::SuspendPoint;
use crate::core::telemetry::{MemoryTelemetry, Telemetry, TraceEntry};
use crate::core::types::{TypeInfo, Var, derive_type_info};
use crate::core::wire::{Progress, SharedWire, Wire, WireResult, WireState, WireStatus};
use crate::error::MeshError;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

/// Mesh settings. Missing JSON fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub name: String,
    /// Worker threads. `None` picks one less than the available hardware
    /// threads (at least one).
    pub workers: Option<usize>,
    /// Record a trace entry for every activation.
    pub telemetry: bool,
    /// Capacity of point-to-point channel queues.
    pub channel_capacity: usize,
    /// Finished runs kept for the next wait. Older ones are dropped when a
    /// new run is scheduled.
    pub retained_results: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            name: "mesh".to_string(),
            workers: None,
            telemetry: false,
            channel_capacity: crate::core::channels::DEFAULT_CAPACITY,
            retained_results: 1024,
        }
    }
}

impl MeshConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn telemetry(mut self, enabled: bool) -> Self {
        self.telemetry = enabled;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn retained_results(mut self, count: usize) -> Self {
        self.retained_results = count;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The number of workers the mesh will start.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers).max(1)
    }
}

#[cfg(any(target_arch = "wasm32", target_os = "android", target_os = "ios"))]
fn default_workers() -> usize {
    2
}

#[cfg(not(any(target_arch = "wasm32", target_os = "android", target_os = "ios")))]
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn lock(wire: &SharedWire) -> MutexGuard<'_, Wire> {
    wire.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observes and controls one scheduled run.
#[derive(Clone)]
pub struct WireHandle {
    id: Uuid,
    name: String,
    wire: SharedWire,
    status: Arc<WireStatus>,
}

impl WireHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire(&self) -> &SharedWire {
        &self.wire
    }

    pub fn state(&self) -> WireState {
        self.status.state()
    }

    /// Asks the wire to stop. It stops at its next unit boundary or
    /// suspension point.
    pub fn stop(&self) {
        self.status.request_stop();
    }

    /// Result of the run, once it ended.
    pub fn result(&self) -> Option<WireResult> {
        if self.state().is_terminal() {
            self.status.result()
        } else {
            None
        }
    }

    /// Waits for the run to end. Works from any async context, including
    /// runtimes other than the mesh's.
    pub async fn wait(&self) -> WireResult {
        let state = self.status.state();
        let result = self.status.finished().await;
        result.unwrap_or(WireResult {
            state,
            output: Var::None,
            error: None,
        })
    }
}

impl std::fmt::Debug for WireHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

pub struct Mesh {
    config: MeshConfig,
    runtime: Option<Runtime>,
    channels: Arc<ChannelRegistry>,
    variables: Arc<Scope>,
    /// Runs not yet collected by a wait, keyed by run: a rescheduled wire
    /// gets a new entry.
    scheduled: Arc<Mutex<HashMap<u64, WireHandle>>>,
    next_run: AtomicU64,
    telemetry: Option<Arc<dyn Telemetry>>,
}

impl Mesh {
    /// Starts the worker pool.
    pub fn new(config: MeshConfig) -> Result<Self, MeshError> {
        let workers = config.worker_count();
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(format!("{}-worker", config.name))
            .enable_time()
            .build()?;
        log::info!("mesh {} started with {} workers", config.name, workers);

        let telemetry: Option<Arc<dyn Telemetry>> = if config.telemetry {
            Some(Arc::new(MemoryTelemetry::new()))
        } else {
            None
        };
        Ok(Self {
            channels: Arc::new(ChannelRegistry::with_capacity(config.channel_capacity)),
            config,
            runtime: Some(runtime),
            variables: Arc::new(Scope::new()),
            scheduled: Arc::new(Mutex::new(HashMap::new())),
            next_run: AtomicU64::new(0),
            telemetry,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count()
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Mesh-level variables, inherited by every wire composed on this mesh.
    pub fn variables(&self) -> &Arc<Scope> {
        &self.variables
    }

    /// Publishes a mesh variable. Protected variables are read-only to wires.
    pub fn set_variable(&self, name: &str, value: impl Into<Var>, protected: bool) -> VarSlot {
        self.variables.insert(name, value.into(), protected)
    }

    /// Replaces the trace collector. Applies to wires scheduled afterwards.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn telemetry(&self) -> Option<&Arc<dyn Telemetry>> {
        self.telemetry.as_ref()
    }

    pub fn traces(&self) -> Vec<TraceEntry> {
        self.telemetry
            .as_ref()
            .map(|t| t.snapshot())
            .unwrap_or_default()
    }

    fn instance_data(&self, wire: &Wire, input_type: TypeInfo) -> InstanceData {
        let mut data = InstanceData::new(input_type)
            .with_shared(self.variables.exposed_info())
            .with_channels(self.channels.clone());
        data.wire_name = wire.name().to_string();
        data
    }

    /// Composes `wire` against the mesh variables and channels.
    pub fn compose(&self, wire: &SharedWire, input_type: TypeInfo) -> Result<ComposeResult, MeshError> {
        let _composing = ComposeEntry::enter(wire);
        let mut guard = lock(wire);
        let data = self.instance_data(&guard, input_type);
        compose_wire(&mut guard, &data).map_err(|source| MeshError::Compose {
            wire: guard.name().to_string(),
            source,
        })
    }

    /// Composes, warms up and starts `wire` with `input`.
    ///
    /// Nothing is spawned if composition or warmup fails.
    pub fn schedule(&self, wire: &SharedWire, input: impl Into<Var>) -> Result<WireHandle, MeshError> {
        let input = input.into();
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| MeshError::Terminated(self.config.name.clone()))?;

        let handle = {
            let _composing = ComposeEntry::enter(wire);
            let mut guard = lock(wire);
            if guard.state().is_active() || guard.is_mid_run() {
                return Err(MeshError::AlreadyScheduled(guard.name().to_string()));
            }
            let data = self.instance_data(&guard, derive_type_info(&input));
            compose_wire(&mut guard, &data).map_err(|source| MeshError::Compose {
                wire: guard.name().to_string(),
                source,
            })?;
            guard.set_telemetry(self.telemetry.clone());
            guard
                .begin_run(input, Some(self.variables.clone()), self.channels.clone())
                .map_err(|source| MeshError::Warmup {
                    wire: guard.name().to_string(),
                    source,
                })?;
            WireHandle {
                id: guard.id(),
                name: guard.name().to_string(),
                wire: wire.clone(),
                status: guard.status().clone(),
            }
        };

        log::debug!("mesh {}: scheduled wire {} ({})", self.config.name, handle.name, handle.id);
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        {
            let mut scheduled = self.scheduled.lock().unwrap_or_else(PoisonError::into_inner);
            self.prune(&mut scheduled);
            scheduled.insert(run, handle.clone());
        }

        let guard = RunGuard {
            wire: wire.clone(),
            status: handle.status.clone(),
        };
        let task = runtime.spawn(drive(guard));
        let (id, name) = (handle.id, handle.name.clone());
        runtime.spawn(async move {
            if let Err(e) = task.await
                && e.is_panic()
            {
                log::error!("wire {name} ({id}) panicked, aborting");
                std::process::abort();
            }
        });
        Ok(handle)
    }

    /// Drops the oldest finished runs beyond `retained_results`.
    fn prune(&self, scheduled: &mut HashMap<u64, WireHandle>) {
        let mut finished: Vec<u64> = scheduled
            .iter()
            .filter(|(_, h)| h.state().is_terminal())
            .map(|(run, _)| *run)
            .collect();
        let Some(excess) = finished.len().checked_sub(self.config.retained_results) else {
            return;
        };
        finished.sort_unstable();
        for run in &finished[..excess] {
            scheduled.remove(run);
        }
        if excess > 0 {
            log::debug!("mesh {}: dropped {} uncollected results", self.config.name, excess);
        }
    }

    /// Handles of every wire currently running or suspended.
    pub fn running(&self) -> Vec<WireHandle> {
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| h.state().is_active())
            .cloned()
            .collect()
    }

    fn handles(&self) -> Vec<WireHandle> {
        self.scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Takes every run scheduled so far, in scheduling order.
    fn drain(&self) -> Vec<WireHandle> {
        let mut runs: Vec<(u64, WireHandle)> = self
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        runs.sort_by_key(|(run, _)| *run);
        runs.into_iter().map(|(_, handle)| handle).collect()
    }

    pub fn stop_all(&self) {
        for handle in self.handles() {
            handle.stop();
        }
    }

    /// Waits for every wire scheduled since the last wait, from async code.
    /// Results are in scheduling order.
    pub async fn wait_all_async(&self) -> Vec<WireResult> {
        let handles = self.drain();
        futures::future::join_all(handles.iter().map(|h| h.wait())).await
    }

    /// Blocks until every wire scheduled since the last wait has ended and
    /// returns their results in scheduling order. Must not be called from
    /// inside an async context.
    pub fn wait_all(&self) -> Vec<WireResult> {
        let handles = self.drain();
        match &self.runtime {
            Some(runtime) => {
                runtime.block_on(futures::future::join_all(handles.iter().map(|h| h.wait())))
            }
            None => Vec::new(),
        }
    }

    /// Runs `future` to completion on the mesh's runtime.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> Result<F::Output, MeshError> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(MeshError::Terminated(self.config.name.clone())),
        }
    }

    /// Stops every wire, waits for them, closes the channels and shuts the
    /// worker pool down. Later calls to `schedule` fail.
    pub fn terminate(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.stop_all();
        if tokio::runtime::Handle::try_current().is_ok() {
            // Blocking is not allowed here; wires finish in the background.
            runtime.shutdown_background();
        } else {
            let handles = self.drain();
            runtime.block_on(futures::future::join_all(handles.iter().map(|h| h.wait())));
            runtime.shutdown_background();
        }
        self.channels.close_all();
        if let Some(telemetry) = &self.telemetry {
            telemetry.flush();
        }
        log::info!("mesh {} terminated", self.config.name);
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Ends its run if the driving task is dropped first, as happens when the
/// runtime shuts down under a suspended wire.
struct RunGuard {
    wire: SharedWire,
    status: Arc<WireStatus>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let mut wire = lock(&self.wire);
        if wire.is_mid_run() && Arc::ptr_eq(wire.status(), &self.status) {
            wire.abandon();
        }
    }
}

/// Drives one run to its end, yielding the worker at every suspension.
async fn drive(guard: RunGuard) -> WireResult {
    let RunGuard { wire, status } = &guard;
    loop {
        let progress = lock(wire).resume();
        match progress {
            Progress::Suspended(SuspendPoint::Yield) => tokio::task::yield_now().await,
            Progress::Suspended(SuspendPoint::Sleep(duration)) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = status.stopped() => {}
                }
            }
            Progress::Finished(output) => return lock(wire).end_run(Ok(output)),
            Progress::Failed(failure) => return lock(wire).end_run(Err(failure)),
        }
    }
}
