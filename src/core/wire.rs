//! Wires: ordered unit sequences with their own variable scope, driven as an
//! explicit state machine.
//!
//! A run goes `warmup -> start -> resume* -> end_run`. `resume` activates
//! units in order until one suspends, the iteration completes, or the run
//! ends. Suspension returns control to the caller (the mesh driver or
//! [`Wire::run_once`]) instead of blocking, and the next `resume` activates
//! the same unit again with the same input.

use crate::core::channels::ChannelRegistry;
use crate::core::compose::{ComposeResult, InstanceData, compose_wire};
use crate::core::context::Context;
use crate::core::invariant::{self, assert_invariant};
use crate::core::scope::Scope;
use crate::core::shard::{Activation, Shard, ShardInstance, SuspendPoint};
use crate::core::telemetry::{Telemetry, TraceEntry, TraceOutcome, now_micros};
use crate::core::types::{TypeInfo, Var, derive_type_info};
use crate::error::{ActivationError, ComposeError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

/// A wire shared between the mesh, handles and sub-wire parameters.
pub type SharedWire = Arc<Mutex<Wire>>;

/// Externally observable state of a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireState {
    Unscheduled,
    Running,
    Suspended,
    Stopped,
    Failed,
}

impl WireState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WireState::Stopped | WireState::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, WireState::Running | WireState::Suspended)
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFailure {
    pub message: String,
    /// Name of the unit that raised the error.
    pub unit: String,
    pub position: usize,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct WireResult {
    pub state: WireState,
    pub output: Var,
    pub error: Option<WireFailure>,
}

/// What a call to [`Wire::resume`] ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Suspended(SuspendPoint),
    Finished(Var),
    Failed(WireFailure),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RunState {
    Idle,
    Running { position: usize },
    SuspendedAt { position: usize, point: SuspendPoint },
}

/// State of one run, shared between the wire and the handles observing that
/// run. Every run gets a fresh status, so a later run never overwrites an
/// earlier run's result.
pub(crate) struct WireStatus {
    state: watch::Sender<WireState>,
    stop: AtomicBool,
    stop_signal: Notify,
    result: Mutex<Option<WireResult>>,
}

impl WireStatus {
    fn new() -> Self {
        let (state, _) = watch::channel(WireState::Unscheduled);
        Self {
            state,
            stop: AtomicBool::new(false),
            stop_signal: Notify::new(),
            result: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> WireState {
        *self.state.borrow()
    }

    fn set_state(&self, state: WireState) {
        self.state.send_replace(state);
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.stop_signal.notify_waiters();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Completes once a stop has been requested.
    pub(crate) async fn stopped(&self) {
        loop {
            let notified = self.stop_signal.notified();
            if self.stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Completes once the current run reached a terminal state.
    pub(crate) async fn finished(&self) -> Option<WireResult> {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.result()
    }

    pub(crate) fn result(&self) -> Option<WireResult> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct Wire {
    id: Uuid,
    name: String,
    looped: bool,
    pub(crate) shards: Vec<ShardInstance>,
    pub(crate) input_type: TypeInfo,
    pub(crate) output_type: Option<TypeInfo>,
    pub(crate) composed: Option<(Option<u64>, ComposeResult)>,
    scope: Arc<Scope>,
    channels: Arc<ChannelRegistry>,
    status: Arc<WireStatus>,
    telemetry: Option<Arc<dyn Telemetry>>,
    run: RunState,
    input: Var,
    current: Var,
    last_output: Var,
    iteration: u64,
}

impl Wire {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            looped: false,
            shards: Vec::new(),
            input_type: TypeInfo::None,
            output_type: None,
            composed: None,
            scope: Arc::new(Scope::new()),
            channels: Arc::new(ChannelRegistry::new()),
            status: Arc::new(WireStatus::new()),
            telemetry: None,
            run: RunState::Idle,
            input: Var::None,
            current: Var::None,
            last_output: Var::None,
            iteration: 0,
        }
    }

    /// Makes the wire restart its units after every iteration until stopped.
    pub fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    /// Appends a unit.
    pub fn with_shard(mut self, shard: impl Shard + 'static) -> Self {
        self.add_shard(Box::new(shard));
        self
    }

    pub fn add_shard(&mut self, shard: Box<dyn Shard>) {
        self.push(ShardInstance::new(shard));
    }

    /// Appends a unit that carries its source location.
    pub fn push(&mut self, instance: ShardInstance) {
        self.shards.push(instance);
        self.composed = None;
    }

    pub fn into_shared(self) -> SharedWire {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shards(&self) -> &[ShardInstance] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn state(&self) -> WireState {
        self.status.state()
    }

    /// Result of the last finished run.
    pub fn result(&self) -> Option<WireResult> {
        self.status.result()
    }

    pub fn input_type(&self) -> &TypeInfo {
        &self.input_type
    }

    /// Output type computed by the last successful composition.
    pub fn output_type(&self) -> Option<&TypeInfo> {
        self.output_type.as_ref()
    }

    pub fn composed(&self) -> Option<&ComposeResult> {
        self.composed.as_ref().map(|(_, r)| r)
    }

    pub fn compose(&mut self, data: &InstanceData) -> Result<ComposeResult, ComposeError> {
        compose_wire(self, data)
    }

    pub fn set_telemetry(&mut self, telemetry: Option<Arc<dyn Telemetry>>) {
        self.telemetry = telemetry;
    }

    /// Asks the wire to stop at its next unit boundary or suspension point.
    pub fn request_stop(&self) {
        self.status.request_stop();
    }

    pub(crate) fn status(&self) -> &Arc<WireStatus> {
        &self.status
    }

    /// The scope of the current run.
    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Acquires unit resources for a run. On failure every unit is cleaned up
    /// again before the error is returned.
    pub fn warmup(
        &mut self,
        input: Var,
        parent: Option<Arc<Scope>>,
        channels: Arc<ChannelRegistry>,
    ) -> Result<(), ActivationError> {
        let scope = Arc::new(match parent {
            Some(parent) => Scope::with_parent(parent),
            None => Scope::new(),
        });
        self.warmup_with_scope(input, scope, channels)
    }

    /// Like [`Wire::warmup`], but the wire's variables live directly in
    /// `scope`. Inline sub-wires use this to share their caller's variables.
    pub fn warmup_with_scope(
        &mut self,
        input: Var,
        scope: Arc<Scope>,
        channels: Arc<ChannelRegistry>,
    ) -> Result<(), ActivationError> {
        if self.composed.is_none() {
            return Err(ActivationError::NotComposed(self.name.clone()));
        }
        self.scope = scope;
        self.channels = channels;
        self.input = input;

        let mut failure = None;
        for instance in self.shards.iter_mut() {
            instance.warmed_up = true;
            if !instance.caps.lifecycle {
                continue;
            }
            let mut context = Context {
                wire_name: &self.name,
                wire_id: self.id,
                wire_input: &self.input,
                scope: &self.scope,
                channels: &self.channels,
                stop_flag: &self.status.stop,
                iteration: 0,
            };
            let warmed = match instance.shard.as_lifecycle() {
                Some(lifecycle) => lifecycle.warmup(&mut context),
                None => Ok(()),
            };
            if let Err(e) = warmed {
                log::error!("wire {}: {} failed to warm up: {}", self.name, instance.name(), e);
                failure = Some(e);
                break;
            }
        }
        match failure {
            Some(e) => {
                self.cleanup();
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Resets the cursor to the first unit. Requires a warmed up wire.
    pub fn start(&mut self, input: Var) {
        self.current = input.clone();
        self.input = input;
        self.last_output = Var::None;
        self.iteration = 0;
        self.run = RunState::Running { position: 0 };
        self.status.stop.store(false, Ordering::Release);
        self.status.set_state(WireState::Running);
    }

    /// Warms up and starts a run. A warmup failure ends the run as failed.
    pub(crate) fn begin_run(
        &mut self,
        input: Var,
        parent: Option<Arc<Scope>>,
        channels: Arc<ChannelRegistry>,
    ) -> Result<(), ActivationError> {
        self.status = Arc::new(WireStatus::new());
        if let Err(e) = self.warmup(input.clone(), parent, channels) {
            let failure = WireFailure {
                message: e.to_string(),
                unit: String::new(),
                position: 0,
            };
            self.finalize(Err(failure));
            return Err(e);
        }
        self.start(input);
        Ok(())
    }

    /// Whether a run is in progress (started and not yet ended).
    pub fn is_mid_run(&self) -> bool {
        self.run != RunState::Idle
    }

    /// Activates units until the wire suspends, finishes or fails.
    pub fn resume(&mut self) -> Progress {
        let mut position = match self.run {
            RunState::Running { position } | RunState::SuspendedAt { position, .. } => position,
            RunState::Idle => {
                assert_invariant(
                    invariant::WIRE_STATE,
                    false,
                    "resumed a wire that was not started",
                    Some(&self.name),
                );
                return Progress::Finished(Var::None);
            }
        };
        if matches!(self.run, RunState::SuspendedAt { .. }) {
            self.run = RunState::Running { position };
            self.status.set_state(WireState::Running);
        }

        loop {
            if self.status.stop_requested() {
                log::debug!("wire {} observed a stop request", self.name);
                return Progress::Finished(std::mem::take(&mut self.last_output));
            }

            if position == self.shards.len() {
                self.last_output = std::mem::take(&mut self.current);
                if !self.looped {
                    return Progress::Finished(std::mem::take(&mut self.last_output));
                }
                self.iteration += 1;
                self.current = self.input.clone();
                return self.suspend(0, SuspendPoint::Yield);
            }

            let instance = &mut self.shards[position];
            let mut context = Context {
                wire_name: &self.name,
                wire_id: self.id,
                wire_input: &self.input,
                scope: &self.scope,
                channels: &self.channels,
                stop_flag: &self.status.stop,
                iteration: self.iteration,
            };
            let started = self.telemetry.as_ref().map(|_| Instant::now());
            let outcome = instance.shard.activate(&mut context, &self.current);
            let unit = instance.name();

            if let (Some(telemetry), Some(started)) = (&self.telemetry, started) {
                telemetry.record(TraceEntry {
                    timestamp: now_micros(),
                    wire: self.name.clone(),
                    wire_id: self.id,
                    shard: unit.to_string(),
                    position,
                    iteration: self.iteration,
                    outcome: match &outcome {
                        Ok(Activation::Continue(_)) => TraceOutcome::Continue,
                        Ok(Activation::Suspend(_)) => TraceOutcome::Suspend,
                        Ok(Activation::Return(_)) => TraceOutcome::Return,
                        Ok(Activation::Stop(_)) => TraceOutcome::Stop,
                        Err(e) => TraceOutcome::Error(e.to_string()),
                    },
                    elapsed_micros: started.elapsed().as_micros() as u64,
                });
            }

            match outcome {
                Ok(Activation::Continue(output)) => {
                    self.current = output;
                    position += 1;
                }
                Ok(Activation::Suspend(point)) => return self.suspend(position, point),
                Ok(Activation::Return(output)) => {
                    self.current = output;
                    position = self.shards.len();
                }
                Ok(Activation::Stop(output)) => return Progress::Finished(output),
                Err(e) => {
                    log::error!("wire {}: {} (position {}) failed: {}", self.name, unit, position, e);
                    return Progress::Failed(WireFailure {
                        message: e.to_string(),
                        unit: unit.to_string(),
                        position,
                    });
                }
            }
        }
    }

    fn suspend(&mut self, position: usize, point: SuspendPoint) -> Progress {
        self.run = RunState::SuspendedAt { position, point };
        self.status.set_state(WireState::Suspended);
        Progress::Suspended(point)
    }

    /// Runs cleanup on every warmed up unit, last to first.
    pub fn cleanup(&mut self) {
        for instance in self.shards.iter_mut().rev() {
            instance.cleanup();
        }
    }

    /// Ends the current run: cleans up every unit and publishes the result.
    pub fn end_run(&mut self, outcome: Result<Var, WireFailure>) -> WireResult {
        self.cleanup();
        self.finalize(outcome)
    }

    /// Ends a run that can no longer be driven, reporting the output of its
    /// last completed iteration.
    pub(crate) fn abandon(&mut self) -> WireResult {
        log::warn!("wire {} ({}) abandoned mid-run", self.name, self.id);
        let output = std::mem::take(&mut self.last_output);
        self.end_run(Ok(output))
    }

    fn finalize(&mut self, outcome: Result<Var, WireFailure>) -> WireResult {
        self.run = RunState::Idle;
        self.current = Var::None;
        let result = match outcome {
            Ok(output) => WireResult {
                state: WireState::Stopped,
                output,
                error: None,
            },
            Err(failure) => WireResult {
                state: WireState::Failed,
                output: Var::None,
                error: Some(failure),
            },
        };
        match &result.error {
            Some(failure) => log::warn!("wire {} ({}) failed: {}", self.name, self.id, failure.message),
            None => log::debug!("wire {} ({}) stopped", self.name, self.id),
        }
        *self
            .status
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
        self.status.set_state(result.state);
        result
    }

    /// Composes, warms up and runs one iteration on the calling thread.
    ///
    /// Suspensions are resumed in place: `Yield` yields the OS thread and
    /// `Sleep` sleeps it. Meant for callers without a mesh.
    pub fn run_once(&mut self, input: Var) -> Result<WireResult, ComposeError> {
        let data = InstanceData::new(derive_type_info(&input)).with_channels(self.channels.clone());
        compose_wire(self, &data)?;

        let channels = self.channels.clone();
        if self.begin_run(input, None, channels).is_err() {
            return Ok(self.result().unwrap_or(WireResult {
                state: WireState::Failed,
                output: Var::None,
                error: None,
            }));
        }

        let looped = std::mem::replace(&mut self.looped, false);
        let outcome = loop {
            match self.resume() {
                Progress::Suspended(SuspendPoint::Yield) => std::thread::yield_now(),
                Progress::Suspended(SuspendPoint::Sleep(duration)) => std::thread::sleep(duration),
                Progress::Finished(output) => break Ok(output),
                Progress::Failed(failure) => break Err(failure),
            }
        };
        self.looped = looped;
        Ok(self.end_run(outcome))
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("looped", &self.looped)
            .field("shards", &self.shards)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shard::Lifecycle;
    use std::sync::atomic::AtomicUsize;

    struct AddOne;

    impl Shard for AddOne {
        fn name(&self) -> &'static str {
            "AddOne"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Int]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Int]
        }
        fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
            let v = input.as_int().ok_or(ActivationError::TypeMismatch {
                expected: "Int".into(),
                found: input.kind_name().into(),
            })?;
            Ok(Activation::Continue(Var::Int(v + 1)))
        }
    }

    /// Suspends `times` times before passing its input through.
    struct Waiter {
        times: usize,
        left: usize,
    }

    impl Shard for Waiter {
        fn name(&self) -> &'static str {
            "Waiter"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn activate(&mut self, _context: &mut Context<'_>, input: &Var) -> Result<Activation, ActivationError> {
            if self.left == 0 {
                self.left = self.times;
                return Ok(Activation::Continue(input.clone()));
            }
            self.left -= 1;
            Ok(Activation::Suspend(SuspendPoint::Yield))
        }
    }

    struct Boom;

    impl Shard for Boom {
        fn name(&self) -> &'static str {
            "Boom"
        }
        fn input_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn output_types(&self) -> Vec<TypeInfo> {
            vec![TypeInfo::Any]
        }
        fn activate(&mut self, _context: &mut Context<'_>, _input: &Var) -> Result<Activation, ActivationError> {
            Err(ActivationError::Failed("boom".into()))
        }
    }

    /// Records its cleanup order into a shared log.
    struct Tracked {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
        warmups: Arc<AtomicUsize>,
    }

    impl Shard for Tracked {
        fn name(&self) -> &'static str {
            "Tracked"
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
        fn as_lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
            Some(self)
        }
    }

    impl Lifecycle for Tracked {
        fn warmup(&mut self, _context: &mut Context<'_>) -> Result<(), ActivationError> {
            self.warmups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn cleanup(&mut self) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    fn tracked(id: usize, log: &Arc<Mutex<Vec<usize>>>, warmups: &Arc<AtomicUsize>) -> Tracked {
        Tracked {
            id,
            log: log.clone(),
            warmups: warmups.clone(),
        }
    }

    #[test]
    fn runs_units_in_order() {
        let mut wire = Wire::new("adder").with_shard(AddOne).with_shard(AddOne);
        let result = wire.run_once(Var::Int(40)).unwrap();
        assert_eq!(result.state, WireState::Stopped);
        assert_eq!(result.output, Var::Int(42));
        assert_eq!(wire.state(), WireState::Stopped);
    }

    #[test]
    fn suspended_unit_is_resumed_with_the_same_input() {
        let mut wire = Wire::new("waiting")
            .with_shard(AddOne)
            .with_shard(Waiter { times: 2, left: 2 })
            .with_shard(AddOne);
        wire.compose(&InstanceData::new(TypeInfo::Int)).unwrap();
        wire.begin_run(Var::Int(0), None, Arc::new(ChannelRegistry::new()))
            .unwrap();

        assert_eq!(wire.resume(), Progress::Suspended(SuspendPoint::Yield));
        assert_eq!(wire.state(), WireState::Suspended);
        assert_eq!(wire.resume(), Progress::Suspended(SuspendPoint::Yield));
        assert_eq!(wire.resume(), Progress::Finished(Var::Int(2)));
    }

    #[test]
    fn failure_names_the_unit_and_position() {
        let mut wire = Wire::new("broken").with_shard(AddOne).with_shard(Boom);
        let result = wire.run_once(Var::Int(1)).unwrap();
        assert_eq!(result.state, WireState::Failed);
        let failure = result.error.unwrap();
        assert_eq!(failure.unit, "Boom");
        assert_eq!(failure.position, 1);
        assert_eq!(failure.message, "boom");
    }

    #[test]
    fn cleanup_runs_once_in_reverse_on_every_exit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let warmups = Arc::new(AtomicUsize::new(0));

        let mut ok = Wire::new("ok")
            .with_shard(tracked(1, &log, &warmups))
            .with_shard(tracked(2, &log, &warmups));
        ok.run_once(Var::None).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![2, 1]);

        log.lock().unwrap().clear();
        let mut failing = Wire::new("failing")
            .with_shard(tracked(1, &log, &warmups))
            .with_shard(Boom)
            .with_shard(tracked(3, &log, &warmups));
        let result = failing.run_once(Var::None).unwrap();
        assert_eq!(result.state, WireState::Failed);
        assert_eq!(*log.lock().unwrap(), vec![3, 1]);
        assert_eq!(warmups.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn stop_request_is_observed_at_the_next_boundary() {
        let mut wire = Wire::new("stoppable")
            .with_shard(Waiter { times: 100, left: 100 })
            .looped(true);
        wire.compose(&InstanceData::new(TypeInfo::None)).unwrap();
        wire.begin_run(Var::None, None, Arc::new(ChannelRegistry::new()))
            .unwrap();
        assert!(matches!(wire.resume(), Progress::Suspended(_)));
        wire.request_stop();
        assert_eq!(wire.resume(), Progress::Finished(Var::None));
        let result = wire.end_run(Ok(Var::None));
        assert_eq!(result.state, WireState::Stopped);
        assert!(!wire.is_mid_run());
    }

    #[test]
    fn looped_wire_restarts_from_its_input() {
        let mut wire = Wire::new("counter").with_shard(AddOne).looped(true);
        wire.compose(&InstanceData::new(TypeInfo::Int)).unwrap();
        wire.begin_run(Var::Int(10), None, Arc::new(ChannelRegistry::new()))
            .unwrap();
        for _ in 0..3 {
            assert_eq!(wire.resume(), Progress::Suspended(SuspendPoint::Yield));
        }
        wire.request_stop();
        assert_eq!(wire.resume(), Progress::Finished(Var::Int(11)));
    }

    #[test]
    fn each_run_keeps_its_own_result() {
        let mut wire = Wire::new("twice").with_shard(AddOne);
        wire.compose(&InstanceData::new(TypeInfo::Int)).unwrap();
        let channels = Arc::new(ChannelRegistry::new());

        wire.begin_run(Var::Int(1), None, channels.clone()).unwrap();
        let first = wire.status().clone();
        let progress = wire.resume();
        assert_eq!(progress, Progress::Finished(Var::Int(2)));
        wire.end_run(Ok(Var::Int(2)));

        wire.begin_run(Var::Int(10), None, channels).unwrap();
        assert!(!Arc::ptr_eq(&first, wire.status()));
        assert_eq!(wire.resume(), Progress::Finished(Var::Int(11)));
        wire.end_run(Ok(Var::Int(11)));

        assert_eq!(first.result().unwrap().output, Var::Int(2));
        assert_eq!(wire.result().unwrap().output, Var::Int(11));
    }

    #[test]
    fn abandoning_a_run_cleans_up_and_keeps_the_last_iteration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let warmups = Arc::new(AtomicUsize::new(0));
        let mut wire = Wire::new("abandoned")
            .with_shard(tracked(1, &log, &warmups))
            .with_shard(AddOne)
            .looped(true);
        wire.compose(&InstanceData::new(TypeInfo::Int)).unwrap();
        wire.begin_run(Var::Int(5), None, Arc::new(ChannelRegistry::new()))
            .unwrap();
        assert_eq!(wire.resume(), Progress::Suspended(SuspendPoint::Yield));

        let result = wire.abandon();
        assert_eq!(result.state, WireState::Stopped);
        assert_eq!(result.output, Var::Int(6));
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(!wire.is_mid_run());
    }

    #[test]
    fn warmup_requires_composition() {
        let mut wire = Wire::new("raw").with_shard(AddOne);
        let err = wire
            .warmup(Var::Int(1), None, Arc::new(ChannelRegistry::new()))
            .unwrap_err();
        assert_eq!(err, ActivationError::NotComposed("raw".into()));
    }
}
