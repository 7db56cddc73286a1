//! # Wiremesh
//!
//! A cooperative dataflow runtime. Programs are *wires*: ordered pipelines of
//! small processing units (*shards*) that pass one value along, type-checked
//! ahead of time and run as suspendable coroutines by a *mesh* scheduler.
//!
//! ## Features
//!
//! - **Compose before running**: every wire is type-checked against its input
//!   and the variables around it before a single unit runs
//! - **Cooperative scheduling**: wires suspend at well-defined points and are
//!   driven by a tokio worker pool
//! - **Channels**: bounded multi-producer/multi-consumer queues and
//!   broadcast channels connect wires
//! - **Explicit context**: channel and variable registries are owned by the
//!   mesh, never global
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wiremesh::prelude::*;
//! use wiremesh::shards::core::{Add, Const};
//!
//! let mesh = Mesh::new(MeshConfig::new("demo")).unwrap();
//! let wire = Wire::new("add")
//!     .with_shard(Const::new(5))
//!     .with_shard(Add::new(2))
//!     .into_shared();
//!
//! let handle = mesh.schedule(&wire, Var::None).unwrap();
//! let results = mesh.wait_all();
//! assert_eq!(results[0].output, Var::Int(7));
//! # drop(handle);
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: types, composition, wires, channels and the mesh
//! - [`shards`]: the built-in units and their registry
//! - [`eval`]: turning parsed syntax trees into wires
//! - [`prelude`]: commonly used types and traits (import with `use wiremesh::prelude::*`)

// ============================================================================
// Modules
// ============================================================================

pub mod core;
pub mod error;
pub mod eval;
pub mod shards;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Values and types
pub use crate::core::types::{ExposedTypeInfo, ObjectRef, TypeInfo, Var, derive_type_info, match_types};

// Units
pub use crate::core::context::Context;
pub use crate::core::params::{ParamVar, ParameterInfo, Parameterized};
pub use crate::core::shard::{Activation, Composable, Lifecycle, Shard, ShardInstance, SuspendPoint, Variables};

// Composition
pub use crate::core::compose::{ComposeResult, InstanceData, compose_shared, compose_wire};
pub use crate::core::validation::ValidationResult;

// Wires and scheduling
pub use crate::core::mesh::{Mesh, MeshConfig, WireHandle};
pub use crate::core::wire::{Progress, SharedWire, Wire, WireFailure, WireResult, WireState};

// Channels and variables
pub use crate::core::channels::ChannelRegistry;
pub use crate::core::scope::{Scope, VarSlot};

// Registry and telemetry
pub use crate::core::registry::ShardRegistry;
pub use crate::core::telemetry::{MemoryTelemetry, Telemetry, TraceEntry, TraceOutcome};

// Errors
pub use error::{ActivationError, ComposeError, EvalError, MeshError, ParamError};

// Front end
pub use eval::{Ast, Environment, eval_into, eval_wire};
pub use shards::default_registry;

// ============================================================================
// Prelude Modules - Convenient Bulk Imports
// ============================================================================

/// The main prelude: everything needed to build, compose and schedule wires.
///
/// # Example
/// ```rust
/// use wiremesh::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Units
        Activation,
        ActivationError,
        Composable,
        ComposeError,
        Context,
        Lifecycle,
        ParameterInfo,
        Parameterized,
        Shard,
        SuspendPoint,
        Variables,
        // Values
        TypeInfo,
        Var,
        // Wires
        Mesh,
        MeshConfig,
        MeshError,
        SharedWire,
        Wire,
        WireHandle,
        WireResult,
        WireState,
        // Front end
        ShardRegistry,
        default_registry,
    };
}

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
