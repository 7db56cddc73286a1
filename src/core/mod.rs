pub mod channels;
pub mod compose;
pub mod context;
pub mod hash;
pub mod invariant;
pub mod mesh;
pub mod params;
pub mod pool;
pub mod registry;
pub mod scope;
pub mod shard;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod wire;
