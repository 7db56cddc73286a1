//! Built-in units.

pub mod channels;
pub mod core;
pub mod flow;

use crate::core::registry::ShardRegistry;
use crate::core::shard::Shard;
use crate::core::types::CORE_CC;

fn boxed<S: Shard + Default + 'static>() -> Box<dyn Shard> {
    Box::new(S::default())
}

/// Installs the core units under the `core` vendor.
pub fn register_core(registry: &mut ShardRegistry) {
    registry.register(CORE_CC, "Const", boxed::<self::core::Const>);
    registry.register(CORE_CC, "Pass", boxed::<self::core::Pass>);
    registry.register(CORE_CC, "Input", boxed::<self::core::Input>);
    registry.register(CORE_CC, "Math.Add", boxed::<self::core::Add>);
    registry.register(CORE_CC, "Set", boxed::<self::core::Set>);
    registry.register(CORE_CC, "Get", boxed::<self::core::Get>);
    registry.register(CORE_CC, "Update", boxed::<self::core::Update>);
    registry.register(CORE_CC, "Pause", boxed::<self::core::Pause>);
    registry.register(CORE_CC, "Bytes.Buffer", boxed::<self::core::Buffer>);
    registry.register(CORE_CC, "Fail", boxed::<self::core::Fail>);
    registry.register(CORE_CC, "Stop", boxed::<self::core::Stop>);
    registry.register(CORE_CC, "Return", boxed::<self::core::Return>);
    registry.register(CORE_CC, "Do", boxed::<flow::Do>);
    registry.register(CORE_CC, "With", boxed::<flow::With>);
}

/// Installs the channel units under the `core` vendor.
pub fn register_channels(registry: &mut ShardRegistry) {
    registry.register(CORE_CC, "Produce", boxed::<channels::Produce>);
    registry.register(CORE_CC, "Broadcast", boxed::<channels::Broadcast>);
    registry.register(CORE_CC, "Consume", boxed::<channels::Consume>);
    registry.register(CORE_CC, "Listen", boxed::<channels::Listen>);
    registry.register(CORE_CC, "Complete", boxed::<channels::Complete>);
    registry.register(CORE_CC, "Flush", boxed::<channels::Flush>);
}

/// A registry with every built-in unit.
pub fn default_registry() -> ShardRegistry {
    let mut registry = ShardRegistry::new();
    register_core(&mut registry);
    register_channels(&mut registry);
    registry
}
