//! Variable slots, scopes and scoped object bindings.

use crate::core::invariant::{self, assert_invariant};
use crate::core::types::{ExposedTypeInfo, ObjectRef, Var, derive_type_info};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A shared, lockable variable cell.
///
/// Units resolve slots once at warmup and read or write them on every
/// activation. Clones share the same cell.
#[derive(Clone, Default)]
pub struct VarSlot {
    cell: Arc<RwLock<Var>>,
}

impl VarSlot {
    pub fn new(value: Var) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
        }
    }

    pub fn get(&self) -> Var {
        self.cell.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Var) -> R) -> R {
        f(&self.cell.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set(&self, value: Var) {
        *self.cell.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Copies `value` into the slot, reusing the slot's buffers.
    pub fn assign(&self, value: &Var) {
        self.cell
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .assign_from(value);
    }

    pub fn replace(&self, value: Var) -> Var {
        std::mem::replace(
            &mut *self.cell.write().unwrap_or_else(PoisonError::into_inner),
            value,
        )
    }

    pub fn is_none(&self) -> bool {
        self.with(Var::is_none)
    }

    pub fn ptr_eq(&self, other: &VarSlot) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl std::fmt::Debug for VarSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|v| f.debug_tuple("VarSlot").field(v).finish())
    }
}

#[derive(Clone)]
struct Entry {
    slot: VarSlot,
    protected: bool,
}

/// A named-variable scope. Lookups fall back to the parent scope.
///
/// A name is bound to at most one slot per scope.
#[derive(Default)]
pub struct Scope {
    entries: RwLock<HashMap<String, Entry>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<Scope>) -> Self {
        Self {
            entries: RwLock::default(),
            parent: Some(parent),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    /// Returns the local slot named `name`, creating an empty one if needed.
    pub fn declare(&self, name: &str) -> VarSlot {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return entry.slot.clone();
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Entry {
                slot: VarSlot::default(),
                protected: false,
            })
            .slot
            .clone()
    }

    /// Binds `name` locally to `value`. Protected variables are published to
    /// composition as read-only.
    pub fn insert(&self, name: &str, value: Var, protected: bool) -> VarSlot {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(name.to_string()).or_insert_with(|| Entry {
            slot: VarSlot::default(),
            protected,
        });
        entry.protected = protected;
        entry.slot.set(value);
        entry.slot.clone()
    }

    /// Finds `name` in this scope or any ancestor.
    pub fn find(&self, name: &str) -> Option<VarSlot> {
        let local = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|e| e.slot.clone());
        local.or_else(|| self.parent.as_ref()?.find(name))
    }

    pub fn is_protected(&self, name: &str) -> bool {
        let local = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|e| e.protected);
        match local {
            Some(p) => p,
            None => self.parent.as_ref().is_some_and(|p| p.is_protected(name)),
        }
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Describes every visible variable for composition, typed by the value
    /// it currently holds. Inner scopes shadow outer ones.
    pub fn exposed_info(&self) -> Vec<ExposedTypeInfo> {
        let mut out: Vec<ExposedTypeInfo> = match &self.parent {
            Some(parent) => parent.exposed_info(),
            None => Vec::new(),
        };
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        for (name, entry) in entries.iter() {
            out.retain(|e| &e.name != name);
            let ty = entry.slot.with(derive_type_info);
            let info = if entry.protected {
                ExposedTypeInfo::protected(name.clone(), ty)
            } else {
                ExposedTypeInfo::variable(name.clone(), ty)
            };
            out.push(info);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Resets every local slot to `None`.
    pub fn clear(&self) {
        for entry in self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            entry.slot.set(Var::None);
        }
    }
}

struct BindingGuard<'a> {
    slot: &'a VarSlot,
    bound: ObjectRef,
    previous: Option<Var>,
}

impl Drop for BindingGuard<'_> {
    fn drop(&mut self) {
        let previous = self.previous.take().unwrap_or_default();
        let current = self.slot.replace(previous);
        if std::thread::panicking() {
            return;
        }
        let intact = matches!(&current, Var::Object(o) if o.ptr_eq(&self.bound));
        assert_invariant(
            invariant::SCOPED_BINDING,
            intact,
            "scoped object binding was replaced or cleared before its scope ended",
            Some(current.kind_name()),
        );
    }
}

/// Binds `object` into `slot` for the duration of `f`.
///
/// The slot is restored to its previous value (or `None`) on every exit
/// path, including errors returned from `f` and panics unwinding through it.
/// Code inside `f` must not replace the binding.
pub fn with_object_variable<R>(slot: &VarSlot, object: ObjectRef, f: impl FnOnce() -> R) -> R {
    let previous = slot.replace(Var::Object(object.clone()));
    let _guard = BindingGuard {
        slot,
        bound: object,
        previous: Some(previous),
    };
    f()
}
