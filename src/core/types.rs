//! Runtime values and their structural type descriptors.

use crate::core::hash;
use crate::core::wire::SharedWire;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Four character vendor / type code, big endian packed.
pub type FourCC = u32;

pub const fn fourcc(code: &[u8; 4]) -> FourCC {
    u32::from_be_bytes(*code)
}

pub fn fourcc_to_string(code: FourCC) -> String {
    String::from_utf8_lossy(&code.to_be_bytes()).into_owned()
}

/// Vendor code of the built-in units.
pub const CORE_CC: FourCC = fourcc(b"core");

/// Structural description of a value's shape.
///
/// Equality is structural and recursive. `Hash` is implemented on top of the
/// structural hasher in [`crate::core::hash`], so equal descriptors always
/// hash equally.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TypeInfo {
    #[default]
    None,
    Any,
    Bool,
    Int,
    Float,
    String,
    Bytes,
    /// Element types a sequence may contain. Empty means any element.
    Seq(Vec<TypeInfo>),
    /// Keys paired with value types. Empty keys constrain value types only.
    Table {
        keys: Vec<String>,
        types: Vec<TypeInfo>,
    },
    Object {
        vendor_id: FourCC,
        type_id: FourCC,
    },
    /// A reference to a variable holding one of the inner types.
    ContextVar(Vec<TypeInfo>),
    Wire,
    Type,
}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(hash::hash_type(self));
    }
}

impl TypeInfo {
    pub fn seq_of(element: TypeInfo) -> Self {
        TypeInfo::Seq(vec![element])
    }

    pub fn any_seq() -> Self {
        TypeInfo::Seq(Vec::new())
    }

    pub fn any_table() -> Self {
        TypeInfo::Table {
            keys: Vec::new(),
            types: Vec::new(),
        }
    }

    pub fn table<K: Into<String>>(entries: impl IntoIterator<Item = (K, TypeInfo)>) -> Self {
        let (keys, types) = entries.into_iter().map(|(k, t)| (k.into(), t)).unzip();
        TypeInfo::Table { keys, types }
    }

    pub fn var_of(inner: TypeInfo) -> Self {
        TypeInfo::ContextVar(vec![inner])
    }

    pub fn object(vendor_id: FourCC, type_id: FourCC) -> Self {
        TypeInfo::Object { vendor_id, type_id }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TypeInfo::None)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TypeInfo::Any)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, types: &[TypeInfo]) -> fmt::Result {
            for (i, t) in types.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{t}")?;
            }
            Ok(())
        }

        match self {
            TypeInfo::None => write!(f, "None"),
            TypeInfo::Any => write!(f, "Any"),
            TypeInfo::Bool => write!(f, "Bool"),
            TypeInfo::Int => write!(f, "Int"),
            TypeInfo::Float => write!(f, "Float"),
            TypeInfo::String => write!(f, "String"),
            TypeInfo::Bytes => write!(f, "Bytes"),
            TypeInfo::Seq(types) => {
                write!(f, "[")?;
                list(f, types)?;
                write!(f, "]")
            }
            TypeInfo::Table { keys, types } => {
                write!(f, "{{")?;
                if keys.is_empty() {
                    list(f, types)?;
                } else {
                    for (i, (k, t)) in keys.iter().zip(types).enumerate() {
                        if i > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{k}: {t}")?;
                    }
                }
                write!(f, "}}")
            }
            TypeInfo::Object { vendor_id, type_id } => write!(
                f,
                "Object({}/{})",
                fourcc_to_string(*vendor_id),
                fourcc_to_string(*type_id)
            ),
            TypeInfo::ContextVar(types) => {
                write!(f, "&(")?;
                list(f, types)?;
                write!(f, ")")
            }
            TypeInfo::Wire => write!(f, "Wire"),
            TypeInfo::Type => write!(f, "Type"),
        }
    }
}

/// A foreign resource handle tagged with its type identity.
#[derive(Clone)]
pub struct ObjectRef {
    vendor_id: FourCC,
    type_id: FourCC,
    handle: Arc<dyn Any + Send + Sync>,
}

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(vendor_id: FourCC, type_id: FourCC, value: T) -> Self {
        Self::from_arc(vendor_id, type_id, Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(vendor_id: FourCC, type_id: FourCC, value: Arc<T>) -> Self {
        Self {
            vendor_id,
            type_id,
            handle: value,
        }
    }

    pub fn vendor_id(&self) -> FourCC {
        self.vendor_id
    }

    pub fn type_id(&self) -> FourCC {
        self.type_id
    }

    pub fn type_info(&self) -> TypeInfo {
        TypeInfo::object(self.vendor_id, self.type_id)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }

    /// True when both refer to the same underlying resource.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.handle), Arc::as_ptr(&other.handle))
    }

    /// Number of live handles to the underlying resource.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.handle)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("vendor_id", &fourcc_to_string(self.vendor_id))
            .field("type_id", &fourcc_to_string(self.type_id))
            .field("handle", &Arc::as_ptr(&self.handle))
            .finish()
    }
}

/// A runtime value flowing between units.
#[derive(Clone, Default, Serialize, Deserialize)]
pub enum Var {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Seq(Vec<Var>),
    Table(BTreeMap<String, Var>),
    #[serde(skip)]
    Object(ObjectRef),
    /// Reference to a variable by name, resolved at warmup.
    ContextVar(String),
    /// A nested wire, used as a sub-wire parameter.
    #[serde(skip)]
    Wire(SharedWire),
    Type(TypeInfo),
}

impl Var {
    pub fn is_none(&self) -> bool {
        matches!(self, Var::None)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Var::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Var::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Var::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Var::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Var]> {
        match self {
            Var::Seq(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Var::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Var::None => "None",
            Var::Bool(_) => "Bool",
            Var::Int(_) => "Int",
            Var::Float(_) => "Float",
            Var::String(_) => "String",
            Var::Bytes(_) => "Bytes",
            Var::Seq(_) => "Seq",
            Var::Table(_) => "Table",
            Var::Object(_) => "Object",
            Var::ContextVar(_) => "ContextVar",
            Var::Wire(_) => "Wire",
            Var::Type(_) => "Type",
        }
    }

    /// Overwrites `self` with a copy of `src`, reusing existing buffers when
    /// both sides hold the same kind of container.
    pub fn assign_from(&mut self, src: &Var) {
        match (&mut *self, src) {
            (Var::String(dst), Var::String(s)) => {
                dst.clear();
                dst.push_str(s);
            }
            (Var::Bytes(dst), Var::Bytes(s)) => {
                dst.clear();
                dst.extend_from_slice(s);
            }
            (Var::Seq(dst), Var::Seq(s)) => {
                dst.truncate(s.len());
                for (d, v) in dst.iter_mut().zip(s) {
                    d.assign_from(v);
                }
                let kept = dst.len();
                dst.extend(s[kept..].iter().cloned());
            }
            (Var::Table(dst), Var::Table(s)) => {
                dst.retain(|k, _| s.contains_key(k));
                for (k, v) in s {
                    match dst.get_mut(k) {
                        Some(d) => d.assign_from(v),
                        None => {
                            dst.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            (dst, s) => *dst = s.clone(),
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Var::None, Var::None) => true,
            (Var::Bool(a), Var::Bool(b)) => a == b,
            (Var::Int(a), Var::Int(b)) => a == b,
            (Var::Float(a), Var::Float(b)) => a == b,
            (Var::String(a), Var::String(b)) => a == b,
            (Var::Bytes(a), Var::Bytes(b)) => a == b,
            (Var::Seq(a), Var::Seq(b)) => a == b,
            (Var::Table(a), Var::Table(b)) => a == b,
            (Var::Object(a), Var::Object(b)) => a.ptr_eq(b),
            (Var::ContextVar(a), Var::ContextVar(b)) => a == b,
            (Var::Wire(a), Var::Wire(b)) => Arc::ptr_eq(a, b),
            (Var::Type(a), Var::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::None => write!(f, "None"),
            Var::Bool(v) => write!(f, "Bool({v})"),
            Var::Int(v) => write!(f, "Int({v})"),
            Var::Float(v) => write!(f, "Float({v})"),
            Var::String(v) => write!(f, "String({v:?})"),
            Var::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Var::Seq(v) => f.debug_tuple("Seq").field(v).finish(),
            Var::Table(v) => f.debug_tuple("Table").field(v).finish(),
            Var::Object(o) => o.fmt(f),
            Var::ContextVar(name) => write!(f, "ContextVar({name})"),
            Var::Wire(w) => write!(f, "Wire({:p})", Arc::as_ptr(w)),
            Var::Type(t) => write!(f, "Type({t})"),
        }
    }
}

impl From<bool> for Var {
    fn from(v: bool) -> Self {
        Var::Bool(v)
    }
}

impl From<i64> for Var {
    fn from(v: i64) -> Self {
        Var::Int(v)
    }
}

impl From<i32> for Var {
    fn from(v: i32) -> Self {
        Var::Int(v as i64)
    }
}

impl From<f64> for Var {
    fn from(v: f64) -> Self {
        Var::Float(v)
    }
}

impl From<&str> for Var {
    fn from(v: &str) -> Self {
        Var::String(v.to_string())
    }
}

impl From<String> for Var {
    fn from(v: String) -> Self {
        Var::String(v)
    }
}

impl From<Vec<u8>> for Var {
    fn from(v: Vec<u8>) -> Self {
        Var::Bytes(v)
    }
}

impl From<Vec<Var>> for Var {
    fn from(v: Vec<Var>) -> Self {
        Var::Seq(v)
    }
}

impl From<ObjectRef> for Var {
    fn from(v: ObjectRef) -> Self {
        Var::Object(v)
    }
}

impl From<TypeInfo> for Var {
    fn from(v: TypeInfo) -> Self {
        Var::Type(v)
    }
}

/// A variable published or required by a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedTypeInfo {
    pub name: String,
    pub exposed_type: TypeInfo,
    pub is_mutable: bool,
    pub is_protected: bool,
    pub is_global: bool,
}

impl ExposedTypeInfo {
    /// A mutable, unprotected, wire-local variable.
    pub fn variable(name: impl Into<String>, exposed_type: TypeInfo) -> Self {
        Self {
            name: name.into(),
            exposed_type,
            is_mutable: true,
            is_protected: false,
            is_global: false,
        }
    }

    /// A read-only variable that wires may not re-expose.
    pub fn protected(name: impl Into<String>, exposed_type: TypeInfo) -> Self {
        Self {
            is_mutable: false,
            is_protected: true,
            ..Self::variable(name, exposed_type)
        }
    }

    /// A requirement that only reads the variable.
    pub fn read_only(name: impl Into<String>, exposed_type: TypeInfo) -> Self {
        Self {
            is_mutable: false,
            ..Self::variable(name, exposed_type)
        }
    }

    pub fn global(mut self) -> Self {
        self.is_global = true;
        self
    }
}

/// Computes the structural type of a runtime value.
///
/// Sequence element types are deduplicated and ordered by their structural
/// hash so the derived descriptor does not depend on element order.
pub fn derive_type_info(var: &Var) -> TypeInfo {
    match var {
        Var::None => TypeInfo::None,
        Var::Bool(_) => TypeInfo::Bool,
        Var::Int(_) => TypeInfo::Int,
        Var::Float(_) => TypeInfo::Float,
        Var::String(_) => TypeInfo::String,
        Var::Bytes(_) => TypeInfo::Bytes,
        Var::Seq(items) => {
            let mut types: Vec<(u64, TypeInfo)> = Vec::new();
            for item in items {
                let t = derive_type_info(item);
                let h = hash::hash_type(&t);
                if !types.iter().any(|(eh, et)| *eh == h && *et == t) {
                    types.push((h, t));
                }
            }
            types.sort_by_key(|(h, _)| *h);
            TypeInfo::Seq(types.into_iter().map(|(_, t)| t).collect())
        }
        Var::Table(map) => TypeInfo::Table {
            keys: map.keys().cloned().collect(),
            types: map.values().map(derive_type_info).collect(),
        },
        Var::Object(o) => o.type_info(),
        Var::ContextVar(_) => TypeInfo::ContextVar(Vec::new()),
        Var::Wire(_) => TypeInfo::Wire,
        Var::Type(_) => TypeInfo::Type,
    }
}

/// Checks whether a value of type `input` may flow into a slot declared as
/// `receiver`.
pub fn match_types(input: &TypeInfo, receiver: &TypeInfo) -> bool {
    match (input, receiver) {
        (_, TypeInfo::Any) => true,
        (
            TypeInfo::Object {
                vendor_id: iv,
                type_id: it,
            },
            TypeInfo::Object {
                vendor_id: rv,
                type_id: rt,
            },
        ) => iv == rv && it == rt,
        (TypeInfo::Seq(inputs), TypeInfo::Seq(accepted)) => {
            accepted.is_empty()
                || inputs
                    .iter()
                    .all(|i| accepted.iter().any(|a| match_types(i, a)))
        }
        (
            TypeInfo::Table {
                keys: in_keys,
                types: in_types,
            },
            TypeInfo::Table {
                keys: rec_keys,
                types: rec_types,
            },
        ) => match_tables(in_keys, in_types, rec_keys, rec_types),
        (TypeInfo::ContextVar(inputs), TypeInfo::ContextVar(accepted)) => {
            accepted.is_empty()
                || accepted
                    .iter()
                    .any(|a| inputs.iter().all(|i| match_types(i, a)))
        }
        (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

fn match_tables(
    in_keys: &[String],
    in_types: &[TypeInfo],
    rec_keys: &[String],
    rec_types: &[TypeInfo],
) -> bool {
    if rec_keys.is_empty() {
        // Only value types are constrained.
        return rec_types.is_empty()
            || in_types
                .iter()
                .all(|i| rec_types.iter().any(|r| match_types(i, r)));
    }

    // A trailing empty key accepts extra entries.
    let open = rec_keys.last().is_some_and(|k| k.is_empty());
    if !open && in_keys.len() != rec_keys.len() {
        return false;
    }

    for (key, in_type) in in_keys.iter().zip(in_types) {
        match rec_keys.iter().position(|k| k == key) {
            Some(idx) => match rec_types.get(idx) {
                Some(rec_type) if match_types(in_type, rec_type) => {}
                _ => return false,
            },
            None if open => {
                let wildcard = rec_types.get(rec_keys.len() - 1);
                if !wildcard.is_some_and(|w| match_types(in_type, w)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_receiver_accepts_everything() {
        assert!(match_types(&TypeInfo::Int, &TypeInfo::Any));
        assert!(match_types(&TypeInfo::seq_of(TypeInfo::Float), &TypeInfo::Any));
        assert!(!match_types(&TypeInfo::Any, &TypeInfo::Int));
    }

    #[test]
    fn basic_kinds_must_match() {
        assert!(match_types(&TypeInfo::Int, &TypeInfo::Int));
        assert!(!match_types(&TypeInfo::Int, &TypeInfo::Float));
        assert!(!match_types(&TypeInfo::None, &TypeInfo::String));
    }

    #[test]
    fn objects_compare_vendor_and_type() {
        let a = TypeInfo::object(fourcc(b"gfx "), fourcc(b"ctx "));
        let b = TypeInfo::object(fourcc(b"gfx "), fourcc(b"tex "));
        assert!(match_types(&a, &a.clone()));
        assert!(!match_types(&a, &b));
    }

    #[test]
    fn seq_elements_must_be_accepted() {
        let ints = TypeInfo::seq_of(TypeInfo::Int);
        let mixed = TypeInfo::Seq(vec![TypeInfo::Int, TypeInfo::Float]);
        assert!(match_types(&ints, &mixed));
        assert!(!match_types(&mixed, &ints));
        assert!(match_types(&mixed, &TypeInfo::any_seq()));
        assert!(match_types(&TypeInfo::any_seq(), &ints));
    }

    #[test]
    fn keyed_tables_need_matching_keys() {
        let input = TypeInfo::table([("x", TypeInfo::Int), ("y", TypeInfo::Int)]);
        let exact = TypeInfo::table([("y", TypeInfo::Int), ("x", TypeInfo::Int)]);
        let partial = TypeInfo::table([("x", TypeInfo::Int)]);
        let open = TypeInfo::table([("x", TypeInfo::Int), ("", TypeInfo::Any)]);
        assert!(match_types(&input, &exact));
        assert!(!match_types(&input, &partial));
        assert!(match_types(&input, &open));
        assert!(match_types(&input, &TypeInfo::any_table()));
    }

    #[test]
    fn context_var_inner_types() {
        let int_var = TypeInfo::var_of(TypeInfo::Int);
        let accepts = TypeInfo::ContextVar(vec![TypeInfo::Float, TypeInfo::Int]);
        assert!(match_types(&int_var, &accepts));
        assert!(!match_types(&int_var, &TypeInfo::var_of(TypeInfo::String)));
    }

    #[test]
    fn derived_seq_type_ignores_order_and_duplicates() {
        let a = Var::Seq(vec![Var::Int(1), Var::Float(2.0), Var::Int(3)]);
        let b = Var::Seq(vec![Var::Float(0.5), Var::Int(9)]);
        assert_eq!(derive_type_info(&a), derive_type_info(&b));
        match derive_type_info(&a) {
            TypeInfo::Seq(types) => assert_eq!(types.len(), 2),
            other => panic!("unexpected type {other}"),
        }
    }

    #[test]
    fn derived_table_type_lists_keys() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Var::from("probe"));
        map.insert("count".to_string(), Var::Int(2));
        let t = derive_type_info(&Var::Table(map));
        assert_eq!(
            t,
            TypeInfo::table([("count", TypeInfo::Int), ("name", TypeInfo::String)])
        );
    }

    #[test]
    fn assign_from_reuses_buffers() {
        let mut dst = Var::String(String::with_capacity(64));
        dst.assign_from(&Var::from("hello"));
        assert_eq!(dst, Var::from("hello"));
        if let Var::String(s) = &dst {
            assert!(s.capacity() >= 64);
        }

        let mut seq = Var::Seq(vec![Var::Int(1), Var::Int(2), Var::Int(3)]);
        seq.assign_from(&Var::Seq(vec![Var::Int(7)]));
        assert_eq!(seq, Var::Seq(vec![Var::Int(7)]));

        let mut other = Var::Int(1);
        other.assign_from(&Var::from("swap"));
        assert_eq!(other, Var::from("swap"));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = ObjectRef::new(CORE_CC, fourcc(b"test"), 5u32);
        let b = ObjectRef::new(CORE_CC, fourcc(b"test"), 5u32);
        assert_eq!(Var::Object(a.clone()), Var::Object(a.clone()));
        assert_ne!(Var::Object(a.clone()), Var::Object(b));
        assert_eq!(a.downcast_ref::<u32>(), Some(&5));
    }

    #[test]
    fn fourcc_round_trips_to_text() {
        assert_eq!(fourcc_to_string(CORE_CC), "core");
    }
}
