//! Structural hashing of type descriptors and runtime values.
//!
//! Hashes are pure functions of the structural shape. Unordered collections
//! (the element kinds of a sequence value, exposed variable sets) are folded
//! through a sorted scratch set so insertion order never leaks into the hash.
//! Scratch buffers are kept per thread and reused across computations.

use crate::core::types::{ExposedTypeInfo, TypeInfo, Var};
use std::cell::RefCell;
use std::hash::{DefaultHasher, Hash, Hasher};

thread_local! {
    static SCRATCH: RefCell<Vec<Vec<u64>>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` with an empty scratch buffer borrowed from the thread's pool.
fn with_scratch<R>(f: impl FnOnce(&mut Vec<u64>) -> R) -> R {
    let mut buf = SCRATCH
        .with(|pool| pool.borrow_mut().pop())
        .unwrap_or_default();
    buf.clear();
    let result = f(&mut buf);
    SCRATCH.with(|pool| pool.borrow_mut().push(buf));
    result
}

fn tag(hasher: &mut DefaultHasher, tag: u8) {
    hasher.write_u8(tag);
}

/// Writes the hash of the structural type of `var`, without building the
/// intermediate descriptor. Writes the same stream as `write_type` does for
/// `derive_type_info(var)`.
fn write_var_type(hasher: &mut DefaultHasher, var: &Var) {
    match var {
        Var::None => tag(hasher, 0),
        Var::Bool(_) => tag(hasher, 2),
        Var::Int(_) => tag(hasher, 3),
        Var::Float(_) => tag(hasher, 4),
        Var::String(_) => tag(hasher, 5),
        Var::Bytes(_) => tag(hasher, 6),
        Var::Seq(items) => {
            tag(hasher, 7);
            with_scratch(|set| {
                for item in items {
                    set.push(hash_var_type(item));
                }
                set.sort_unstable();
                set.dedup();
                hasher.write_usize(set.len());
                for h in set.iter() {
                    hasher.write_u64(*h);
                }
            });
        }
        Var::Table(map) => {
            tag(hasher, 8);
            hasher.write_usize(map.len());
            for k in map.keys() {
                k.hash(hasher);
            }
            hasher.write_usize(map.len());
            for v in map.values() {
                write_var_type(hasher, v);
            }
        }
        Var::Object(o) => {
            tag(hasher, 9);
            hasher.write_u32(o.vendor_id());
            hasher.write_u32(o.type_id());
        }
        Var::ContextVar(_) => {
            tag(hasher, 10);
            hasher.write_usize(0);
        }
        Var::Wire(_) => tag(hasher, 11),
        Var::Type(_) => tag(hasher, 12),
    }
}

fn write_type(hasher: &mut DefaultHasher, ty: &TypeInfo) {
    match ty {
        TypeInfo::Seq(types) => {
            tag(hasher, 7);
            with_scratch(|set| {
                for t in types {
                    set.push(hash_type(t));
                }
                set.sort_unstable();
                set.dedup();
                hasher.write_usize(set.len());
                for h in set.iter() {
                    hasher.write_u64(*h);
                }
            });
        }
        TypeInfo::Table { keys, types } => {
            tag(hasher, 8);
            hasher.write_usize(keys.len());
            for k in keys {
                k.hash(hasher);
            }
            hasher.write_usize(types.len());
            for t in types {
                write_type(hasher, t);
            }
        }
        TypeInfo::ContextVar(types) => {
            tag(hasher, 10);
            hasher.write_usize(types.len());
            for t in types {
                write_type(hasher, t);
            }
        }
        TypeInfo::None => tag(hasher, 0),
        TypeInfo::Any => tag(hasher, 1),
        TypeInfo::Bool => tag(hasher, 2),
        TypeInfo::Int => tag(hasher, 3),
        TypeInfo::Float => tag(hasher, 4),
        TypeInfo::String => tag(hasher, 5),
        TypeInfo::Bytes => tag(hasher, 6),
        TypeInfo::Object { vendor_id, type_id } => {
            tag(hasher, 9);
            hasher.write_u32(*vendor_id);
            hasher.write_u32(*type_id);
        }
        TypeInfo::Wire => tag(hasher, 11),
        TypeInfo::Type => tag(hasher, 12),
    }
}

/// Structural hash of a type descriptor.
///
/// Sequence element types are treated as a set: `[Int Float]` and
/// `[Float Int]` hash equally.
pub fn hash_type(ty: &TypeInfo) -> u64 {
    let mut hasher = DefaultHasher::new();
    write_type(&mut hasher, ty);
    hasher.finish()
}

/// Hash of the structural type of a value. Equal to
/// `hash_type(&derive_type_info(var))`.
pub fn hash_var_type(var: &Var) -> u64 {
    let mut hasher = DefaultHasher::new();
    write_var_type(&mut hasher, var);
    hasher.finish()
}

fn write_value(hasher: &mut DefaultHasher, var: &Var) {
    match var {
        Var::None => tag(hasher, 0),
        Var::Bool(v) => {
            tag(hasher, 2);
            v.hash(hasher);
        }
        Var::Int(v) => {
            tag(hasher, 3);
            v.hash(hasher);
        }
        Var::Float(v) => {
            tag(hasher, 4);
            v.to_bits().hash(hasher);
        }
        Var::String(v) => {
            tag(hasher, 5);
            v.hash(hasher);
        }
        Var::Bytes(v) => {
            tag(hasher, 6);
            v.hash(hasher);
        }
        Var::Seq(items) => {
            tag(hasher, 7);
            hasher.write_usize(items.len());
            for item in items {
                write_value(hasher, item);
            }
        }
        Var::Table(map) => {
            tag(hasher, 8);
            hasher.write_usize(map.len());
            for (k, v) in map {
                k.hash(hasher);
                write_value(hasher, v);
            }
        }
        Var::Object(o) => {
            tag(hasher, 9);
            hasher.write_u32(o.vendor_id());
            hasher.write_u32(o.type_id());
        }
        Var::ContextVar(name) => {
            tag(hasher, 10);
            name.hash(hasher);
        }
        Var::Wire(w) => {
            tag(hasher, 11);
            std::ptr::hash(std::sync::Arc::as_ptr(w), hasher);
        }
        Var::Type(t) => {
            tag(hasher, 12);
            hasher.write_u64(hash_type(t));
        }
    }
}

/// Hash of a value's content. Objects hash by type identity only; wires by
/// instance.
pub fn hash_var(var: &Var) -> u64 {
    let mut hasher = DefaultHasher::new();
    write_value(&mut hasher, var);
    hasher.finish()
}

/// Order independent hash of a set of exposed variable descriptors.
pub fn hash_exposed(set: &[ExposedTypeInfo]) -> u64 {
    let mut hasher = DefaultHasher::new();
    with_scratch(|scratch| {
        for info in set {
            let mut entry = DefaultHasher::new();
            info.name.hash(&mut entry);
            entry.write_u64(hash_type(&info.exposed_type));
            entry.write_u8(
                info.is_mutable as u8 | (info.is_protected as u8) << 1 | (info.is_global as u8) << 2,
            );
            scratch.push(entry.finish());
        }
        scratch.sort_unstable();
        hasher.write_usize(scratch.len());
        for h in scratch.iter() {
            hasher.write_u64(*h);
        }
    });
    hasher.finish()
}

/// Combines already computed hashes in order.
pub fn combine(parts: &[u64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for p in parts {
        hasher.write_u64(*p);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{derive_type_info, fourcc};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn seq_element_order_does_not_matter() {
        let a = TypeInfo::Seq(vec![TypeInfo::Int, TypeInfo::Float]);
        let b = TypeInfo::Seq(vec![TypeInfo::Float, TypeInfo::Int]);
        assert_eq!(hash_type(&a), hash_type(&b));
    }

    #[test]
    fn nested_difference_changes_hash() {
        let a = TypeInfo::table([("pos", TypeInfo::seq_of(TypeInfo::Int))]);
        let b = TypeInfo::table([("pos", TypeInfo::seq_of(TypeInfo::Float))]);
        assert_ne!(hash_type(&a), hash_type(&b));

        let c = TypeInfo::object(fourcc(b"gfx "), fourcc(b"ctx "));
        let d = TypeInfo::object(fourcc(b"gfx "), fourcc(b"ctx2"));
        assert_ne!(hash_type(&c), hash_type(&d));
    }

    #[test]
    fn value_type_hash_agrees_with_derived_descriptor() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Var::Seq(vec![Var::Int(1), Var::from("x")]));
        map.insert("b".to_string(), Var::Float(1.5));
        let values = [
            Var::None,
            Var::Int(3),
            Var::Seq(vec![Var::Float(1.0), Var::Int(2), Var::Int(4)]),
            Var::Table(map),
            Var::ContextVar("v".into()),
        ];
        for v in &values {
            assert_eq!(hash_var_type(v), hash_type(&derive_type_info(v)), "{v:?}");
        }
    }

    #[test]
    fn exposed_set_hash_ignores_order() {
        let a = ExposedTypeInfo::variable("a", TypeInfo::Int);
        let b = ExposedTypeInfo::protected("b", TypeInfo::String);
        assert_eq!(
            hash_exposed(&[a.clone(), b.clone()]),
            hash_exposed(&[b.clone(), a.clone()])
        );
        assert_ne!(hash_exposed(&[a.clone()]), hash_exposed(&[a, b]));
    }

    #[test]
    fn value_hash_tracks_content() {
        assert_eq!(hash_var(&Var::Int(5)), hash_var(&Var::Int(5)));
        assert_ne!(hash_var(&Var::Int(5)), hash_var(&Var::Int(6)));
        assert_ne!(hash_var(&Var::Int(5)), hash_var(&Var::Float(5.0)));
    }

    fn type_strategy() -> impl Strategy<Value = TypeInfo> {
        let leaf = prop_oneof![
            Just(TypeInfo::None),
            Just(TypeInfo::Any),
            Just(TypeInfo::Bool),
            Just(TypeInfo::Int),
            Just(TypeInfo::Float),
            Just(TypeInfo::String),
            Just(TypeInfo::Bytes),
            Just(TypeInfo::Wire),
            Just(TypeInfo::Type),
            (any::<u32>(), any::<u32>()).prop_map(|(v, t)| TypeInfo::object(v, t)),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(TypeInfo::Seq),
                proptest::collection::vec(("[a-z]{1,4}", inner.clone()), 0..3).prop_map(|fields| {
                    let (keys, types) = fields.into_iter().unzip();
                    TypeInfo::Table { keys, types }
                }),
                proptest::collection::vec(inner, 1..3).prop_map(TypeInfo::ContextVar),
            ]
        })
    }

    fn var_strategy() -> impl Strategy<Value = Var> {
        let leaf = prop_oneof![
            Just(Var::None),
            any::<bool>().prop_map(Var::Bool),
            any::<i64>().prop_map(Var::Int),
            (-1e6f64..1e6).prop_map(Var::Float),
            "[a-z]{0,6}".prop_map(Var::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Var::Seq),
                proptest::collection::btree_map("[a-z]{1,3}", inner, 0..3).prop_map(Var::Table),
            ]
        })
    }

    proptest! {
        #[test]
        fn equal_types_hash_equally(ty in type_strategy()) {
            let copy = ty.clone();
            prop_assert_eq!(&ty, &copy);
            prop_assert_eq!(hash_type(&ty), hash_type(&copy));
        }

        #[test]
        fn different_leaves_hash_differently(a in type_strategy(), b in type_strategy()) {
            let wrap = |t: TypeInfo| TypeInfo::table([("k", t)]);
            if hash_type(&a) != hash_type(&b) {
                prop_assert_ne!(hash_type(&wrap(a)), hash_type(&wrap(b)));
            }
        }

        #[test]
        fn value_type_hash_matches_derived_type(v in var_strategy()) {
            prop_assert_eq!(hash_var_type(&v), hash_type(&derive_type_info(&v)));
        }
    }
}
