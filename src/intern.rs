//! Bounds allocation on traces with millions of events by deduplicating
//! small boxed values and field-name strings.
//!
//! Rust's native integers and `bool` are `Copy` and need no interning when
//! stored directly in a typed struct (spec.md §9: "in a target with native
//! small-integer values, interning is unnecessary"). The pool below exists
//! for the one place this crate still boxes primitives: dynamic
//! `Value::Object` payload maps, where every field is type-erased into an
//! `Arc<Value>` regardless of how small it is.

use std::collections::HashMap;
use std::sync::Arc;

use crate::payload::Value;

/// Caches a fixed table of boxed primitives so that every event carrying
/// the same small-int or boolean payload value shares one allocation.
pub struct InternPool {
    bools: [Arc<Value>; 2],
    /// Keyed on `(variant, value)`, not value alone — a `Byte` and an
    /// `Int16` carrying the same number are different `Value`s and must not
    /// share a cache slot.
    small_ints: HashMap<(std::mem::Discriminant<Value>, i64), Arc<Value>>,
    strings: HashMap<Arc<str>, Arc<str>>,
}

/// Small integers (covering the `i8`/`u8`/`i16`/`u16` range actually
/// produced by the format) are interned; wider types are left boxed
/// per-occurrence since the dedup payoff shrinks as the value space grows.
const SMALL_INT_RANGE: std::ops::RangeInclusive<i64> = -32768..=65535;

impl InternPool {
    pub fn new() -> Self {
        InternPool {
            bools: [Arc::new(Value::Bool(false)), Arc::new(Value::Bool(true))],
            small_ints: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    pub fn bool(&self, b: bool) -> Arc<Value> {
        self.bools[b as usize].clone()
    }

    pub fn small_int(&mut self, v: i64, make: impl FnOnce(i64) -> Value) -> Arc<Value> {
        if !SMALL_INT_RANGE.contains(&v) {
            return Arc::new(make(v));
        }
        let value = make(v);
        let key = (std::mem::discriminant(&value), v);
        self.small_ints
            .entry(key)
            .or_insert_with(|| Arc::new(value))
            .clone()
    }

    pub fn field_name(&mut self, name: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(name) {
            return existing.clone();
        }
        let interned: Arc<str> = Arc::from(name);
        self.strings.insert(interned.clone(), interned.clone());
        interned
    }
}

impl Default for InternPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_small_int_value_shares_one_allocation() {
        let mut pool = InternPool::new();
        let a = pool.small_int(42, Value::I32);
        let b = pool.small_int(42, Value::I32);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_variants_sharing_a_value_do_not_collide() {
        let mut pool = InternPool::new();
        let byte = pool.small_int(42, |v| Value::U8(v as u8));
        let int16 = pool.small_int(42, |v| Value::I16(v as i16));
        assert_eq!(*byte, Value::U8(42));
        assert_eq!(*int16, Value::I16(42));
    }

    #[test]
    fn booleans_share_a_fixed_pair_of_singletons() {
        let pool = InternPool::new();
        assert!(Arc::ptr_eq(&pool.bool(true), &pool.bool(true)));
        assert!(!Arc::ptr_eq(&pool.bool(true), &pool.bool(false)));
    }

    #[test]
    fn field_names_are_interned_by_content() {
        let mut pool = InternPool::new();
        let a = pool.field_name("TaskID");
        let b = pool.field_name("TaskID");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
