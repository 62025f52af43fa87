//! Tests for value equality and hashing, which the constant pool relies on.

use std::sync::Arc;

use hashbrown::HashMap;

use super::{NativeFunction, Value};

#[test]
fn test_variants_never_collide() {
    // Same "number", different concrete types.
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert_ne!(Value::Int(1), Value::Bool(true));
    assert_ne!(Value::Int(0), Value::None);
}

#[test]
fn test_float_bit_equality() {
    assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
}

#[test]
fn test_tuple_compares_by_content() {
    let a = Value::tuple(vec![Value::Int(1), Value::str("x")]);
    let b = Value::tuple(vec![Value::Int(1), Value::str("x")]);
    assert_eq!(a, b);
}

#[test]
fn test_list_compares_by_identity() {
    let a = Value::list(vec![Value::Int(1)]);
    let b = Value::list(vec![Value::Int(1)]);
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
}

#[test]
fn test_native_compares_by_identity() {
    let f = NativeFunction::new("f", |_, _| Ok(Value::None));
    let g = NativeFunction::new("f", |_, _| Ok(Value::None));
    assert_ne!(Value::Native(f.clone()), Value::Native(g));
    assert_eq!(Value::Native(f.clone()), Value::Native(f));
}

#[test]
fn test_usable_as_map_key() {
    let mut map: HashMap<Value, u32> = HashMap::new();
    map.insert(Value::Int(1), 0);
    map.insert(Value::Float(1.0), 1);
    map.insert(Value::str("1"), 2);
    assert_eq!(map.len(), 3);
    assert_eq!(map.get(&Value::Float(1.0)), Some(&1));

    let list = Value::list(vec![]);
    map.insert(list.clone(), 3);
    // A structurally-equal but distinct list is a different key.
    assert_eq!(map.get(&Value::list(vec![])), None);
    assert_eq!(map.get(&list), Some(&3));
}

#[test]
fn test_truthiness() {
    assert!(!Value::None.is_truthy());
    assert!(!Value::Int(0).is_truthy());
    assert!(!Value::str("").is_truthy());
    assert!(!Value::tuple(vec![]).is_truthy());
    assert!(Value::Int(-1).is_truthy());
    assert!(Value::str("x").is_truthy());
}

#[test]
fn test_debug_formatting() {
    let v = Value::tuple(vec![Value::Int(1), Value::str("a"), Value::None]);
    assert_eq!(format!("{:?}", v), r#"(1, "a", none)"#);
    let s: Arc<str> = Arc::from("hi");
    assert_eq!(format!("{:?}", Value::Str(s)), "\"hi\"");
}
