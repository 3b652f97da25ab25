//! Property tests: `get(set(v))` preserves representative values for
//! every scalar and array family.

use opix::{type_find, TaggedValue, Value};
use proptest::prelude::*;

fn round_trip(type_name: &str, value: Value) -> Value {
    let tag = type_find(type_name).unwrap();
    let mut slot = TaggedValue::declare(tag).unwrap();
    slot.set(&value).unwrap();
    slot.get().unwrap()
}

proptest! {
    #[test]
    fn prop_int_round_trip(v in any::<i64>()) {
        prop_assert_eq!(round_trip("int", Value::Int(v)), Value::Int(v));
    }

    #[test]
    fn prop_double_round_trip(v in proptest::num::f64::NORMAL) {
        prop_assert_eq!(round_trip("double", Value::Double(v)), Value::Double(v));
    }

    #[test]
    fn prop_string_round_trip(v in ".{0,40}") {
        prop_assert_eq!(
            round_trip("string", Value::Str(v.clone())),
            Value::Str(v)
        );
    }

    #[test]
    fn prop_array_int_round_trip(v in proptest::collection::vec(any::<i64>(), 1..16)) {
        let expected = Value::Array(v.iter().map(|x| Value::Int(*x)).collect());
        prop_assert_eq!(round_trip("array-int", v.into()), expected);
    }

    #[test]
    fn prop_array_double_round_trip(v in proptest::collection::vec(proptest::num::f64::NORMAL, 1..16)) {
        let expected = Value::Array(v.iter().map(|x| Value::Double(*x)).collect());
        prop_assert_eq!(round_trip("array-double", v.into()), expected);
    }

    #[test]
    fn prop_blob_round_trip(v in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(
            round_trip("blob", Value::Blob(v.clone())),
            Value::Blob(v)
        );
    }

    #[test]
    fn prop_flags_round_trip(v in any::<u32>()) {
        prop_assert_eq!(
            round_trip("OperationFlags", Value::Int(v as i64)),
            Value::Int(v as i64)
        );
    }
}

#[test]
fn test_enum_round_trip_is_symbolic() {
    // enums round-trip by nick, not by raw integer
    for nick in ["uchar", "char", "ushort", "short", "uint", "int", "float", "double"] {
        assert_eq!(
            round_trip("BandFormat", Value::Str(nick.to_string())),
            Value::Str(nick.to_string())
        );
    }
}
