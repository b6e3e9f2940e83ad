// Codec Tests for mdbx-lua
// Property tests for the tagged value encoding

use mdbx_lua::codec::{decode, encode, Decoded, TAG_BOOLEAN, TAG_NUMBER, TAG_TEXT};
use mdbx_lua::Value;
use proptest::prelude::*;

proptest! {
    /// Text survives a round trip byte for byte, embedded NULs included
    #[test]
    fn prop_text_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let value = Value::Text(bytes);
        let encoded = encode(&value);
        prop_assert_eq!(encoded[0], TAG_TEXT);
        prop_assert_eq!(encoded.len(), value.as_text().map_or(0, <[u8]>::len) + 2);
        prop_assert_eq!(decode(&encoded).unwrap(), Decoded::Value(value));
    }

    /// Booleans survive a round trip as booleans
    #[test]
    fn prop_boolean_round_trip(b in any::<bool>()) {
        let encoded = encode(&Value::Boolean(b));
        prop_assert_eq!(encoded[0], TAG_BOOLEAN);
        prop_assert_eq!(decode(&encoded).unwrap(), Decoded::Value(Value::Boolean(b)));
    }

    /// Numbers come back rounded to six fractional digits
    #[test]
    fn prop_number_round_trip(n in -1.0e12f64..1.0e12f64) {
        let encoded = encode(&Value::Number(n));
        prop_assert_eq!(encoded[0], TAG_NUMBER);

        let rounded: f64 = format!("{:.6}", n).parse().unwrap();
        let decoded = decode(&encoded).unwrap().into_value().and_then(|v| v.as_f64()).unwrap();
        prop_assert_eq!(decoded, rounded);
        prop_assert!((decoded - n).abs() <= 5e-7 + n.abs() * f64::EPSILON);
    }

    /// Integral numbers survive exactly
    #[test]
    fn prop_integers_exact(i in -(1i64 << 40)..(1i64 << 40)) {
        let decoded = decode(&encode(&Value::from(i))).unwrap();
        prop_assert_eq!(decoded, Decoded::Value(Value::Number(i as f64)));
    }

    /// Any value whose first byte is not a known tag decodes as unknown
    #[test]
    fn prop_unknown_tags(tag in any::<u8>(), rest in proptest::collection::vec(any::<u8>(), 0..32)) {
        prop_assume!(tag != TAG_TEXT && tag != TAG_NUMBER && tag != TAG_BOOLEAN);
        let mut data = vec![tag];
        data.extend(rest);
        prop_assert_eq!(decode(&data).unwrap(), Decoded::Unknown { tag: Some(tag) });
    }

    /// Decoding arbitrary bytes never panics
    #[test]
    fn prop_decode_total(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode(&data);
    }
}

proptest! {
    /// Text must end in its terminator; nothing else is accepted
    #[test]
    fn prop_unterminated_text_rejected(mut bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        prop_assume!(bytes.last() != Some(&0));
        bytes.insert(0, TAG_TEXT);
        prop_assert!(decode(&bytes).is_err());
    }
}
