use jcs_rs::{canonical_to_string, canonicalize, canonicalize_str, is_canonical};
use serde_json::{json, Value};

/// Inline conformance vectors: input JSON text and expected canonical text.
const VECTORS: &[(&str, &str, &str)] = &[
    ("sorted_object", r#"{"b":2,"a":1}"#, r#"{"a":1,"b":2}"#),
    ("nested_sort", r#"{"z":{"b":1,"a":2},"a":0}"#, r#"{"a":0,"z":{"a":2,"b":1}}"#),
    ("array_order_kept", r#"[3,1,2]"#, r#"[3,1,2]"#),
    ("null_kept", r#"{"k":null}"#, r#"{"k":null}"#),
    ("empty_containers", r#"{"empty_obj":{},"empty_arr":[]}"#, r#"{"empty_arr":[],"empty_obj":{}}"#),
    ("whitespace_stripped", r#"{ "a" : [ 1 , 2 ] }"#, r#"{"a":[1,2]}"#),
    ("integer_shortest", r#"{"n":42}"#, r#"{"n":42}"#),
    ("negative_zero_int", r#"{"n":-7}"#, r#"{"n":-7}"#),
    ("float_shortest", r#"{"n":1.5}"#, r#"{"n":1.5}"#),
    ("bool_literals", r#"{"t":true,"f":false}"#, r#"{"f":false,"t":true}"#),
    ("escapes", "{\"s\":\"line\\nbreak\"}", "{\"s\":\"line\\nbreak\"}"),
    ("unicode_value", r#"{"s":"héllo"}"#, r#"{"s":"héllo"}"#),
];

#[test]
fn conformance_vectors() {
    for (id, input, expected) in VECTORS {
        let got = canonicalize_str(input).unwrap_or_else(|e| panic!("{id}: {e}"));
        assert_eq!(
            String::from_utf8(got).unwrap(),
            *expected,
            "vector failed: {id}"
        );
    }
}

#[test]
fn codepoint_key_ordering() {
    // U+FFFD sorts before U+1F600 in codepoint order.
    let value = json!({"\u{1f600}": 1, "\u{fffd}": 2, "a": 0});
    let got = canonical_to_string(&value).unwrap();
    assert_eq!(got, "{\"a\":0,\"\u{fffd}\":2,\"\u{1f600}\":1}");
}

#[test]
fn idempotence() {
    for (_, input, _) in VECTORS {
        let first = canonicalize_str(input).unwrap();
        let reparsed: Value = serde_json::from_slice(&first).unwrap();
        let second = canonicalize(&reparsed).unwrap();
        assert_eq!(first, second);
        assert!(is_canonical(&first));
    }
}

#[test]
fn deep_nesting() {
    let mut nested = String::new();
    for _ in 0..64 {
        nested.push('[');
    }
    nested.push('0');
    for _ in 0..64 {
        nested.push(']');
    }
    let out = canonicalize_str(&nested).unwrap();
    assert_eq!(out, nested.into_bytes());
}

#[test]
fn semantically_equal_values_encode_identically() {
    let a: Value = serde_json::from_str(r#"{"x": 1, "y": {"b": 2, "a": 3}}"#).unwrap();
    let b: Value = serde_json::from_str(r#"{ "y" : { "a" : 3, "b" : 2 }, "x" : 1 }"#).unwrap();
    assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
}
