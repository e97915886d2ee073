use chrono::{NaiveDate, NaiveDateTime};
use facet::Facet;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::*;

#[test]
fn test_scalar_shapes() {
    let cases = [
        (bool::SHAPE, DataType::Bool, 8),
        (i16::SHAPE, DataType::Int, 16),
        (u64::SHAPE, DataType::Uint, 64),
        (f32::SHAPE, DataType::Float, 32),
        (Decimal::SHAPE, DataType::Float, 64),
        (String::SHAPE, DataType::String, 0),
        (NaiveDateTime::SHAPE, DataType::Time, 3),
        (NaiveDate::SHAPE, DataType::Time, 0),
    ];
    for (shape, data_type, size) in cases {
        let scalar = column::Scalar::of(shape).unwrap();
        assert_eq!(scalar.data_type(), data_type, "{shape}");
        assert_eq!(scalar.size(), size, "{shape}");
    }
    assert!(column::Scalar::of(<Vec<String>>::SHAPE).is_none());
}

#[test]
fn test_collections_are_stored_as_json() {
    let column::FieldKind::Column(storage) = column::classify(<Vec<String>>::SHAPE) else {
        panic!("a list of strings is not a relation");
    };
    assert_eq!(
        storage,
        column::Storage::Json {
            nullable: false,
            wrapped: false
        }
    );

    let column::FieldKind::Column(storage) = column::classify(<Option<Json<Vec<u8>>>>::SHAPE)
    else {
        panic!("a json wrapper is not a relation");
    };
    assert_eq!(
        storage,
        column::Storage::Json {
            nullable: true,
            wrapped: true
        }
    );
}

#[test]
fn test_storage_coerce_normalizes_values() {
    let storage = column::Storage::Native {
        scalar: column::Scalar::U8,
        nullable: false,
    };
    assert_eq!(storage.coerce(&Value::I64(7)).unwrap(), Value::U64(7));
    assert!(matches!(
        storage.coerce(&Value::I64(300)),
        Err(SchemaError::TypeMismatch { expected: "u8", .. })
    ));
    assert_eq!(storage.zero(), Value::U64(0));

    let storage = column::Storage::Native {
        scalar: column::Scalar::DateTime,
        nullable: true,
    };
    let parsed = storage.coerce(&Value::from("2024-01-02 03:04:05.250")).unwrap();
    let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_milli_opt(3, 4, 5, 250)
        .unwrap();
    assert_eq!(parsed, Value::Time(expected));
    assert_eq!(storage.zero(), Value::Null);
}

#[test]
fn test_priority_ties_keep_declaration_order() {
    let parts = vec![
        IndexPart {
            column: "c".into(),
            priority: 1,
            position: 0,
        },
        IndexPart {
            column: "b".into(),
            priority: 0,
            position: 2,
        },
        IndexPart {
            column: "a".into(),
            priority: 0,
            position: 1,
        },
    ];
    assert_eq!(ordered_columns(&parts), vec!["a", "b", "c"]);
}

#[test]
fn test_parse_tag() {
    let settings = parse_tag(r"field:user_name; size:64;comment:a\;b\;c;unique");
    let pairs: Vec<(&str, &str)> = settings
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("field", "user_name"),
            ("size", "64"),
            ("comment", "a;b;c"),
            ("unique", ""),
        ]
    );
}

#[test]
fn test_parse_tag_empty() {
    assert!(parse_tag("").is_empty());
    assert!(parse_tag(";;").is_empty());
}

#[test]
fn test_parse_tag_trailing_backslash_is_kept() {
    let settings = parse_tag(r"size:8;comment:x\");
    assert_eq!(settings["size"], "8");
    assert_eq!(settings["comment"], r"x\");

    let settings = parse_tag(r"comment:a\;b\");
    assert_eq!(settings["comment"], r"a;b\");
}

#[test]
fn test_split_index_spec() {
    assert_eq!(tag::split_index_spec("idx.2"), ("idx", "2"));
    assert_eq!(tag::split_index_spec("idx"), ("idx", ""));
    assert_eq!(tag::split_index_spec(""), ("", ""));
    assert_eq!(tag::split_index_spec(".1"), ("", "1"));
}

proptest! {
    #[test]
    fn snake_case_is_idempotent(name in "[A-Za-z_][A-Za-z0-9_]{0,20}") {
        let once = snake_case(&name);
        prop_assert!(!once.chars().any(|c| c.is_ascii_uppercase()));
        prop_assert_eq!(snake_case(&once), once.clone());
    }

    #[test]
    fn parse_tag_keeps_plain_values(value in "[a-z0-9 ,.()]{0,16}") {
        let settings = parse_tag(&format!("comment:{value};size:8"));
        prop_assert_eq!(settings.get("comment").map(String::as_str), Some(value.as_str()));
        prop_assert_eq!(settings.get("size").map(String::as_str), Some("8"));
    }
}
