//! Wire-codec compliance: byte-level layouts and decode(encode(x)) == x
//! across the built-in types, including null and boundary values.

use bytes::{Buf, BytesMut};
use proptest::prelude::*;

use uastack::types::{
    BinaryDecode, BinaryEncode, ByteString, DataValue, DateTime, DecodingLimits, ExpandedNodeId,
    ExtensionObject, ExtensionObjectBody, Guid, Identifier, LocalizedText, NodeId, QualifiedName,
    StatusCode, UaString, Variant, VariantArray, VariantType,
};

fn round_trip<T>(value: &T) -> T
where
    T: BinaryEncode + BinaryDecode + PartialEq + std::fmt::Debug,
{
    let mut buf = BytesMut::new();
    value.encode(&mut buf).expect("encode");
    let mut bytes = buf.freeze();
    let decoded = T::decode(&mut bytes, &DecodingLimits::default()).expect("decode");
    assert_eq!(bytes.remaining(), 0, "decoder consumed everything");
    decoded
}

#[test]
fn little_endian_layout() {
    let mut buf = BytesMut::new();
    0x1234_5678u32.encode(&mut buf).unwrap();
    assert_eq!(&buf[..], &[0x78, 0x56, 0x34, 0x12]);
}

#[test]
fn boolean_is_one_byte() {
    let mut buf = BytesMut::new();
    true.encode(&mut buf).unwrap();
    false.encode(&mut buf).unwrap();
    assert_eq!(&buf[..], &[1, 0]);
}

#[test]
fn null_and_empty_strings_are_distinct() {
    let mut null_buf = BytesMut::new();
    (None as UaString).encode(&mut null_buf).unwrap();
    let mut empty_buf = BytesMut::new();
    Some(String::new()).encode(&mut empty_buf).unwrap();
    assert_eq!(&null_buf[..], &(-1i32).to_le_bytes());
    assert_eq!(&empty_buf[..], &0i32.to_le_bytes());
    assert_ne!(&null_buf[..], &empty_buf[..]);
}

#[test]
fn date_time_boundaries() {
    for dt in [DateTime::NULL, DateTime::MAX, DateTime::now()] {
        assert_eq!(round_trip(&dt), dt);
    }
}

#[test]
fn node_id_all_six_encodings() {
    let cases: Vec<(NodeId, u8)> = vec![
        (NodeId::new_numeric(0, 42), 0x00),
        (NodeId::new_numeric(3, 1025), 0x01),
        (NodeId::new_numeric(300, 1), 0x02),
        (NodeId::new_string(1, "Tank/Level"), 0x03),
        (NodeId::new_guid(1, Guid::random()), 0x04),
        (NodeId::new_opaque(1, ByteString::from_bytes(vec![7, 7, 7])), 0x05),
    ];
    for (id, expected_tag) in cases {
        let mut buf = BytesMut::new();
        id.encode(&mut buf).unwrap();
        assert_eq!(buf[0], expected_tag, "tag for {id}");
        assert_eq!(round_trip(&id), id);
    }
}

#[test]
fn expanded_node_id_flags() {
    let expanded = ExpandedNodeId {
        node_id: NodeId::new_numeric(2, 99),
        namespace_uri: Some("urn:factory".to_string()),
        server_index: 5,
    };
    let mut buf = BytesMut::new();
    expanded.encode(&mut buf).unwrap();
    assert_eq!(buf[0] & 0xC0, 0xC0);
    assert_eq!(round_trip(&expanded), expanded);
}

#[test]
fn data_value_with_only_status() {
    let dv = DataValue::bad(StatusCode::BAD_NOT_CONNECTED);
    let mut buf = BytesMut::new();
    dv.encode(&mut buf).unwrap();
    assert_eq!(buf[0], 0x02);
    assert_eq!(round_trip(&dv), dv);
}

#[test]
fn unknown_extension_object_round_trips_bit_exact() {
    let object = ExtensionObject {
        type_id: NodeId::new_numeric(4, 88_000),
        body: ExtensionObjectBody::ByteString(ByteString::from_bytes(vec![0xDE, 0xAD, 0xBE, 0xEF])),
    };
    let mut first = BytesMut::new();
    object.encode(&mut first).unwrap();
    let decoded =
        ExtensionObject::decode(&mut first.clone().freeze(), &DecodingLimits::default()).unwrap();
    let mut second = BytesMut::new();
    decoded.encode(&mut second).unwrap();
    assert_eq!(&first[..], &second[..]);
}

#[test]
fn empty_array_and_null_array_are_distinct() {
    let mut null_buf = BytesMut::new();
    (None as Option<Vec<u32>>).encode(&mut null_buf).unwrap();
    let mut empty_buf = BytesMut::new();
    Some(Vec::<u32>::new()).encode(&mut empty_buf).unwrap();
    assert_ne!(&null_buf[..], &empty_buf[..]);
    assert_eq!(
        round_trip(&(None as Option<Vec<u32>>)),
        None::<Vec<u32>>
    );
    assert_eq!(round_trip(&Some(Vec::<u32>::new())), Some(vec![]));
}

#[test]
fn max_length_array_boundary() {
    let limits = DecodingLimits {
        max_array_length: 4,
        ..Default::default()
    };
    let mut ok_buf = BytesMut::new();
    Some(vec![1u32, 2, 3, 4]).encode(&mut ok_buf).unwrap();
    assert!(Option::<Vec<u32>>::decode(&mut ok_buf.freeze(), &limits).is_ok());

    let mut over_buf = BytesMut::new();
    Some(vec![1u32, 2, 3, 4, 5]).encode(&mut over_buf).unwrap();
    assert_eq!(
        Option::<Vec<u32>>::decode(&mut over_buf.freeze(), &limits).unwrap_err(),
        StatusCode::BAD_ENCODING_LIMITS_EXCEEDED
    );
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

fn arb_guid() -> impl Strategy<Value = Guid> {
    (any::<u32>(), any::<u16>(), any::<u16>(), any::<[u8; 8]>()).prop_map(
        |(data1, data2, data3, data4)| Guid {
            data1,
            data2,
            data3,
            data4,
        },
    )
}

fn arb_node_id() -> impl Strategy<Value = NodeId> {
    prop_oneof![
        (any::<u16>(), any::<u32>()).prop_map(|(ns, v)| NodeId::new_numeric(ns, v)),
        (any::<u16>(), ".{0,40}").prop_map(|(ns, s)| NodeId::new_string(ns, s)),
        (any::<u16>(), arb_guid()).prop_map(|(ns, g)| NodeId::new_guid(ns, g)),
        (any::<u16>(), proptest::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(ns, b)| NodeId::new_opaque(ns, ByteString::from_bytes(b))),
    ]
}

fn arb_scalar_variant() -> impl Strategy<Value = Variant> {
    prop_oneof![
        Just(Variant::Empty),
        any::<bool>().prop_map(Variant::Boolean),
        any::<i8>().prop_map(Variant::SByte),
        any::<u8>().prop_map(Variant::Byte),
        any::<i16>().prop_map(Variant::Int16),
        any::<u16>().prop_map(Variant::UInt16),
        any::<i32>().prop_map(Variant::Int32),
        any::<u32>().prop_map(Variant::UInt32),
        any::<i64>().prop_map(Variant::Int64),
        any::<u64>().prop_map(Variant::UInt64),
        proptest::num::f64::NORMAL.prop_map(Variant::Double),
        proptest::option::of(".{0,20}").prop_map(Variant::String),
        any::<i64>().prop_map(|t| Variant::DateTime(DateTime::from_ticks(t))),
        arb_guid().prop_map(Variant::Guid),
        arb_node_id().prop_map(Variant::NodeId),
        any::<u32>().prop_map(|bits| Variant::StatusCode(StatusCode(bits))),
        (any::<u16>(), proptest::option::of(".{0,20}")).prop_map(|(ns, name)| {
            Variant::QualifiedName(QualifiedName {
                namespace_index: ns,
                name,
            })
        }),
        (proptest::option::of(".{0,8}"), proptest::option::of(".{0,20}")).prop_map(
            |(locale, text)| Variant::LocalizedText(LocalizedText { locale, text })
        ),
    ]
}

proptest! {
    #[test]
    fn strings_round_trip(s in proptest::option::of(".{0,200}")) {
        prop_assert_eq!(round_trip(&s.clone()), s);
    }

    #[test]
    fn byte_strings_round_trip(b in proptest::collection::vec(any::<u8>(), 0..512)) {
        let bs = ByteString::from_bytes(b);
        prop_assert_eq!(round_trip(&bs.clone()), bs);
    }

    #[test]
    fn node_ids_round_trip(id in arb_node_id()) {
        prop_assert_eq!(round_trip(&id.clone()), id);
    }

    #[test]
    fn qualified_names_round_trip(ns in any::<u16>(), name in proptest::option::of(".{0,60}")) {
        let qn = QualifiedName { namespace_index: ns, name };
        prop_assert_eq!(round_trip(&qn.clone()), qn);
    }

    #[test]
    fn scalar_variants_round_trip(v in arb_scalar_variant()) {
        prop_assert_eq!(round_trip(&v.clone()), v);
    }

    #[test]
    fn int32_arrays_round_trip(values in proptest::collection::vec(any::<i32>(), 0..64)) {
        let array = Variant::array(
            VariantType::Int32,
            values.into_iter().map(Variant::Int32).collect(),
        );
        prop_assert_eq!(round_trip(&array.clone()), array);
    }

    #[test]
    fn matrices_round_trip(rows in 1usize..5, cols in 1usize..5) {
        let matrix = Variant::Array(Box::new(VariantArray {
            value_type: VariantType::UInt16,
            values: (0..rows * cols).map(|v| Variant::UInt16(v as u16)).collect(),
            dimensions: Some(vec![rows as i32, cols as i32]),
        }));
        prop_assert_eq!(round_trip(&matrix.clone()), matrix);
    }

    #[test]
    fn identifier_kind_preserved(id in arb_node_id()) {
        let decoded = round_trip(&id.clone());
        let same_kind = matches!(
            (&id.identifier, &decoded.identifier),
            (Identifier::Numeric(_), Identifier::Numeric(_))
                | (Identifier::String(_), Identifier::String(_))
                | (Identifier::Guid(_), Identifier::Guid(_))
                | (Identifier::Opaque(_), Identifier::Opaque(_))
        );
        prop_assert!(same_kind);
    }

    #[test]
    fn truncated_variants_never_panic(v in arb_scalar_variant(), cut in 0usize..8) {
        let mut buf = BytesMut::new();
        v.encode(&mut buf).unwrap();
        let truncated_len = buf.len().saturating_sub(cut);
        if truncated_len < buf.len() {
            let mut bytes = buf.freeze().slice(0..truncated_len);
            // Must error or succeed, never panic.
            let _ = Variant::decode(&mut bytes, &DecodingLimits::default());
        }
    }
}
