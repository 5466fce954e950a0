//! Bencode encoder

use bytes::{BufMut, BytesMut};

use super::BencodeValue;

/// Encode a value, emitting dictionary entries in their stored order
///
/// For a value produced by the decoder this reproduces the original bytes.
pub fn encode(value: &BencodeValue) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf, false);
    buf.to_vec()
}

/// Encode a value with every dictionary's keys sorted bytewise
pub fn encode_canonical(value: &BencodeValue) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf, true);
    buf.to_vec()
}

fn encode_into(value: &BencodeValue, buf: &mut BytesMut, sort_keys: bool) {
    match value {
        BencodeValue::Bytes(bytes) => put_bytes(buf, bytes),
        BencodeValue::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        BencodeValue::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_into(item, buf, sort_keys);
            }
            buf.put_u8(b'e');
        }
        BencodeValue::Dict(entries) => {
            let mut ordered: Vec<&(Vec<u8>, BencodeValue)> = entries.iter().collect();
            if sort_keys {
                ordered.sort_by(|a, b| a.0.cmp(&b.0));
            }
            buf.put_u8(b'd');
            for (key, value) in ordered {
                put_bytes(buf, key);
                encode_into(value, buf, sort_keys);
            }
            buf.put_u8(b'e');
        }
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode_all;
    use proptest::prelude::*;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&BencodeValue::string("hello")), b"5:hello");
        assert_eq!(encode(&BencodeValue::Integer(-42)), b"i-42e");
        assert_eq!(encode(&BencodeValue::Bytes(vec![])), b"0:");
    }

    #[test]
    fn test_encode_preserves_stored_order() {
        let value = BencodeValue::dict()
            .insert("spam", "eggs".into())
            .insert("cow", "moo".into());
        assert_eq!(encode(&value), b"d4:spam4:eggs3:cow3:mooe");
    }

    #[test]
    fn test_encode_canonical_sorts_nested_keys() {
        let value = BencodeValue::dict()
            .insert("zeta", BencodeValue::dict().insert("b", 2.into()).insert("a", 1.into()))
            .insert("alpha", BencodeValue::list().push(BencodeValue::dict().insert("y", 0.into()).insert("x", 0.into())));

        assert_eq!(
            encode_canonical(&value),
            b"d5:alphald1:xi0e1:yi0eee4:zetad1:ai1e1:bi2eee".to_vec()
        );
    }

    #[test]
    fn test_canonical_sort_is_bytewise() {
        // Uppercase sorts before lowercase, and a prefix sorts before its extensions
        let value = BencodeValue::dict()
            .insert("b", 0.into())
            .insert("ab", 0.into())
            .insert("a", 0.into())
            .insert("B", 0.into());
        assert_eq!(encode_canonical(&value), b"d1:Bi0e1:ai0e2:abi0e1:bi0ee".to_vec());
    }

    #[test]
    fn test_reencode_decoded_bytes() {
        let raw = b"d8:announce3:url4:infod6:lengthi5e4:name1:xee";
        assert_eq!(encode(&decode_all(raw).unwrap()), raw.to_vec());
    }

    fn arb_value() -> impl Strategy<Value = BencodeValue> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(BencodeValue::Integer),
            proptest::collection::vec(any::<u8>(), 0..24).prop_map(BencodeValue::Bytes),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(BencodeValue::List),
                proptest::collection::btree_map(
                    proptest::collection::vec(any::<u8>(), 0..8),
                    inner,
                    0..6
                )
                .prop_map(|m| BencodeValue::Dict(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(value in arb_value()) {
            let encoded = encode(&value);
            prop_assert_eq!(decode_all(&encoded).unwrap(), value);
        }
    }
}
