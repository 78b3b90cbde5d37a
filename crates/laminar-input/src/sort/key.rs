//! Sort keys and their memcomparable encoding.
//!
//! The sorting stage compares keys as raw bytes: every [`SortKey`] is
//! encoded into a byte sequence whose lexicographic order matches the
//! key's order. Encoded keys are what get buffered and spilled, so the
//! merge never has to deserialize a payload to compare it.
//!
//! Each encoding starts with a one-byte [`Tag`], so keys of different
//! variants order by variant first. Integers are big-endian with the sign
//! bit flipped. Floats are mapped onto integers in IEEE 754 total order
//! and then written like integers. Strings and byte strings escape every
//! zero byte as `00 FF` and end with `00 00`, which keeps a prefix ahead
//! of its extensions. Tuples concatenate their elements.

use std::sync::Arc;

#[repr(u8)]
#[derive(Clone, Copy)]
enum Tag {
    Null = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    Text = 4,
    Bytes = 5,
    Tuple = 6,
}

/// A key extracted from a record for ordering.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    /// Missing key; sorts first.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer (also used for timestamps).
    Int64(i64),
    /// Floating point, ordered by IEEE 754 total order.
    Float64(f64),
    /// UTF-8 string, ordered bytewise.
    Utf8(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Composite key compared element by element.
    Tuple(Vec<SortKey>),
}

impl SortKey {
    /// Encodes the key into a memcomparable byte sequence.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        self.encode_into(&mut out);
        out
    }

    /// Appends the encoding of this key to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(Tag::Null as u8),
            Self::Bool(b) => out.extend_from_slice(&[Tag::Bool as u8, u8::from(*b)]),
            Self::Int64(v) => put_ordered_i64(Tag::Int, *v, out),
            Self::Float64(v) => put_ordered_i64(Tag::Float, float_order(*v), out),
            Self::Utf8(s) => put_escaped(Tag::Text, s.as_bytes(), out),
            Self::Binary(b) => put_escaped(Tag::Bytes, b, out),
            Self::Tuple(items) => {
                out.push(Tag::Tuple as u8);
                items.iter().for_each(|item| item.encode_into(out));
            }
        }
    }
}

impl From<i64> for SortKey {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<&str> for SortKey {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for SortKey {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

/// Extracts the sort key of a record value.
pub type KeySelector<T> = Arc<dyn Fn(&T) -> SortKey + Send + Sync>;

fn put_ordered_i64(tag: Tag, v: i64, out: &mut Vec<u8>) {
    out.push(tag as u8);
    out.extend_from_slice(&((v as u64) ^ (1 << 63)).to_be_bytes());
}

/// Integer whose order matches `f64::total_cmp`.
fn float_order(v: f64) -> i64 {
    let raw = v.to_bits() as i64;
    raw ^ (((raw >> 63) as u64) >> 1) as i64
}

fn put_escaped(tag: Tag, data: &[u8], out: &mut Vec<u8>) {
    out.reserve(data.len() + 3);
    out.push(tag as u8);
    for chunk in data.split(|&b| b == 0) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(&[0, 0xFF]);
    }
    // The last chunk's escape becomes the terminator.
    let len = out.len();
    out[len - 1] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_sorted(keys: &[SortKey]) {
        for pair in keys.windows(2) {
            assert!(
                pair[0].encode() < pair[1].encode(),
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_int64_order() {
        let keys: Vec<SortKey> = [i64::MIN, -1_000_000, -1, 0, 1, 1_000_000, i64::MAX]
            .into_iter()
            .map(SortKey::Int64)
            .collect();
        assert_sorted(&keys);
    }

    #[test]
    fn test_float64_order() {
        let keys: Vec<SortKey> = [f64::NEG_INFINITY, f64::MIN, -1.5, -0.0, 0.0, 1.5, f64::MAX]
            .into_iter()
            .map(SortKey::Float64)
            .collect();
        assert_sorted(&keys);
    }

    #[test]
    fn test_string_order_with_embedded_nul() {
        assert_sorted(&[
            SortKey::from(""),
            SortKey::from("a"),
            SortKey::from("a\x00"),
            SortKey::from("a\x00b"),
            SortKey::from("ab"),
            SortKey::from("b"),
        ]);
    }

    #[test]
    fn test_null_sorts_first() {
        assert_sorted(&[SortKey::Null, SortKey::Bool(false), SortKey::Int64(i64::MIN)]);
    }

    #[test]
    fn test_tuple_order() {
        assert_sorted(&[
            SortKey::Tuple(vec![SortKey::from("a"), SortKey::Int64(9)]),
            SortKey::Tuple(vec![SortKey::from("b"), SortKey::Int64(1)]),
            SortKey::Tuple(vec![SortKey::from("b"), SortKey::Int64(2)]),
        ]);
    }

    #[test]
    fn test_selector_type() {
        let selector: KeySelector<(String, i64)> = Arc::new(|v| SortKey::Int64(v.1));
        assert_eq!(selector(&("x".into(), 5)), SortKey::Int64(5));
    }
}
