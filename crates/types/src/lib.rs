use std::cmp::Ordering;
use std::fmt;

/// Fixed-width, zero-padded byte string used as an index key.
///
/// The on-disk footprint is always `N` bytes, so every value of a given
/// `FixedString<N>` type encodes to the same length. Comparison is
/// byte-wise over the padded buffer, which for zero-padded UTF-8 content
/// matches C `strcmp` ordering.
///
/// Examples:
/// - `let user: FixedString<20> = FixedString::from("alice");`
/// - `let key: FixedString<64> = FixedString::from("key42");`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedString<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> FixedString<N> {
    /// Build from a string slice, truncating to the widest prefix of
    /// complete characters that fits in `N` bytes.
    pub fn new(s: &str) -> Self {
        let mut data = [0u8; N];
        let mut end = 0;
        for (idx, ch) in s.char_indices() {
            if idx + ch.len_utf8() > N {
                break;
            }
            end = idx + ch.len_utf8();
        }
        data[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self { data }
    }

    /// Number of content bytes before the zero padding begins.
    pub fn len(&self) -> usize {
        self.data.iter().position(|&b| b == 0).unwrap_or(N)
    }

    pub fn is_empty(&self) -> bool {
        self.data.first().is_none_or(|&b| b == 0)
    }

    /// Content as a string slice (constructors only admit valid UTF-8,
    /// so the fallback is never hit in practice).
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.data[..self.len()]).unwrap_or_default()
    }

    /// Full padded buffer, including trailing zeros.
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Default for FixedString<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> From<&str> for FixedString<N> {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<const N: usize> From<&String> for FixedString<N> {
    fn from(s: &String) -> Self {
        Self::new(s)
    }
}

impl<const N: usize> fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<const N: usize> AsRef<[u8]> for FixedString<N> {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> serde::Serialize for FixedString<N> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.data)
    }
}

impl<'de, const N: usize> serde::Deserialize<'de> for FixedString<N> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor<const N: usize>;

        impl<'de, const N: usize> serde::de::Visitor<'de> for BytesVisitor<N> {
            type Value = FixedString<N>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "exactly {N} bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                if v.len() != N {
                    return Err(E::invalid_length(v.len(), &self));
                }
                let mut data = [0u8; N];
                data.copy_from_slice(v);
                Ok(FixedString { data })
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut data = [0u8; N];
                for (i, slot) in data.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(FixedString { data })
            }
        }

        deserializer.deserialize_bytes(BytesVisitor)
    }
}

pub type HashValue = i64;

const HASH_BASE1: HashValue = 10007;
const HASH_BASE2: HashValue = 9973;
const HASH_MOD1: HashValue = 998_244_353;
const HASH_MOD2: HashValue = 1_000_000_007;

/// Two independent rolling polynomial hashes over a byte image.
fn rolling_hashes(bytes: &[u8]) -> (HashValue, HashValue) {
    let mut h1 = 0;
    let mut h2 = 0;
    for &b in bytes {
        h1 = (h1 * HASH_BASE1 + HashValue::from(b)) % HASH_MOD1;
        h2 = (h2 * HASH_BASE2 + HashValue::from(b)) % HASH_MOD2;
    }
    (h1, h2)
}

/// Opt-in total order for opaque byte-image types.
///
/// Orders by the two rolling hashes compared lexicographically, breaking
/// hash-collision ties by raw-byte comparison so distinct images never
/// compare equal. Prefer a natural `Ord` implementation whenever the
/// wrapped type has one; this wrapper exists for payload types that do not.
#[derive(Clone, Copy, Debug)]
pub struct HashOrdered<T>(pub T);

impl<T: AsRef<[u8]>> HashOrdered<T> {
    fn hashes(&self) -> (HashValue, HashValue) {
        rolling_hashes(self.0.as_ref())
    }
}

impl<T: AsRef<[u8]>> PartialEq for HashOrdered<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl<T: AsRef<[u8]>> Eq for HashOrdered<T> {}

impl<T: AsRef<[u8]>> Ord for HashOrdered<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hashes()
            .cmp(&other.hashes())
            .then_with(|| self.0.as_ref().cmp(other.0.as_ref()))
    }
}

impl<T: AsRef<[u8]>> PartialOrd for HashOrdered<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
