//! Fixed-size serialization for keys and values.
//!
//! Every key and value occupies exactly `SIZE` bytes inside a node image, so
//! node capacities can be computed from the block size alone.

/// A type with a fixed-width little-endian encoding.
pub trait FixedSize: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes long.
    fn encode(&self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `SIZE` bytes long.
    fn decode(bytes: &[u8]) -> Self;
}

macro_rules! impl_fixed_size_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedSize for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_fixed_size_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl<const N: usize> FixedSize for [u8; N] {
    const SIZE: usize = N;

    fn encode(&self, out: &mut [u8]) {
        out.copy_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: FixedSize + PartialEq + std::fmt::Debug>(value: &T) {
        let mut buf = vec![0u8; T::SIZE];
        value.encode(&mut buf);
        assert_eq!(&T::decode(&buf), value);
    }

    #[test]
    fn test_integer_sizes() {
        assert_eq!(u32::SIZE, 4);
        assert_eq!(i64::SIZE, 8);
        assert_eq!(u128::SIZE, 16);
    }

    #[test]
    fn test_signed_values_survive_encoding() {
        roundtrip(&-42i64);
        roundtrip(&i32::MIN);
        roundtrip(&u64::MAX);
    }

    #[test]
    fn test_byte_arrays_encode_verbatim() {
        let value = *b"abcdefgh";
        let mut buf = [0u8; 8];
        value.encode(&mut buf);
        assert_eq!(&buf, b"abcdefgh");
        assert_eq!(<[u8; 8]>::decode(&buf), value);
    }
}
