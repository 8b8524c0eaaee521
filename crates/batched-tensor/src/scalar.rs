//! Scalar trait for elements moved through the store.
//!
//! The store shuttles raw element data between tensors and backing files,
//! so a scalar must expose a fixed byte width and a little-endian encoding.
//! All file offset arithmetic is driven by `WIDTH`.

use std::fmt::Debug;

use num_complex::Complex64;
use num_traits::Zero;

/// Element type stored in blocks and in the backing data file.
pub trait Scalar:
    Copy + Debug + Default + PartialEq + Zero + Send + Sync + 'static
{
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode into `buf` (exactly `WIDTH` bytes).
    fn write_le(&self, buf: &mut [u8]);

    /// Decode from `buf` (exactly `WIDTH` bytes).
    fn read_le(buf: &[u8]) -> Self;

    /// Magnitude used by the small-value filter.
    fn magnitude(&self) -> f64;

    /// Create a scalar from f64.
    fn from_f64(val: f64) -> Self;
}

impl Scalar for f64 {
    const WIDTH: usize = 8;

    fn write_le(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Self {
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[..8]);
        f64::from_le_bytes(b)
    }

    fn magnitude(&self) -> f64 {
        self.abs()
    }

    fn from_f64(val: f64) -> Self {
        val
    }
}

impl Scalar for Complex64 {
    const WIDTH: usize = 16;

    fn write_le(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.re.to_le_bytes());
        buf[8..16].copy_from_slice(&self.im.to_le_bytes());
    }

    fn read_le(buf: &[u8]) -> Self {
        let mut re = [0u8; 8];
        let mut im = [0u8; 8];
        re.copy_from_slice(&buf[..8]);
        im.copy_from_slice(&buf[8..16]);
        Complex64::new(f64::from_le_bytes(re), f64::from_le_bytes(im))
    }

    fn magnitude(&self) -> f64 {
        self.norm()
    }

    fn from_f64(val: f64) -> Self {
        Complex64::new(val, 0.0)
    }
}

/// Encode a slice of scalars into contiguous little-endian bytes.
pub(crate) fn encode_elements<T: Scalar>(data: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; data.len() * T::WIDTH];
    for (i, v) in data.iter().enumerate() {
        v.write_le(&mut out[i * T::WIDTH..(i + 1) * T::WIDTH]);
    }
    out
}

/// Decode contiguous little-endian bytes into scalars.
pub(crate) fn decode_elements<T: Scalar>(buf: &[u8]) -> Vec<T> {
    let n = buf.len() / T::WIDTH;
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(T::read_le(&buf[i * T::WIDTH..(i + 1) * T::WIDTH]));
    }
    out
}
