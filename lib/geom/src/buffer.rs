//! Scalar types which may be stored within a numeric buffer.
//!
//! Numeric buffers are plain [`DMatrix`]es: one row per element (vertex, triangle, ...), one
//! column per component. Whatever the in-memory layout of the matrix, buffers always leave the
//! process in row-major order.

use nalgebra::DMatrix;

/// The type of the components of a numeric buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    U16,
    U32,
    F32,
}

impl ScalarType {
    /// Size of a single component, in bytes.
    pub const fn size(self) -> usize {
        use std::mem::size_of;
        match self {
            ScalarType::U8 => size_of::<u8>(),
            ScalarType::U16 => size_of::<u16>(),
            ScalarType::U32 => size_of::<u32>(),
            ScalarType::F32 => size_of::<f32>(),
        }
    }

    /// The byte identifying this type within an encoded buffer.
    pub const fn tag(self) -> u8 {
        match self {
            ScalarType::U8 => 0x01,
            ScalarType::U16 => 0x02,
            ScalarType::U32 => 0x03,
            ScalarType::F32 => 0x04,
        }
    }

    /// Inverse of [Self::tag].
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(ScalarType::U8),
            0x02 => Some(ScalarType::U16),
            0x03 => Some(ScalarType::U32),
            0x04 => Some(ScalarType::F32),
            _ => None,
        }
    }
}

/// Trait for types which can be used as numeric buffer components.
pub trait BufferScalar: nalgebra::Scalar + num_traits::Zero + Copy {
    const SCALAR: ScalarType;

    /// Append the little-endian bytes of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Read a value from exactly `Self::SCALAR.size()` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_buffer_scalar {
    ($Target:ident: $scalar:ident) => {
        // "size of type $Target == size of scalar $scalar"
        static_assertions::const_assert_eq!(
            std::mem::size_of::<$Target>(),
            ScalarType::$scalar.size()
        );
        impl BufferScalar for $Target {
            const SCALAR: ScalarType = ScalarType::$scalar;

            #[inline]
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$Target>()];
                raw.copy_from_slice(bytes);
                $Target::from_le_bytes(raw)
            }
        }
    };
}

impl_buffer_scalar!(u8: U8);
impl_buffer_scalar!(u16: U16);
impl_buffer_scalar!(u32: U32);
impl_buffer_scalar!(f32: F32);

/// Iterate over the components of a buffer in row-major order.
pub fn row_major<T: nalgebra::Scalar + Copy>(matrix: &DMatrix<T>) -> impl Iterator<Item = T> + '_ {
    (0..matrix.nrows()).flat_map(move |r| (0..matrix.ncols()).map(move |c| matrix[(r, c)]))
}

/// Build a buffer from fixed-width rows, e.g. a list of [Triangles](crate::Triangle).
pub fn from_rows<T: nalgebra::Scalar + Copy, const N: usize>(rows: &[[T; N]]) -> DMatrix<T> {
    DMatrix::from_fn(rows.len(), N, |r, c| rows[r][c])
}

/// Split a buffer into fixed-width rows. Returns `None` if the buffer is not `N` columns wide.
pub fn to_rows<T: nalgebra::Scalar + Copy, const N: usize>(
    matrix: &DMatrix<T>,
) -> Option<Vec<[T; N]>> {
    if matrix.ncols() != N {
        return None;
    }
    Some(
        (0..matrix.nrows())
            .map(|r| std::array::from_fn(|c| matrix[(r, c)]))
            .collect(),
    )
}

/// The first `count` rows of a buffer.
pub fn leading_rows<T: nalgebra::Scalar + Copy>(matrix: &DMatrix<T>, count: usize) -> DMatrix<T> {
    DMatrix::from_fn(count.min(matrix.nrows()), matrix.ncols(), |r, c| {
        matrix[(r, c)]
    })
}
