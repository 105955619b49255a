
//! Low level binary read and write helpers.
//! All numbers are stored little-endian, independent of the host.

pub use ::std::io::{Read, Write};
use lebe::prelude::*;
use crate::error::{Error, Result, UnitResult};


/// Extension trait for primitive types like numbers and slices of numbers.
pub trait Data: Sized + Default + Clone {

    /// The number of bytes this value occupies in a stream.
    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();

    fn read(read: &mut impl Read) -> Result<Self>;

    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    fn write(self, write: &mut impl Write) -> UnitResult;

    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    #[inline]
    fn read_vec(read: &mut impl Read, count: usize) -> Result<Vec<Self>> {
        let mut vec = vec![Self::default(); count];
        Self::read_slice(read, &mut vec)?;
        Ok(vec)
    }

    /// Write the number of elements as `i32`, then the elements themselves.
    #[inline]
    fn write_i32_sized_slice<W: Write>(write: &mut W, slice: &[Self]) -> UnitResult {
        let length = crate::error::usize_to_i32(slice.len(), "slice too long for stream")?;
        length.write(write)?;
        Self::write_slice(write, slice)
    }

    /// Read a slice that was written with `write_i32_sized_slice`.
    #[inline]
    fn read_i32_sized_vec(read: &mut impl Read, soft_max: usize) -> Result<Vec<Self>> {
        let count = i32::read(read)?;
        if count < 0 { return Err(Error::invalid("negative array size")); }

        let count = count as usize;
        debug_assert!(count <= soft_max, "suspiciously large array size: {} (expected at most {})", count, soft_max);

        Self::read_vec(read, count)
    }
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);
