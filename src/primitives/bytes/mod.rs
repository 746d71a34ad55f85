#![forbid(unsafe_code)]
//! Bounds-checked little-endian field access over page buffers.

pub mod le {
    //! Fixed-width little-endian readers and writers.
    //!
    //! Every accessor validates the range against the slice and reports a
    //! corruption error instead of panicking.

    use crate::types::{AreaError, Result};

    fn field<const N: usize>(src: &[u8], at: usize) -> Result<[u8; N]> {
        let end = at
            .checked_add(N)
            .ok_or(AreaError::Corruption("field offset overflow"))?;
        let bytes = src
            .get(at..end)
            .ok_or(AreaError::Corruption("field past end of page"))?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn field_mut<const N: usize>(dst: &mut [u8], at: usize) -> Result<&mut [u8]> {
        let end = at
            .checked_add(N)
            .ok_or(AreaError::Corruption("field offset overflow"))?;
        dst.get_mut(at..end)
            .ok_or(AreaError::Corruption("field past end of page"))
    }

    /// Reads a `u16` at `at`.
    pub fn get_u16(src: &[u8], at: usize) -> Result<u16> {
        field::<2>(src, at).map(u16::from_le_bytes)
    }

    /// Writes a `u16` at `at`.
    pub fn put_u16(dst: &mut [u8], at: usize, v: u16) -> Result<()> {
        field_mut::<2>(dst, at)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads a `u32` at `at`.
    pub fn get_u32(src: &[u8], at: usize) -> Result<u32> {
        field::<4>(src, at).map(u32::from_le_bytes)
    }

    /// Writes a `u32` at `at`.
    pub fn put_u32(dst: &mut [u8], at: usize, v: u32) -> Result<()> {
        field_mut::<4>(dst, at)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads an `i32` at `at`.
    pub fn get_i32(src: &[u8], at: usize) -> Result<i32> {
        field::<4>(src, at).map(i32::from_le_bytes)
    }

    /// Writes an `i32` at `at`.
    pub fn put_i32(dst: &mut [u8], at: usize, v: i32) -> Result<()> {
        field_mut::<4>(dst, at)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    /// Reads a 48-bit unsigned value at `at`.
    pub fn get_u48(src: &[u8], at: usize) -> Result<u64> {
        let low = field::<6>(src, at)?;
        let mut out = [0u8; 8];
        out[..6].copy_from_slice(&low);
        Ok(u64::from_le_bytes(out))
    }

    /// Writes a 48-bit unsigned value at `at`; wider values are rejected.
    pub fn put_u48(dst: &mut [u8], at: usize, v: u64) -> Result<()> {
        if v >> 48 != 0 {
            return Err(AreaError::Unexpected("value exceeds 48 bits"));
        }
        field_mut::<6>(dst, at)?.copy_from_slice(&v.to_le_bytes()[..6]);
        Ok(())
    }
}
