// Binary primitives for the FlatBuffers wire format
//
// Little-endian fixed-width reads and writes at absolute offsets, plus the
// uoffset/soffset resolution rules and the vtable field lookup every table
// access goes through.

use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

use crate::internal::error::{Error, Result};

/// Size of an unsigned forward offset (uoffset_t).
pub const SIZE_UOFFSET: usize = 4;
/// Size of a signed table to vtable offset (soffset_t).
pub const SIZE_SOFFSET: usize = 4;
/// Size of a vtable entry (voffset_t).
pub const SIZE_VOFFSET: usize = 2;
/// Size of the optional file identifier following the root offset.
pub const FILE_IDENTIFIER_LENGTH: usize = 4;
/// Vtable header: vtable byte length + table byte length.
pub const VTABLE_HEADER_SIZE: usize = 4;
/// Largest absolute offset representable by the wire format.
pub const MAX_BUFFER_OFFSET: usize = i32::MAX as usize;

/// A fixed-width value stored little-endian on the wire.
pub trait Scalar: Copy + PartialEq + Debug + Default + 'static {
    const SIZE: usize;

    /// Decodes the value from exactly `SIZE` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Encodes the value into exactly `SIZE` bytes.
    fn write_le_slice(self, bytes: &mut [u8]);
}

impl Scalar for u8 {
    const SIZE: usize = 1;
    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }
    fn write_le_slice(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
}

impl Scalar for i8 {
    const SIZE: usize = 1;
    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }
    fn write_le_slice(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
}

// Booleans are a single 0/1 byte; any non-zero byte reads as true.
impl Scalar for bool {
    const SIZE: usize = 1;
    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
    fn write_le_slice(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
}

macro_rules! impl_scalar {
    ($ty:ty, $size:expr, $read:ident, $write:ident) => {
        impl Scalar for $ty {
            const SIZE: usize = $size;
            fn from_le_slice(bytes: &[u8]) -> Self {
                LittleEndian::$read(bytes)
            }
            fn write_le_slice(self, bytes: &mut [u8]) {
                LittleEndian::$write(bytes, self)
            }
        }
    };
}

impl_scalar!(u16, 2, read_u16, write_u16);
impl_scalar!(i16, 2, read_i16, write_i16);
impl_scalar!(u32, 4, read_u32, write_u32);
impl_scalar!(i32, 4, read_i32, write_i32);
impl_scalar!(u64, 8, read_u64, write_u64);
impl_scalar!(i64, 8, read_i64, write_i64);
// Floats go through their bit patterns (f32::to_bits / from_bits inside byteorder).
impl_scalar!(f32, 4, read_f32, write_f32);
impl_scalar!(f64, 8, read_f64, write_f64);

/// Returns the number of padding bytes needed to move `offset` onto `alignment`.
pub fn alignment_padding(offset: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (alignment - (offset & (alignment - 1))) & (alignment - 1)
}

/// Rounds `offset` up to the next multiple of `alignment`.
pub fn align_up(offset: usize, alignment: usize) -> usize {
    offset + alignment_padding(offset, alignment)
}

/// Checks that `[offset, offset + len)` lies within a buffer of `buffer_len` bytes.
pub fn check_range(buffer_len: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer_len => Ok(()),
        _ => Err(Error::OutOfBounds {
            offset,
            len,
            buffer_len,
        }),
    }
}

/// Resolves a stored uoffset found at `offset`.
///
/// The stored value must be at least 4 (a minimal header) and no larger than
/// `i32::MAX`; anything else means the buffer is corrupt.
pub fn resolve_uoffset(offset: usize, stored: u32) -> Result<usize> {
    if (stored as usize) < SIZE_UOFFSET || stored as usize > MAX_BUFFER_OFFSET {
        return Err(Error::CorruptBuffer(format!(
            "invalid uoffset {} at offset {}",
            stored, offset
        )));
    }
    offset
        .checked_add(stored as usize)
        .ok_or_else(|| Error::CorruptBuffer(format!("uoffset overflow at offset {}", offset)))
}

/// Resolves the vtable location of a table: `table_offset - soffset`.
pub fn resolve_soffset(table_offset: usize, stored: i32) -> Result<usize> {
    let vtable = table_offset as i64 - stored as i64;
    if vtable < 0 || vtable > MAX_BUFFER_OFFSET as i64 {
        return Err(Error::CorruptBuffer(format!(
            "invalid soffset {} for table at offset {}",
            stored, table_offset
        )));
    }
    Ok(vtable as usize)
}

/// Reads a scalar from a plain byte slice.
pub fn read_scalar<T: Scalar>(buffer: &[u8], offset: usize) -> Result<T> {
    check_range(buffer.len(), offset, T::SIZE)?;
    Ok(T::from_le_slice(&buffer[offset..offset + T::SIZE]))
}

/// Writes a scalar into a plain byte slice.
pub fn write_scalar<T: Scalar>(buffer: &mut [u8], offset: usize, value: T) -> Result<()> {
    check_range(buffer.len(), offset, T::SIZE)?;
    value.write_le_slice(&mut buffer[offset..offset + T::SIZE]);
    Ok(())
}

/// Positional read access shared by every byte store the reader understands.
///
/// Implementors provide bounds-checked bulk copies; every primitive decode and
/// the table/vtable resolution rules are layered on top.
pub trait ByteSource {
    /// Total number of readable bytes.
    fn byte_len(&self) -> usize;

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    fn copy_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()>;

    /// Reads a little-endian scalar at `offset`.
    fn read<T: Scalar>(&self, offset: usize) -> Result<T> {
        let mut scratch = [0u8; 8];
        self.copy_bytes(offset, &mut scratch[..T::SIZE])?;
        Ok(T::from_le_slice(&scratch[..T::SIZE]))
    }

    /// Reads the uoffset stored at `offset` and returns the absolute target.
    fn read_uoffset(&self, offset: usize) -> Result<usize> {
        let stored = self.read::<u32>(offset)?;
        let target = resolve_uoffset(offset, stored)?;
        if target >= self.byte_len() {
            return Err(Error::CorruptBuffer(format!(
                "uoffset at {} points past the end of the buffer ({})",
                offset,
                self.byte_len()
            )));
        }
        Ok(target)
    }

    /// Returns the absolute offset of the vtable used by the table at `table_offset`.
    fn vtable_location(&self, table_offset: usize) -> Result<usize> {
        let stored = self.read::<i32>(table_offset)?;
        resolve_soffset(table_offset, stored)
    }

    /// Resolves the absolute location of field `index` of the table at `table_offset`.
    ///
    /// Returns 0 when the field is absent, either because the vtable is too short
    /// to contain the slot or because the slot holds 0.
    fn field_location(&self, table_offset: usize, index: usize) -> Result<usize> {
        let vtable = self.vtable_location(table_offset)?;
        let vtable_len = self.read::<u16>(vtable)? as usize;
        if vtable_len < VTABLE_HEADER_SIZE || vtable_len % SIZE_VOFFSET != 0 {
            return Err(Error::CorruptBuffer(format!(
                "invalid vtable length {} at offset {}",
                vtable_len, vtable
            )));
        }

        let slot_count = (vtable_len - VTABLE_HEADER_SIZE) / SIZE_VOFFSET;
        if index >= slot_count {
            return Ok(0);
        }

        let relative = self.read::<u16>(vtable + VTABLE_HEADER_SIZE + SIZE_VOFFSET * index)? as usize;
        if relative == 0 {
            return Ok(0);
        }
        Ok(table_offset + relative)
    }

    /// Reads the length prefix of the vector or string starting at `offset`.
    fn read_length(&self, offset: usize) -> Result<usize> {
        let len = self.read::<u32>(offset)? as usize;
        check_range(self.byte_len(), offset + SIZE_UOFFSET, len)
            .map_err(|_| Error::CorruptBuffer(format!("length {} at offset {} overruns the buffer", len, offset)))?;
        Ok(len)
    }

    /// Copies the length-prefixed UTF-8 string starting at `offset`.
    fn read_utf8(&self, offset: usize) -> Result<String> {
        let len = self.read_length(offset)?;
        let mut bytes = vec![0u8; len];
        self.copy_bytes(offset + SIZE_UOFFSET, &mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::CorruptBuffer(format!("invalid UTF-8 string at offset {}: {}", offset, e)))
    }
}

impl ByteSource for [u8] {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn copy_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_range(self.len(), offset, dst.len())?;
        dst.copy_from_slice(&self[offset..offset + dst.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip_little_endian() {
        let mut buf = [0u8; 8];
        write_scalar(&mut buf, 0, 0x0102_0304u32).unwrap();
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(read_scalar::<u32>(&buf, 0).unwrap(), 0x0102_0304);

        write_scalar(&mut buf, 0, 3.14f32).unwrap();
        assert_eq!(&buf[..4], &[0xc3, 0xf5, 0x48, 0x40]);

        write_scalar(&mut buf, 0, -1i64).unwrap();
        assert_eq!(buf, [0xff; 8]);
    }

    #[test]
    fn test_bool_is_single_byte() {
        let mut buf = [7u8; 2];
        write_scalar(&mut buf, 1, true).unwrap();
        assert_eq!(buf, [7, 1]);
        assert!(read_scalar::<bool>(&buf, 0).unwrap());
    }

    #[test]
    fn test_out_of_bounds_read() {
        let buf = [0u8; 3];
        assert!(matches!(read_scalar::<u32>(&buf, 0), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn test_alignment_padding() {
        assert_eq!(alignment_padding(0, 8), 0);
        assert_eq!(alignment_padding(5, 4), 3);
        assert_eq!(alignment_padding(6, 2), 0);
        assert_eq!(align_up(9, 8), 16);
    }

    #[test]
    fn test_uoffset_bounds() {
        assert_eq!(resolve_uoffset(8, 4).unwrap(), 12);
        assert!(resolve_uoffset(8, 3).is_err());
        assert!(resolve_uoffset(0, 0x8000_0000).is_err());
    }

    #[test]
    fn test_soffset_negative_points_forward() {
        // A vtable written after its table yields a negative soffset.
        assert_eq!(resolve_soffset(16, -8).unwrap(), 24);
        assert_eq!(resolve_soffset(16, 12).unwrap(), 4);
        assert!(resolve_soffset(4, 12).is_err());
    }

    #[test]
    fn test_field_location() {
        // [vtable @0: len=8, table_len=8, slot0=4, slot1=0][table @8: soffset=8, field0]
        let mut buf = vec![0u8; 16];
        write_scalar(&mut buf, 0, 8u16).unwrap();
        write_scalar(&mut buf, 2, 8u16).unwrap();
        write_scalar(&mut buf, 4, 4u16).unwrap();
        write_scalar(&mut buf, 6, 0u16).unwrap();
        write_scalar(&mut buf, 8, 8i32).unwrap();
        write_scalar(&mut buf, 12, 932i32).unwrap();

        let source: &[u8] = &buf;
        assert_eq!(source.field_location(8, 0).unwrap(), 12);
        assert_eq!(source.field_location(8, 1).unwrap(), 0);
        // Slots past the end of the vtable are absent, not errors.
        assert_eq!(source.field_location(8, 7).unwrap(), 0);
        assert_eq!(source.read::<i32>(12).unwrap(), 932);
    }
}
