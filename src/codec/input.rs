// Input buffer abstraction
//
// A closed set of byte stores the parser can read from. Writable stores are
// held as `Cell<u8>` slices so that several lazily-parsed views can share one
// buffer and still write mutations through to it.

use std::borrow::Cow;
use std::cell::Cell;

use bytemuck::Pod;
use bytes::Bytes;

use crate::codec::primitives::{check_range, ByteSource, Scalar, SIZE_UOFFSET};
use crate::internal::error::{Error, Result};

/// A source of bytes for one or more parse operations.
#[derive(Debug)]
pub enum InputBuffer<'a> {
    /// An owned array; the parser may write through to it.
    Array(Box<[Cell<u8>]>),
    /// A borrowed read-write slice.
    Slice(&'a [Cell<u8>]),
    /// A borrowed read-only slice.
    ReadOnly(&'a [u8]),
    /// A shared, reference-counted read-only buffer.
    Shared(Bytes),
    /// An `(offset, length)` window into another input buffer.
    SubRange {
        base: &'a InputBuffer<'a>,
        start: usize,
        len: usize,
    },
}

/// The storage a buffer ultimately reads from.
enum Backing<'b> {
    Writable(&'b [Cell<u8>]),
    ReadOnly(&'b [u8]),
}

impl InputBuffer<'static> {
    /// Takes ownership of `data` as a writable buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        InputBuffer::Array(data.into_iter().map(Cell::new).collect())
    }

    /// Wraps a shared `Bytes` handle as a read-only buffer.
    pub fn from_bytes(data: Bytes) -> Self {
        InputBuffer::Shared(data)
    }
}

impl<'a> InputBuffer<'a> {
    /// Borrows `data` mutably; write-through fields update it in place.
    pub fn from_mut_slice(data: &'a mut [u8]) -> Self {
        InputBuffer::Slice(Cell::from_mut(data).as_slice_of_cells())
    }

    /// Borrows `data` read-only.
    pub fn read_only(data: &'a [u8]) -> Self {
        InputBuffer::ReadOnly(data)
    }

    /// Returns a window of `len` bytes starting at `start`.
    pub fn sub_range<'b>(&'b self, start: usize, len: usize) -> Result<InputBuffer<'b>>
    where
        'a: 'b,
    {
        check_range(self.len(), start, len)?;
        Ok(InputBuffer::SubRange {
            base: self,
            start,
            len,
        })
    }

    fn backing(&self) -> Backing<'_> {
        match self {
            InputBuffer::Array(cells) => Backing::Writable(cells),
            InputBuffer::Slice(cells) => Backing::Writable(cells),
            InputBuffer::ReadOnly(bytes) => Backing::ReadOnly(bytes),
            InputBuffer::Shared(bytes) => Backing::ReadOnly(bytes.as_ref()),
            InputBuffer::SubRange { base, start, len } => match base.backing() {
                Backing::Writable(cells) => Backing::Writable(&cells[*start..*start + *len]),
                Backing::ReadOnly(bytes) => Backing::ReadOnly(&bytes[*start..*start + *len]),
            },
        }
    }

    /// Number of bytes in the buffer.
    pub fn len(&self) -> usize {
        match self {
            InputBuffer::Array(cells) => cells.len(),
            InputBuffer::Slice(cells) => cells.len(),
            InputBuffer::ReadOnly(bytes) => bytes.len(),
            InputBuffer::Shared(bytes) => bytes.len(),
            InputBuffer::SubRange { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer rejects writes and mutable views.
    pub fn is_read_only(&self) -> bool {
        matches!(self.backing(), Backing::ReadOnly(_))
    }

    /// Whether the address of the bytes is guaranteed stable while borrowed.
    ///
    /// Owned arrays may be moved or dropped with the buffer itself, so only
    /// borrowed memory counts as pinned.
    pub fn is_pinned(&self) -> bool {
        match self {
            InputBuffer::Array(_) => false,
            InputBuffer::Slice(_) | InputBuffer::ReadOnly(_) | InputBuffer::Shared(_) => true,
            InputBuffer::SubRange { base, .. } => base.is_pinned(),
        }
    }

    /// Reads `len` bytes at `offset`, borrowing when the buffer is read-only.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Cow<'_, [u8]>> {
        check_range(self.len(), offset, len)?;
        match self.backing() {
            Backing::ReadOnly(bytes) => Ok(Cow::Borrowed(&bytes[offset..offset + len])),
            Backing::Writable(cells) => Ok(Cow::Owned(
                cells[offset..offset + len].iter().map(Cell::get).collect(),
            )),
        }
    }

    /// Reads the length-prefixed UTF-8 string starting at `offset`.
    ///
    /// The trailing NUL written for C interop is not part of the string.
    pub fn read_string(&self, offset: usize) -> Result<Cow<'_, str>> {
        let len = self.read_length(offset)?;
        match self.read_bytes(offset + SIZE_UOFFSET, len)? {
            Cow::Borrowed(bytes) => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| Error::CorruptBuffer(format!("invalid UTF-8 string at offset {}: {}", offset, e))),
            Cow::Owned(bytes) => String::from_utf8(bytes)
                .map(Cow::Owned)
                .map_err(|e| Error::CorruptBuffer(format!("invalid UTF-8 string at offset {}: {}", offset, e))),
        }
    }

    /// Writes raw bytes at `offset`.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        check_range(self.len(), offset, src.len())?;
        match self.backing() {
            Backing::Writable(cells) => {
                for (cell, byte) in cells[offset..offset + src.len()].iter().zip(src) {
                    cell.set(*byte);
                }
                Ok(())
            }
            Backing::ReadOnly(_) => Err(Error::InvalidOperation(
                "cannot write to a read-only input buffer".to_string(),
            )),
        }
    }

    /// Writes a little-endian scalar at `offset`.
    pub fn write_scalar<T: Scalar>(&self, offset: usize, value: T) -> Result<()> {
        let mut scratch = [0u8; 8];
        value.write_le_slice(&mut scratch[..T::SIZE]);
        self.write_bytes(offset, &scratch[..T::SIZE])
    }

    /// Returns a mutable view over `len` bytes at `offset`.
    pub fn mutable_bytes(&self, offset: usize, len: usize) -> Result<&[Cell<u8>]> {
        check_range(self.len(), offset, len)?;
        match self.backing() {
            Backing::Writable(cells) => Ok(&cells[offset..offset + len]),
            Backing::ReadOnly(_) => Err(Error::InvalidOperation(
                "cannot obtain a mutable view of a read-only input buffer".to_string(),
            )),
        }
    }

    /// Copies a plain-old-data struct out of the buffer.
    pub fn read_pod<T: Pod>(&self, offset: usize) -> Result<T> {
        let bytes = self.read_bytes(offset, std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Borrows a plain-old-data struct directly from the buffer memory.
    ///
    /// Only pinned read-only buffers can hand out references, and the location
    /// must satisfy the alignment of `T`. Callers fall back to [`read_pod`]
    /// otherwise.
    ///
    /// [`read_pod`]: InputBuffer::read_pod
    pub fn borrow_pod<T: Pod>(&self, offset: usize) -> Result<&T> {
        let size = std::mem::size_of::<T>();
        check_range(self.len(), offset, size)?;
        if !self.is_pinned() {
            return Err(Error::InvalidOperation(
                "zero-copy struct access requires a pinned buffer".to_string(),
            ));
        }
        match self.backing() {
            Backing::ReadOnly(bytes) => bytemuck::try_from_bytes(&bytes[offset..offset + size])
                .map_err(|e| Error::InvalidOperation(format!("cannot borrow struct at offset {}: {}", offset, e))),
            Backing::Writable(_) => Err(Error::InvalidOperation(
                "zero-copy struct access requires read-only memory".to_string(),
            )),
        }
    }

    /// Copies the whole buffer out.
    pub fn to_vec(&self) -> Vec<u8> {
        match self.backing() {
            Backing::ReadOnly(bytes) => bytes.to_vec(),
            Backing::Writable(cells) => cells.iter().map(Cell::get).collect(),
        }
    }
}

impl ByteSource for InputBuffer<'_> {
    fn byte_len(&self) -> usize {
        self.len()
    }

    fn copy_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_range(self.len(), offset, dst.len())?;
        match self.backing() {
            Backing::ReadOnly(bytes) => dst.copy_from_slice(&bytes[offset..offset + dst.len()]),
            Backing::Writable(cells) => {
                for (byte, cell) in dst.iter_mut().zip(&cells[offset..]) {
                    *byte = cell.get();
                }
            }
        }
        Ok(())
    }
}
