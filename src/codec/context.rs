// Serialization context
//
// Bookkeeping for one write pass over a pre-sized destination buffer. Space is
// handed out front to back from a high-water mark, so every uoffset written by
// the writer points forward to an object allocated after the referencing slot.

use tracing::trace;

use crate::codec::primitives::{
    align_up, write_scalar, MAX_BUFFER_OFFSET, SIZE_UOFFSET, SIZE_VOFFSET,
};
use crate::codec::shared_strings::{PendingString, SharedStringCache};
use crate::codec::vtable::VTableCache;
use crate::internal::error::{Error, Result};

/// Counters collected during one write pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub vtables_written: usize,
    pub vtables_reused: usize,
    pub shared_strings_written: usize,
}

/// Mutable allocator state for a single write.
#[derive(Debug)]
pub struct SerializationContext {
    offset: usize,
    capacity: usize,
    vtables: VTableCache,
    shared_strings: Option<SharedStringCache>,
    stats: WriteStats,
}

impl Default for SerializationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializationContext {
    pub fn new() -> Self {
        Self {
            offset: 0,
            capacity: 0,
            vtables: VTableCache::new(),
            shared_strings: None,
            stats: WriteStats::default(),
        }
    }

    /// Clears all state so the context can serve another write of up to `capacity` bytes.
    pub fn reset(&mut self, capacity: usize) {
        self.offset = 0;
        self.capacity = capacity;
        self.vtables.clear();
        if let Some(cache) = self.shared_strings.as_mut() {
            cache.drain();
        }
        self.stats = WriteStats::default();
    }

    /// Enables shared string deduplication with a cache of `capacity` entries.
    pub fn enable_shared_strings(&mut self, capacity: usize) {
        match self.shared_strings.as_mut() {
            Some(cache) if cache.capacity() == capacity.max(1) => {}
            Some(cache) => cache.reset(capacity),
            None => self.shared_strings = Some(SharedStringCache::new(capacity)),
        }
    }

    pub fn disable_shared_strings(&mut self) {
        self.shared_strings = None;
    }

    /// Bytes allocated so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Reserves `[start, start + size)`, zero-filling everything from the
    /// current high-water mark including padding.
    fn reserve(&mut self, buffer: &mut [u8], start: usize, size: usize) -> Result<()> {
        let end = start
            .checked_add(size)
            .filter(|end| *end <= MAX_BUFFER_OFFSET)
            .ok_or_else(|| {
                Error::BufferTooLarge(format!(
                    "allocation of {} bytes at offset {} exceeds the 32-bit offset range",
                    size, start
                ))
            })?;
        let available = self.capacity.min(buffer.len());
        if end > available {
            return Err(Error::BufferTooSmall {
                needed: end,
                available,
            });
        }
        buffer[self.offset..end].fill(0);
        self.offset = end;
        Ok(())
    }

    /// Reserves `size` bytes aligned to `alignment` and returns their offset.
    pub fn allocate_space(&mut self, buffer: &mut [u8], size: usize, alignment: usize) -> Result<usize> {
        let start = align_up(self.offset, alignment.max(1));
        self.reserve(buffer, start, size)?;
        Ok(start)
    }

    /// Reserves a length-prefixed vector and writes its element count.
    ///
    /// The prefix sits immediately before the first element, which is aligned to
    /// `max(4, element_alignment)`. Returns the offset of the first element.
    pub fn allocate_vector(
        &mut self,
        buffer: &mut [u8],
        element_alignment: usize,
        count: usize,
        element_size: usize,
    ) -> Result<usize> {
        self.allocate_prefixed(buffer, element_alignment, count, count.saturating_mul(element_size))
    }

    fn allocate_prefixed(
        &mut self,
        buffer: &mut [u8],
        element_alignment: usize,
        count: usize,
        body_size: usize,
    ) -> Result<usize> {
        let alignment = element_alignment.max(SIZE_UOFFSET);
        let count = u32::try_from(count)
            .map_err(|_| Error::BufferTooLarge(format!("vector of {} elements", count)))?;
        let first = align_up(self.offset + SIZE_UOFFSET, alignment);
        let prefix = first - SIZE_UOFFSET;
        self.reserve(buffer, prefix, SIZE_UOFFSET + body_size)?;
        write_scalar(buffer, prefix, count)?;
        Ok(first)
    }

    /// Writes a string (length prefix, UTF-8 bytes, NUL) and returns the
    /// offset of its length prefix.
    pub fn allocate_string(&mut self, buffer: &mut [u8], value: &str) -> Result<usize> {
        let bytes = value.as_bytes();
        // One extra reserved byte stays zero as the C string terminator.
        let first = self.allocate_prefixed(buffer, 1, bytes.len(), bytes.len() + 1)?;
        buffer[first..first + bytes.len()].copy_from_slice(bytes);
        Ok(first - SIZE_UOFFSET)
    }

    /// Commits a finished vtable, or returns the offset of an identical one.
    pub fn finish_vtable(&mut self, buffer: &mut [u8], candidate: &[u8]) -> Result<usize> {
        if let Some(existing) = self.vtables.find(buffer, candidate) {
            trace!(offset = existing, len = candidate.len(), "reusing vtable");
            self.stats.vtables_reused += 1;
            return Ok(existing);
        }
        let offset = self.allocate_space(buffer, candidate.len(), SIZE_VOFFSET)?;
        buffer[offset..offset + candidate.len()].copy_from_slice(candidate);
        self.vtables.insert(candidate, offset);
        self.stats.vtables_written += 1;
        Ok(offset)
    }

    /// Writes at `slot` the uoffset that points to `target`.
    pub fn patch_uoffset(&self, buffer: &mut [u8], slot: usize, target: usize) -> Result<()> {
        let relative = target
            .checked_sub(slot)
            .filter(|relative| *relative >= SIZE_UOFFSET && *relative <= MAX_BUFFER_OFFSET)
            .ok_or_else(|| {
                Error::BufferTooLarge(format!(
                    "cannot encode uoffset from {} to {}",
                    slot, target
                ))
            })?;
        write_scalar(buffer, slot, relative as u32)
    }

    /// Writes `value` for the uoffset `slot`, sharing it with other slots when
    /// shared strings are enabled.
    pub fn write_shared_string(&mut self, buffer: &mut [u8], slot: usize, value: &str) -> Result<()> {
        let evicted = match self.shared_strings.as_mut() {
            Some(cache) => cache.defer(slot, value),
            None => {
                let target = self.allocate_string(buffer, value)?;
                return self.patch_uoffset(buffer, slot, target);
            }
        };
        if let Some(pending) = evicted {
            self.flush_pending(buffer, pending)?;
        }
        Ok(())
    }

    /// Writes every deferred shared string and patches its slots.
    pub fn flush_shared_strings(&mut self, buffer: &mut [u8]) -> Result<()> {
        let pending = match self.shared_strings.as_mut() {
            Some(cache) => cache.drain(),
            None => return Ok(()),
        };
        for entry in pending {
            self.flush_pending(buffer, entry)?;
        }
        Ok(())
    }

    fn flush_pending(&mut self, buffer: &mut [u8], pending: PendingString) -> Result<()> {
        let target = self.allocate_string(buffer, &pending.value)?;
        for slot in pending.slots {
            self.patch_uoffset(buffer, slot, target)?;
        }
        self.stats.shared_strings_written += 1;
        Ok(())
    }
}
