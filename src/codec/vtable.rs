// Vtable deduplication cache
//
// Maps a cheap digest of finished vtable bytes to the offsets where vtables with
// that digest were written. Hits are always confirmed by comparing the full byte
// span in the output buffer.

use std::collections::HashMap;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Digest of a vtable byte span (FNV-1a over every byte).
pub fn vtable_digest(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ *byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Content-addressed index of the vtables finished during one write pass.
#[derive(Debug, Default)]
pub struct VTableCache {
    buckets: HashMap<u64, Vec<usize>>,
    count: usize,
}

impl VTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the offset of a vtable in `buffer` identical to `candidate`.
    ///
    /// Most recently inserted vtables are checked first.
    pub fn find(&self, buffer: &[u8], candidate: &[u8]) -> Option<usize> {
        let bucket = self.buckets.get(&vtable_digest(candidate))?;
        bucket.iter().rev().copied().find(|&offset| {
            buffer
                .get(offset..offset + candidate.len())
                .map_or(false, |existing| existing == candidate)
        })
    }

    /// Records that the vtable `bytes` now lives at `offset`.
    pub fn insert(&mut self, bytes: &[u8], offset: usize) {
        self.buckets.entry(vtable_digest(bytes)).or_default().push(offset);
        self.count += 1;
    }

    /// Number of distinct vtables recorded.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.count = 0;
    }
}
