//! Mapping from slices to the object-store blocks that hold them.

use slicefs_meta::Slice;
use slicefs_object::{block_key, block_name};

/// One data block of a slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub chunkid: u64,
    pub indx: u32,
    pub size: u32,
}

impl Block {
    /// Name as it appears as the last key component, e.g. `12_0_4096`.
    pub fn name(&self) -> String {
        block_name(self.chunkid, self.indx, self.size)
    }

    /// Key relative to the chunks prefix.
    pub fn key(&self) -> String {
        block_key(self.chunkid, self.indx, self.size)
    }
}

/// Blocks a slice of `size` bytes is split into. Every block is `block_size`
/// long except the last, which holds the remainder.
pub fn slice_blocks(slice: &Slice, block_size: u32) -> Vec<Block> {
    if slice.size == 0 || block_size == 0 {
        return Vec::new();
    }
    let last = (slice.size - 1) / block_size;
    (0..=last)
        .map(|indx| Block {
            chunkid: slice.chunkid,
            indx,
            size: if indx == last {
                slice.size - indx * block_size
            } else {
                block_size
            },
        })
        .collect()
}
