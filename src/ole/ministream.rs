//! The mini stream.
//!
//! Streams below the cutoff are stored in 64-byte mini sectors. The mini sectors are
//! packed, in MiniFAT order, into one ordinary FAT chain owned by the root entry: the
//! root's start sector and size describe that chain.

use log::debug;

use super::consts::*;
use super::directory::DirEntry;
use super::error::Result;
use super::fat::{AllocationTable, BlockSource};
use super::sector::SectorStore;

/// Number of `block_size` blocks needed for `size` bytes.
#[inline]
pub fn blocks_for(size: u64, block_size: usize) -> usize {
    size.div_ceil(block_size as u64) as usize
}

/// Grows the mini stream one mini sector at a time on behalf of the MiniFAT.
pub struct MiniStreamSource<'a> {
    pub store: &'a mut SectorStore,
    pub fat: &'a mut AllocationTable,
    pub root: &'a mut DirEntry,
}

impl BlockSource for MiniStreamSource<'_> {
    fn block_count(&self) -> u32 {
        (self.root.size / MINI_SECTOR_SIZE as u64) as u32
    }

    fn grow(&mut self) -> Result<u32> {
        let index = self.block_count();
        let new_size = (index as u64 + 1) * MINI_SECTOR_SIZE as u64;
        let sector_size = self.store.sector_size();
        let needed = blocks_for(new_size, sector_size);
        let current = blocks_for(self.root.size, sector_size);

        if needed != current {
            let start = if current == 0 {
                ENDOFCHAIN
            } else {
                self.root.start_sector
            };
            self.root.start_sector = self.fat.resize_chain(start, needed, &mut *self.store)?;
        }
        self.root.size = new_size;
        Ok(index)
    }
}

/// Release mini sectors past the last one in use and shrink the mini stream to match.
///
/// When no mini sector is in use the mini stream is freed entirely.
pub fn trim_ministream(
    store: &mut SectorStore,
    fat: &mut AllocationTable,
    minifat: &mut AllocationTable,
    root: &mut DirEntry,
) -> Result<()> {
    let blocks = (root.size / MINI_SECTOR_SIZE as u64) as usize;
    let used = minifat.entries()[..blocks.min(minifat.len())]
        .iter()
        .rposition(|&e| e != FREESECT)
        .map_or(0, |i| i + 1);
    if used == blocks {
        return Ok(());
    }

    let sector_size = store.sector_size();
    let start = if root.size == 0 {
        ENDOFCHAIN
    } else {
        root.start_sector
    };
    let new_size = (used * MINI_SECTOR_SIZE) as u64;
    root.start_sector = fat.resize_chain(start, blocks_for(new_size, sector_size), store)?;
    root.size = new_size;
    minifat.truncate(used);
    debug!(
        "Trimmed mini stream from {} to {} mini sectors",
        blocks, used
    );
    Ok(())
}
