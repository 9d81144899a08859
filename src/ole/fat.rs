//! Allocation tables (FAT and MiniFAT).
//!
//! Each table maps a block index to the index of the next block of the same chain, or
//! to one of the sentinels:
//! - End of chain is marked with ENDOFCHAIN (0xFFFFFFFE)
//! - Free blocks are marked with FREESECT (0xFFFFFFFF)
//! - FAT sectors are marked with FATSECT (0xFFFFFFFD)
//! - DIFAT sectors are marked with DIFSECT (0xFFFFFFFC)
//!
//! The table is kept in memory exactly as it is stored on disk: a flat array of `u32`.
//! Allocation prefers the lowest free block and only grows the backing store (see
//! [`BlockSource`]) when no free block remains.

use std::fmt;

use fixedbitset::FixedBitSet;
use log::trace;

use super::consts::*;
use super::error::{CfbError, Result};
use super::sector::SectorStore;
use crate::common::binary::read_u32_table;

/// Which table a chain lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Fat,
    MiniFat,
    Difat,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Fat => write!(f, "FAT"),
            TableKind::MiniFat => write!(f, "MiniFAT"),
            TableKind::Difat => write!(f, "DIFAT"),
        }
    }
}

/// Backing storage whose blocks an allocation table hands out.
///
/// The sector store backs the FAT; the mini stream backs the MiniFAT.
pub trait BlockSource {
    /// Number of blocks that currently exist.
    fn block_count(&self) -> u32;

    /// Add one zeroed block and return its index.
    fn grow(&mut self) -> Result<u32>;
}

impl BlockSource for SectorStore {
    #[inline]
    fn block_count(&self) -> u32 {
        self.sector_count()
    }

    #[inline]
    fn grow(&mut self) -> Result<u32> {
        self.append_zeroed()
    }
}

/// A FAT or MiniFAT.
#[derive(Debug, Clone)]
pub struct AllocationTable {
    kind: TableKind,
    entries: Vec<u32>,
    /// No free entry exists below this index.
    free_hint: usize,
}

impl AllocationTable {
    /// Create an empty table.
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
            free_hint: 0,
        }
    }

    /// Decode a table from the concatenated payload of its sectors.
    pub fn from_bytes(kind: TableKind, bytes: &[u8]) -> Self {
        Self::from_entries(kind, read_u32_table(bytes))
    }

    /// Wrap raw entries.
    pub fn from_entries(kind: TableKind, entries: Vec<u32>) -> Self {
        Self {
            kind,
            entries,
            free_hint: 0,
        }
    }

    /// Table kind.
    #[inline]
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entries.
    #[inline]
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Entry for `index`, `FREESECT` past the end.
    #[inline]
    pub fn next(&self, index: u32) -> u32 {
        self.entries.get(index as usize).copied().unwrap_or(FREESECT)
    }

    /// Overwrite one entry, extending the table with free entries as needed.
    pub fn set(&mut self, index: u32, value: u32) {
        let idx = index as usize;
        if idx >= self.entries.len() {
            self.entries.resize(idx + 1, FREESECT);
        }
        self.entries[idx] = value;
        if value == FREESECT && idx < self.free_hint {
            self.free_hint = idx;
        }
    }

    /// Drop entries from `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
        self.free_hint = self.free_hint.min(len);
    }

    fn corrupt(&self, sector: u32, reason: impl Into<String>) -> CfbError {
        CfbError::CorruptChain {
            table: self.kind,
            sector,
            reason: reason.into(),
        }
    }

    /// Follow a chain from `start` until ENDOFCHAIN.
    ///
    /// `ENDOFCHAIN` as a start yields an empty chain. A repeated index, an index past the
    /// end of the table, or a free/special marker inside the chain is a `CorruptChain`.
    pub fn chain_of(&self, start: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN {
            return Ok(chain);
        }

        let mut visited = FixedBitSet::with_capacity(self.entries.len());
        let mut current = start;
        loop {
            if current as usize >= self.entries.len() {
                return Err(self.corrupt(current, "index past the end of the table"));
            }
            if visited.put(current as usize) {
                return Err(self.corrupt(current, "cycle detected"));
            }
            chain.push(current);

            match self.entries[current as usize] {
                ENDOFCHAIN => break,
                FREESECT => return Err(self.corrupt(current, "chain runs into a free block")),
                next if next > MAXREGSECT => {
                    return Err(self.corrupt(
                        current,
                        format!("chain runs into special marker 0x{:08X}", next),
                    ));
                },
                next => current = next,
            }
        }
        Ok(chain)
    }

    /// Follow a chain and require exactly `expected` blocks.
    pub fn chain_of_len(&self, start: u32, expected: usize) -> Result<Vec<u32>> {
        let chain = self.chain_of(start)?;
        if chain.len() != expected {
            return Err(self.corrupt(
                start,
                format!("chain has {} blocks, expected {}", chain.len(), expected),
            ));
        }
        Ok(chain)
    }

    fn find_free(&mut self, limit: u32) -> Option<u32> {
        let end = (limit as usize).min(self.entries.len());
        let found = (self.free_hint..end).find(|&i| self.entries[i] == FREESECT);
        self.free_hint = found.unwrap_or(end);
        found.map(|i| i as u32)
    }

    /// Claim `count` blocks, lowest free ones first, growing `src` for the rest.
    ///
    /// Claimed blocks are provisionally marked ENDOFCHAIN. If growing fails every block
    /// claimed so far is returned to FREESECT before the error is reported.
    fn claim_blocks(&mut self, count: usize, src: &mut dyn BlockSource) -> Result<Vec<u32>> {
        let mut claimed = Vec::with_capacity(count);
        while claimed.len() < count {
            let index = match self.find_free(src.block_count()) {
                Some(index) => index,
                None => match src.grow() {
                    Ok(index) => index,
                    Err(err) => {
                        for &index in &claimed {
                            self.set(index, FREESECT);
                        }
                        return Err(err);
                    },
                },
            };
            self.set(index, ENDOFCHAIN);
            claimed.push(index);
        }
        Ok(claimed)
    }

    fn link(&mut self, blocks: &[u32]) {
        for pair in blocks.windows(2) {
            self.set(pair[0], pair[1]);
        }
        if let Some(&last) = blocks.last() {
            self.set(last, ENDOFCHAIN);
        }
    }

    /// Allocate a linked chain of `count` blocks and return its first index.
    ///
    /// Zero blocks yields `ENDOFCHAIN`.
    pub fn allocate_chain(&mut self, count: usize, src: &mut dyn BlockSource) -> Result<u32> {
        if count == 0 {
            return Ok(ENDOFCHAIN);
        }
        let blocks = self.claim_blocks(count, src)?;
        self.link(&blocks);
        trace!(
            "{}: allocated {} blocks starting at {}",
            self.kind, count, blocks[0]
        );
        Ok(blocks[0])
    }

    /// Mark every block of a chain free. Block payloads are left untouched.
    pub fn free_chain(&mut self, start: u32) -> Result<()> {
        let chain = self.chain_of(start)?;
        for &index in &chain {
            self.set(index, FREESECT);
        }
        trace!("{}: freed {} blocks from {}", self.kind, chain.len(), start);
        Ok(())
    }

    /// Grow or shrink a chain to `new_count` blocks and return its (possibly new) start.
    ///
    /// Shrinking to zero frees everything and returns `ENDOFCHAIN`.
    pub fn resize_chain(
        &mut self,
        start: u32,
        new_count: usize,
        src: &mut dyn BlockSource,
    ) -> Result<u32> {
        let chain = self.chain_of(start)?;
        let old_count = chain.len();

        if new_count == old_count {
            return Ok(start);
        }

        if new_count < old_count {
            for &index in &chain[new_count..] {
                self.set(index, FREESECT);
            }
            if new_count == 0 {
                return Ok(ENDOFCHAIN);
            }
            self.set(chain[new_count - 1], ENDOFCHAIN);
            return Ok(start);
        }

        let extra = self.claim_blocks(new_count - old_count, src)?;
        self.link(&extra);
        match chain.last() {
            Some(&last) => {
                self.set(last, extra[0]);
                Ok(start)
            },
            None => Ok(extra[0]),
        }
    }

    /// Claim a single block and mark it with `marker` (`FATSECT` or `DIFSECT`).
    pub fn claim_special(&mut self, marker: u32, src: &mut dyn BlockSource) -> Result<u32> {
        let blocks = self.claim_blocks(1, src)?;
        self.set(blocks[0], marker);
        Ok(blocks[0])
    }

    /// Indices of all entries equal to `marker`, ascending.
    pub fn positions_of(&self, marker: u32) -> Vec<u32> {
        self.entries
            .iter()
            .enumerate()
            .filter(|&(_, &value)| value == marker)
            .map(|(index, _)| index as u32)
            .collect()
    }

    /// Number of free entries below `limit`.
    pub fn free_count(&self, limit: u32) -> usize {
        self.entries
            .iter()
            .take(limit as usize)
            .filter(|&&value| value == FREESECT)
            .count()
    }

    /// Encode into `sectors` sectors of `sector_size` bytes, padding with FREESECT.
    pub fn to_bytes(&self, sector_size: usize, sectors: usize) -> Vec<u8> {
        let mut out = vec![0xFFu8; sector_size * sectors];
        for (slot, value) in out.chunks_exact_mut(4).zip(self.entries.iter()) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Check that every entry is either a sentinel or points inside the table.
    pub fn validate(&self) -> Result<()> {
        let len = self.entries.len() as u32;
        for (index, &next) in self.entries.iter().enumerate() {
            let valid = matches!(next, FREESECT | ENDOFCHAIN | FATSECT | DIFSECT) || next < len;
            if !valid {
                return Err(self.corrupt(
                    index as u32,
                    format!("invalid next pointer 0x{:08X}", next),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Block source that counts blocks and can refuse to grow.
    struct CountingSource {
        blocks: u32,
        limit: u32,
    }

    impl BlockSource for CountingSource {
        fn block_count(&self) -> u32 {
            self.blocks
        }

        fn grow(&mut self) -> Result<u32> {
            if self.blocks >= self.limit {
                return Err(CfbError::StorageFull { limit: self.limit });
            }
            self.blocks += 1;
            Ok(self.blocks - 1)
        }
    }

    fn source(limit: u32) -> CountingSource {
        CountingSource { blocks: 0, limit }
    }

    #[test]
    fn test_allocate_chain() {
        let mut fat = AllocationTable::new(TableKind::Fat);
        let mut src = source(100);

        let start = fat.allocate_chain(2, &mut src).unwrap();
        assert_eq!(start, 0);
        assert_eq!(src.blocks, 2);
        assert_eq!(fat.next(0), 1);
        assert_eq!(fat.next(1), ENDOFCHAIN);
        assert_eq!(fat.chain_of(start).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_empty_chain() {
        let mut fat = AllocationTable::new(TableKind::Fat);
        let mut src = source(100);
        assert_eq!(fat.allocate_chain(0, &mut src).unwrap(), ENDOFCHAIN);
        assert_eq!(src.blocks, 0);
        assert!(fat.chain_of(ENDOFCHAIN).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_detection() {
        // 1 -> 2 -> 3 -> 1
        let fat = AllocationTable::from_entries(
            TableKind::Fat,
            vec![ENDOFCHAIN, 2, 3, 1, FREESECT],
        );
        let err = fat.chain_of(1).unwrap_err();
        assert!(matches!(
            err,
            CfbError::CorruptChain {
                table: TableKind::Fat,
                sector: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_range_and_markers() {
        let fat = AllocationTable::from_entries(TableKind::Fat, vec![7, FREESECT, FATSECT]);
        assert!(matches!(
            fat.chain_of(0),
            Err(CfbError::CorruptChain { sector: 7, .. })
        ));
        assert!(fat.chain_of(1).is_err());
        assert!(fat.chain_of(2).is_err());
        assert!(fat.chain_of(FREESECT).is_err());
    }

    #[test]
    fn test_chain_of_len() {
        let fat = AllocationTable::from_entries(TableKind::MiniFat, vec![1, ENDOFCHAIN]);
        assert!(fat.chain_of_len(0, 2).is_ok());
        assert!(matches!(
            fat.chain_of_len(0, 3),
            Err(CfbError::CorruptChain {
                table: TableKind::MiniFat,
                ..
            })
        ));
    }

    #[test]
    fn test_free_space_reuse() {
        let mut fat = AllocationTable::new(TableKind::Fat);
        let mut src = source(100);

        let a = fat.allocate_chain(3, &mut src).unwrap();
        let b = fat.allocate_chain(2, &mut src).unwrap();
        let freed = fat.chain_of(a).unwrap();
        fat.free_chain(a).unwrap();

        let c = fat.allocate_chain(3, &mut src).unwrap();
        assert_eq!(fat.chain_of(c).unwrap(), freed);
        assert_eq!(src.blocks, 5);
        assert_eq!(fat.chain_of(b).unwrap(), vec![3, 4]);
    }

    #[test]
    fn test_allocation_rolls_back_on_failure() {
        let mut fat = AllocationTable::new(TableKind::Fat);
        let mut src = source(4);

        let a = fat.allocate_chain(2, &mut src).unwrap();
        fat.allocate_chain(1, &mut src).unwrap();
        fat.free_chain(a).unwrap();
        let before = fat.entries().to_vec();

        // 2 free + 1 growable block, 4 requested
        let err = fat.allocate_chain(4, &mut src).unwrap_err();
        assert!(matches!(err, CfbError::StorageFull { limit: 4 }));
        assert_eq!(&fat.entries()[..before.len()], &before[..]);
        assert!(fat.entries()[before.len()..].iter().all(|&e| e == FREESECT));

        // the rolled back blocks are immediately reusable
        let again = fat.allocate_chain(3, &mut src).unwrap();
        assert_eq!(fat.chain_of(again).unwrap(), vec![0, 1, 3]);
    }

    #[test]
    fn test_resize_chain() {
        let mut fat = AllocationTable::new(TableKind::Fat);
        let mut src = source(100);

        let start = fat.allocate_chain(2, &mut src).unwrap();
        let other = fat.allocate_chain(1, &mut src).unwrap();

        let start = fat.resize_chain(start, 4, &mut src).unwrap();
        assert_eq!(fat.chain_of(start).unwrap(), vec![0, 1, 3, 4]);

        let start = fat.resize_chain(start, 1, &mut src).unwrap();
        assert_eq!(fat.chain_of(start).unwrap(), vec![0]);
        assert_eq!(fat.next(1), FREESECT);
        assert_eq!(fat.next(4), FREESECT);

        assert_eq!(fat.resize_chain(start, 0, &mut src).unwrap(), ENDOFCHAIN);
        assert_eq!(fat.next(0), FREESECT);

        let fresh = fat.resize_chain(ENDOFCHAIN, 2, &mut src).unwrap();
        assert_eq!(fat.chain_of(fresh).unwrap(), vec![0, 1]);
        assert_eq!(fat.chain_of(other).unwrap(), vec![2]);
    }

    #[test]
    fn test_special_sectors_excluded() {
        let mut fat = AllocationTable::new(TableKind::Fat);
        let mut src = source(100);

        let fat_sector = fat.claim_special(FATSECT, &mut src).unwrap();
        assert_eq!(fat.next(fat_sector), FATSECT);
        let start = fat.allocate_chain(2, &mut src).unwrap();
        assert!(!fat.chain_of(start).unwrap().contains(&fat_sector));
        assert_eq!(fat.positions_of(FATSECT), vec![fat_sector]);
    }

    #[test]
    fn test_free_entries_beyond_source_not_used() {
        // table covers more entries than the store has sectors
        let mut fat = AllocationTable::from_entries(TableKind::Fat, vec![FREESECT; 128]);
        let mut src = source(100);
        src.blocks = 0;
        let start = fat.allocate_chain(1, &mut src).unwrap();
        assert_eq!(start, 0);
        assert_eq!(src.blocks, 1);
    }

    #[test]
    fn test_to_bytes_padding() {
        let fat = AllocationTable::from_entries(TableKind::Fat, vec![FATSECT, ENDOFCHAIN]);
        let bytes = fat.to_bytes(512, 1);
        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[0..4], &FATSECT.to_le_bytes());
        assert_eq!(&bytes[4..8], &ENDOFCHAIN.to_le_bytes());
        assert!(bytes[8..].iter().all(|&b| b == 0xFF));

        let back = AllocationTable::from_bytes(TableKind::Fat, &bytes);
        assert_eq!(back.len(), 128);
        assert_eq!(back.next(1), ENDOFCHAIN);
    }

    #[test]
    fn test_validate() {
        let good = AllocationTable::from_entries(TableKind::Fat, vec![1, ENDOFCHAIN, FATSECT]);
        assert!(good.validate().is_ok());
        let bad = AllocationTable::from_entries(TableKind::Fat, vec![9, ENDOFCHAIN]);
        assert!(bad.validate().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_chains_stay_disjoint(ops in prop::collection::vec((0usize..6, any::<bool>()), 1..40)) {
            let mut fat = AllocationTable::new(TableKind::Fat);
            let mut src = source(10_000);
            let mut live: Vec<(u32, usize)> = Vec::new();

            for (count, free_one) in ops {
                if free_one && !live.is_empty() {
                    let (start, _) = live.remove(0);
                    fat.free_chain(start).unwrap();
                } else {
                    let start = fat.allocate_chain(count, &mut src).unwrap();
                    if count > 0 {
                        live.push((start, count));
                    }
                }
            }

            let mut seen = FixedBitSet::with_capacity(src.blocks as usize);
            for &(start, count) in &live {
                let chain = fat.chain_of_len(start, count).unwrap();
                for index in chain {
                    prop_assert!(!seen.put(index as usize));
                }
            }
            let used: usize = live.iter().map(|&(_, c)| c).sum();
            prop_assert_eq!(used + fat.free_count(src.blocks), src.blocks as usize);
        }
    }
}
