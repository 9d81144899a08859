//! Stream I/O.
//!
//! A stream's bytes are addressed through its chain: FAT sectors when the stream is at
//! least [`MINI_STREAM_CUTOFF`] bytes long, mini sectors inside the mini stream
//! otherwise. Resizing a stream across the cutoff migrates its bytes between the two
//! tables. The destination chain is always allocated and filled before the source
//! chain is released, so a failed migration leaves the stream as it was.

use log::debug;

use super::consts::*;
use super::directory::EntryId;
use super::error::{CfbError, Result};
use super::fat::AllocationTable;
use super::file::CompoundFile;
use super::ministream::{MiniStreamSource, blocks_for};
use super::sector::SectorStore;

/// Where a stream's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// Zero-length stream, no chain
    Empty,
    /// Mini sectors tracked by the MiniFAT
    Mini,
    /// Regular sectors tracked by the FAT
    Big,
}

impl StorageMode {
    /// The mode a stream of `size` bytes must use.
    pub fn for_size(size: u64) -> Self {
        if size == 0 {
            StorageMode::Empty
        } else if size < MINI_STREAM_CUTOFF as u64 {
            StorageMode::Mini
        } else {
            StorageMode::Big
        }
    }
}

/// A resolved stream chain.
#[derive(Debug, Clone)]
pub(crate) enum Placement {
    Empty,
    Big {
        chain: Vec<u32>,
    },
    Mini {
        chain: Vec<u32>,
        /// FAT chain of the mini stream itself
        container: Vec<u32>,
    },
}

impl Placement {
    /// Sector and in-sector offset of block `block`, plus the block size.
    fn locate(&self, block: usize, sector_size: usize) -> Option<(u32, usize, usize)> {
        match self {
            Placement::Empty => None,
            Placement::Big { chain } => chain.get(block).map(|&s| (s, 0, sector_size)),
            Placement::Mini { chain, container } => {
                let mini = *chain.get(block)? as usize;
                let byte = mini * MINI_SECTOR_SIZE;
                let sector = *container.get(byte / sector_size)?;
                Some((sector, byte % sector_size, MINI_SECTOR_SIZE))
            },
        }
    }

    fn block_size(&self, sector_size: usize) -> usize {
        match self {
            Placement::Mini { .. } => MINI_SECTOR_SIZE,
            _ => sector_size,
        }
    }

    /// Blocks owned by the stream.
    pub(crate) fn chain(&self) -> &[u32] {
        match self {
            Placement::Empty => &[],
            Placement::Big { chain } | Placement::Mini { chain, .. } => chain,
        }
    }
}

fn broken_mapping(offset: u64) -> CfbError {
    CfbError::CorruptChain {
        table: super::fat::TableKind::MiniFat,
        sector: (offset / MINI_SECTOR_SIZE as u64) as u32,
        reason: "mini sector lies outside the mini stream".to_string(),
    }
}

/// Copy `buf.len()` bytes starting at stream offset `offset` into `buf`.
pub(crate) fn read_range(
    store: &SectorStore,
    placement: &Placement,
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    let sector_size = store.sector_size();
    let block_size = placement.block_size(sector_size) as u64;
    let mut done = 0usize;
    while done < buf.len() {
        let pos = offset + done as u64;
        let block = (pos / block_size) as usize;
        let within = (pos % block_size) as usize;
        let (sector, base, size) = placement
            .locate(block, sector_size)
            .ok_or_else(|| broken_mapping(pos))?;
        let take = (size - within).min(buf.len() - done);
        let data = store.read_sector(sector)?;
        buf[done..done + take].copy_from_slice(&data[base + within..base + within + take]);
        done += take;
    }
    Ok(())
}

/// Write `data` at stream offset `offset`. The chain must already be long enough.
pub(crate) fn write_range(
    store: &mut SectorStore,
    placement: &Placement,
    offset: u64,
    data: &[u8],
) -> Result<()> {
    let sector_size = store.sector_size();
    let block_size = placement.block_size(sector_size) as u64;
    let mut done = 0usize;
    while done < data.len() {
        let pos = offset + done as u64;
        let block = (pos / block_size) as usize;
        let within = (pos % block_size) as usize;
        let (sector, base, size) = placement
            .locate(block, sector_size)
            .ok_or_else(|| broken_mapping(pos))?;
        let take = (size - within).min(data.len() - done);
        let mut buf = store.read_sector(sector)?.to_vec();
        buf[base + within..base + within + take].copy_from_slice(&data[done..done + take]);
        store.write_sector(sector, &buf)?;
        done += take;
    }
    Ok(())
}

/// Write `len` zero bytes at stream offset `offset`.
fn zero_range(store: &mut SectorStore, placement: &Placement, offset: u64, len: u64) -> Result<()> {
    const CHUNK: u64 = 64 * 1024;
    let zeros = vec![0u8; CHUNK.min(len) as usize];
    let mut done = 0u64;
    while done < len {
        let take = (len - done).min(CHUNK) as usize;
        write_range(store, placement, offset + done, &zeros[..take])?;
        done += take as u64;
    }
    Ok(())
}

/// Resolve the FAT chain of the mini stream.
pub(crate) fn ministream_chain(
    fat: &AllocationTable,
    store: &SectorStore,
    root_start: u32,
    root_size: u64,
) -> Result<Vec<u32>> {
    if root_size == 0 {
        return Ok(Vec::new());
    }
    fat.chain_of_len(root_start, blocks_for(root_size, store.sector_size()))
}

impl CompoundFile {
    fn stream_entry(&self, id: EntryId) -> Result<(u32, u64)> {
        let entry = self.directory.get(id)?;
        if !entry.is_stream() {
            return Err(CfbError::NotAStream(entry.name.clone()));
        }
        Ok((entry.start_sector, entry.size))
    }

    /// Resolve the chain of a stream, checking its length against the declared size.
    pub(crate) fn placement(&self, id: EntryId) -> Result<Placement> {
        let (start, size) = self.stream_entry(id)?;
        match StorageMode::for_size(size) {
            StorageMode::Empty => Ok(Placement::Empty),
            StorageMode::Big => Ok(Placement::Big {
                chain: self
                    .fat
                    .chain_of_len(start, blocks_for(size, self.store.sector_size()))?,
            }),
            StorageMode::Mini => {
                let chain = self
                    .minifat
                    .chain_of_len(start, blocks_for(size, MINI_SECTOR_SIZE))?;
                let root = self.directory.root();
                let container =
                    ministream_chain(&self.fat, &self.store, root.start_sector, root.size)?;
                let mini_blocks = (root.size / MINI_SECTOR_SIZE as u64) as u32;
                if let Some(&bad) = chain.iter().find(|&&m| m >= mini_blocks) {
                    return Err(CfbError::CorruptChain {
                        table: super::fat::TableKind::MiniFat,
                        sector: bad,
                        reason: format!(
                            "mini sector past the end of the mini stream ({} sectors)",
                            mini_blocks
                        ),
                    });
                }
                Ok(Placement::Mini { chain, container })
            },
        }
    }

    /// Storage mode of a stream.
    pub fn storage_mode(&self, id: EntryId) -> Result<StorageMode> {
        let (_, size) = self.stream_entry(id)?;
        Ok(StorageMode::for_size(size))
    }

    /// Declared length of a stream.
    pub fn stream_len(&self, id: EntryId) -> Result<u64> {
        Ok(self.stream_entry(id)?.1)
    }

    /// Blocks of a stream's chain, in order (MiniFAT indices for mini streams).
    pub fn stream_chain(&self, id: EntryId) -> Result<Vec<u32>> {
        Ok(self.placement(id)?.chain().to_vec())
    }

    /// Read `length` bytes at `offset`.
    ///
    /// Fails with `OutOfRange` when the range extends past the end of the stream.
    pub fn read_at(&self, id: EntryId, offset: u64, length: usize) -> Result<Vec<u8>> {
        let (_, size) = self.stream_entry(id)?;
        let end = offset.checked_add(length as u64);
        if end.is_none_or(|end| end > size) {
            return Err(CfbError::OutOfRange {
                offset,
                length: length as u64,
                size,
            });
        }
        let mut buf = vec![0u8; length];
        if length > 0 {
            read_range(&self.store, &self.placement(id)?, offset, &mut buf)?;
        }
        Ok(buf)
    }

    /// Read a whole stream.
    pub fn read_stream(&self, id: EntryId) -> Result<Vec<u8>> {
        let (_, size) = self.stream_entry(id)?;
        let length = usize::try_from(size).map_err(|_| CfbError::OutOfRange {
            offset: 0,
            length: size,
            size,
        })?;
        self.read_at(id, 0, length)
    }

    /// Write `data` at `offset`, growing the stream as needed.
    ///
    /// Writing past the current end zero-fills the gap. Growth across the mini stream
    /// cutoff migrates the stream into regular sectors.
    pub fn write_at(&mut self, id: EntryId, offset: u64, data: &[u8]) -> Result<()> {
        let (_, size) = self.stream_entry(id)?;
        let limit = self.version.max_stream_size();
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= limit)
            .ok_or(CfbError::OutOfRange {
                offset,
                length: data.len() as u64,
                size: limit,
            })?;

        if end > size {
            self.resize_stream(id, end)?;
        }
        if data.is_empty() && offset <= size {
            return Ok(());
        }

        let placement = self.placement(id)?;
        if offset > size {
            zero_range(&mut self.store, &placement, size, offset - size)?;
        }
        write_range(&mut self.store, &placement, offset, data)?;
        self.directory.mark_dirty();
        Ok(())
    }

    /// Replace the whole content of a stream.
    pub fn write_stream(&mut self, id: EntryId, data: &[u8]) -> Result<()> {
        let len = data.len() as u64;
        if len > self.version.max_stream_size() {
            return Err(CfbError::OutOfRange {
                offset: 0,
                length: len,
                size: self.version.max_stream_size(),
            });
        }
        self.resize_stream(id, len)?;
        if !data.is_empty() {
            let placement = self.placement(id)?;
            write_range(&mut self.store, &placement, 0, data)?;
        }
        self.directory.mark_dirty();
        Ok(())
    }

    /// Shrink a stream to `new_len` bytes.
    ///
    /// Fails with `OutOfRange` if `new_len` is larger than the current size.
    pub fn truncate(&mut self, id: EntryId, new_len: u64) -> Result<()> {
        let (_, size) = self.stream_entry(id)?;
        if new_len > size {
            return Err(CfbError::OutOfRange {
                offset: new_len,
                length: 0,
                size,
            });
        }
        self.resize_stream(id, new_len)
    }

    /// Grow (zero-filled) or shrink a stream to exactly `new_len` bytes.
    pub fn set_stream_len(&mut self, id: EntryId, new_len: u64) -> Result<()> {
        let (_, size) = self.stream_entry(id)?;
        if new_len > self.version.max_stream_size() {
            return Err(CfbError::OutOfRange {
                offset: new_len,
                length: 0,
                size: self.version.max_stream_size(),
            });
        }
        self.resize_stream(id, new_len)?;
        if new_len > size {
            let placement = self.placement(id)?;
            zero_range(&mut self.store, &placement, size, new_len - size)?;
        }
        Ok(())
    }

    /// Resize a stream's chain to hold `new_size` bytes, migrating between the FAT and
    /// the MiniFAT when the size crosses the cutoff. Bytes below
    /// `min(old, new)` are preserved; bytes above the old size are unspecified.
    pub(crate) fn resize_stream(&mut self, id: EntryId, new_size: u64) -> Result<()> {
        let (start, old_size) = self.stream_entry(id)?;
        if new_size == old_size {
            return Ok(());
        }
        let old_mode = StorageMode::for_size(old_size);
        let new_mode = StorageMode::for_size(new_size);
        let sector_size = self.store.sector_size();

        let new_start = match (old_mode, new_mode) {
            (StorageMode::Big, StorageMode::Big) | (StorageMode::Empty, StorageMode::Big) => {
                let current = if old_mode == StorageMode::Empty {
                    ENDOFCHAIN
                } else {
                    start
                };
                self.fat.resize_chain(
                    current,
                    blocks_for(new_size, sector_size),
                    &mut self.store,
                )?
            },
            (StorageMode::Mini, StorageMode::Mini) | (StorageMode::Empty, StorageMode::Mini) => {
                let current = if old_mode == StorageMode::Empty {
                    ENDOFCHAIN
                } else {
                    start
                };
                self.resize_mini_chain(current, blocks_for(new_size, MINI_SECTOR_SIZE))?
            },
            (StorageMode::Big, StorageMode::Empty) => {
                self.fat.free_chain(start)?;
                ENDOFCHAIN
            },
            (StorageMode::Mini, StorageMode::Empty) => {
                self.minifat.free_chain(start)?;
                ENDOFCHAIN
            },
            (StorageMode::Mini, StorageMode::Big) => {
                let content = self.read_at(id, 0, old_size as usize)?;
                let new_start = self.fat.allocate_chain(
                    blocks_for(new_size, sector_size),
                    &mut self.store,
                )?;
                let chain = self.fat.chain_of(new_start)?;
                write_range(&mut self.store, &Placement::Big { chain }, 0, &content)?;
                self.minifat.free_chain(start)?;
                debug!(
                    "Migrated stream {} from mini stream to FAT ({} -> {} bytes)",
                    id, old_size, new_size
                );
                new_start
            },
            (StorageMode::Big, StorageMode::Mini) => {
                let content = self.read_at(id, 0, new_size as usize)?;
                let new_start =
                    self.resize_mini_chain(ENDOFCHAIN, blocks_for(new_size, MINI_SECTOR_SIZE))?;
                let root = self.directory.root();
                let placement = Placement::Mini {
                    chain: self.minifat.chain_of(new_start)?,
                    container: ministream_chain(
                        &self.fat,
                        &self.store,
                        root.start_sector,
                        root.size,
                    )?,
                };
                write_range(&mut self.store, &placement, 0, &content)?;
                self.fat.free_chain(start)?;
                debug!(
                    "Migrated stream {} from FAT to mini stream ({} -> {} bytes)",
                    id, old_size, new_size
                );
                new_start
            },
            (StorageMode::Empty, StorageMode::Empty) => ENDOFCHAIN,
        };

        let entry = self.directory.get_mut(id)?;
        entry.start_sector = new_start;
        entry.size = new_size;
        Ok(())
    }

    fn resize_mini_chain(&mut self, start: u32, count: usize) -> Result<u32> {
        let CompoundFile {
            store,
            fat,
            minifat,
            directory,
            ..
        } = self;
        let mut src = MiniStreamSource {
            store,
            fat,
            root: directory.root_mut(),
        };
        minifat.resize_chain(start, count, &mut src)
    }
}
