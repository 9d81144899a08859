//! The compound file itself.
//!
//! [`CompoundFile`] owns every layer of the container: the sector store, the FAT and
//! MiniFAT, and the directory tree. Opening a file decodes all of them into memory;
//! nothing is written back until [`CompoundFile::commit`] or [`CompoundFile::save`].
//!
//! Paths are slices of entry names starting below the root entry, e.g.
//! `&["ObjectPool", "_1234", "Ole"]`. Name lookup is case-insensitive.
//!
//! # Examples
//!
//! ```rust
//! use litchi_cfb::ole::CompoundFile;
//!
//! let mut cfb = CompoundFile::create();
//! let root = cfb.root_id();
//! cfb.create_stream(root, "WordDocument", b"hello").unwrap();
//! let bytes = cfb.commit().unwrap();
//!
//! let cfb = CompoundFile::from_bytes(&bytes).unwrap();
//! assert_eq!(cfb.open_stream(&["WordDocument"]).unwrap(), b"hello");
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use fixedbitset::FixedBitSet;
use log::{debug, warn};

use super::config::CompoundFileOptions;
use super::consts::*;
use super::difat::collect_fat_sectors;
use super::directory::{DirEntry, Directory, EntryId, ObjectType, ROOT_ID};
use super::error::{CfbError, Result};
use super::fat::{AllocationTable, TableKind};
use super::header::{Header, Version};
use super::ministream::blocks_for;
use super::sector::SectorStore;
use super::stream::{Placement, ministream_chain};

/// An OLE2 compound file held in memory.
#[derive(Debug)]
pub struct CompoundFile {
    pub(crate) version: Version,
    pub(crate) options: CompoundFileOptions,
    pub(crate) store: SectorStore,
    pub(crate) fat: AllocationTable,
    pub(crate) minifat: AllocationTable,
    pub(crate) directory: Directory,
    /// First sector of the directory chain as last read or written
    pub(crate) dir_start: u32,
    /// First sector of the MiniFAT chain as last read or written
    pub(crate) minifat_start: u32,
    pub(crate) transaction_signature: u32,
}

/// Concatenate the sectors of a chain, reporting sectors past the end of the input.
fn read_chain(store: &SectorStore, chain: &[u32]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(chain.len() * store.sector_size());
    for &sector in chain {
        out.extend_from_slice(store.read_sector(sector).map_err(|_| truncated(store, sector))?);
    }
    Ok(out)
}

fn truncated(store: &SectorStore, sector: u32) -> CfbError {
    let size = store.sector_size() as u64;
    CfbError::TruncatedInput {
        expected: (sector as u64 + 2) * size,
        available: (store.sector_count() as u64 + 1) * size,
    }
}

impl CompoundFile {
    /// Create an empty container holding only the root entry (version 3).
    pub fn create() -> Self {
        Self::create_with_options(CompoundFileOptions::default())
    }

    /// Create an empty container with the given options.
    pub fn create_with_options(options: CompoundFileOptions) -> Self {
        let version = options.version;
        Self {
            version,
            store: SectorStore::new(version.sector_size(), options.sector_limit),
            fat: AllocationTable::new(TableKind::Fat),
            minifat: AllocationTable::new(TableKind::MiniFat),
            directory: Directory::new(),
            dir_start: ENDOFCHAIN,
            minifat_start: ENDOFCHAIN,
            transaction_signature: 0,
            options,
        }
    }

    /// Read a whole container from any reader.
    pub fn open<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Open a container stored on disk.
    ///
    /// The file handle is closed before this returns, whatever the outcome.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = {
            let mut file = File::open(path.as_ref())?;
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            bytes
        };
        Self::from_bytes(&bytes)
    }

    /// Decode a container image with default options.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with_options(bytes, CompoundFileOptions::default())
    }

    /// Decode a container image.
    ///
    /// The version recorded in the header wins over `options.version`.
    pub fn from_bytes_with_options(bytes: &[u8], options: CompoundFileOptions) -> Result<Self> {
        let header = Header::parse(bytes)?;
        let version = header.version;
        let sector_size = version.sector_size();
        if bytes.len() < sector_size {
            return Err(CfbError::TruncatedInput {
                expected: sector_size as u64,
                available: bytes.len() as u64,
            });
        }

        let store = SectorStore::from_bytes(&bytes[sector_size..], sector_size, options.sector_limit)?;
        let (fat_sectors, difat_sectors) = collect_fat_sectors(&header, &store)?;

        let fat_bytes = read_chain(&store, &fat_sectors)?;
        let mut fat = AllocationTable::from_bytes(TableKind::Fat, &fat_bytes);
        for (sectors, marker) in [(&fat_sectors, FATSECT), (&difat_sectors, DIFSECT)] {
            for &sector in sectors.iter() {
                if fat.next(sector) != marker {
                    warn!(
                        "Sector {} holds allocation data but is marked 0x{:08X} in the FAT",
                        sector,
                        fat.next(sector)
                    );
                    fat.set(sector, marker);
                }
            }
        }

        let dir_chain = fat.chain_of(header.first_dir_sector)?;
        if dir_chain.is_empty() {
            return Err(CfbError::CorruptDirectory(
                "directory chain is empty".to_string(),
            ));
        }
        let directory = Directory::from_bytes(&read_chain(&store, &dir_chain)?, version)?;

        let minifat_start = match header.first_minifat_sector {
            FREESECT => ENDOFCHAIN,
            start => start,
        };
        let minifat = if minifat_start == ENDOFCHAIN {
            AllocationTable::new(TableKind::MiniFat)
        } else {
            let chain = fat.chain_of(minifat_start)?;
            if chain.len() != header.num_minifat_sectors as usize {
                warn!(
                    "Header declares {} MiniFAT sectors, chain has {}",
                    header.num_minifat_sectors,
                    chain.len()
                );
            }
            AllocationTable::from_bytes(TableKind::MiniFat, &read_chain(&store, &chain)?)
        };

        let root = directory.root();
        let container = ministream_chain(&fat, &store, root.start_sector, root.size)?;
        if let Some(&sector) = container.iter().find(|&&s| s >= store.sector_count()) {
            return Err(truncated(&store, sector));
        }

        debug!(
            "Opened compound file v{}: {} sectors, {} FAT sectors, {} DIFAT sectors, {} directory entries",
            version.major(),
            store.sector_count(),
            fat_sectors.len(),
            difat_sectors.len(),
            directory.ids().count()
        );

        let cfb = Self {
            version,
            store,
            fat,
            minifat,
            directory,
            dir_start: header.first_dir_sector,
            minifat_start,
            transaction_signature: header.transaction_signature,
            options,
        };
        if cfb.options.verify_on_open {
            cfb.check_integrity()?;
        }
        Ok(cfb)
    }

    /// Format version of this container.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Sector size in bytes (512 or 4096).
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.store.sector_size()
    }

    /// Options this container was created or opened with.
    #[inline]
    pub fn options(&self) -> &CompoundFileOptions {
        &self.options
    }

    /// The FAT.
    #[inline]
    pub fn fat(&self) -> &AllocationTable {
        &self.fat
    }

    /// The MiniFAT.
    #[inline]
    pub fn minifat(&self) -> &AllocationTable {
        &self.minifat
    }

    /// Number of sectors currently held, excluding the header.
    #[inline]
    pub fn sector_count(&self) -> u32 {
        self.store.sector_count()
    }

    /// Whether anything changed since the container was opened or last committed.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.directory.is_dirty()
    }

    // ----------------------------------------------------------------------------------
    // Navigation
    // ----------------------------------------------------------------------------------

    /// Id of the root entry.
    #[inline]
    pub fn root_id(&self) -> EntryId {
        ROOT_ID
    }

    /// Borrow an entry.
    pub fn entry(&self, id: EntryId) -> Result<&DirEntry> {
        self.directory.get(id)
    }

    /// Children of a storage in canonical sibling order.
    pub fn children(&self, id: EntryId) -> Result<&[EntryId]> {
        self.directory.list_children(id)
    }

    /// Parent of an entry, `None` for the root.
    pub fn parent(&self, id: EntryId) -> Result<Option<EntryId>> {
        self.directory.parent(id)
    }

    /// Find a child of `parent` by name.
    pub fn lookup(&self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.directory.lookup(parent, name)
    }

    /// Resolve a path below the root. An empty path is the root itself.
    pub fn find(&self, path: &[&str]) -> Result<EntryId> {
        self.directory.resolve(path.iter().copied())
    }

    /// Check if a stream or storage exists at `path`.
    pub fn exists(&self, path: &[&str]) -> bool {
        self.find(path).is_ok()
    }

    /// Slash-separated path of an entry.
    pub fn path_of(&self, id: EntryId) -> Result<String> {
        self.directory.path_of(id)
    }

    /// Paths of every stream in the container, depth first in canonical sibling order.
    pub fn list_streams(&self) -> Vec<Vec<String>> {
        let Ok(ids) = self.directory.descendants(ROOT_ID) else {
            return Vec::new();
        };
        ids.into_iter()
            .filter(|&id| self.directory.get(id).is_ok_and(|e| e.is_stream()))
            .filter_map(|id| self.name_path(id).ok())
            .collect()
    }

    fn name_path(&self, id: EntryId) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.directory.parent(current)? {
            names.push(self.directory.get(current)?.name.clone());
            current = parent;
        }
        names.reverse();
        Ok(names)
    }

    /// Entries directly below the storage at `path`.
    pub fn list_entries(&self, path: &[&str]) -> Result<Vec<&DirEntry>> {
        let id = self.find(path)?;
        self.children(id)?
            .iter()
            .map(|&child| self.directory.get(child))
            .collect()
    }

    /// Read the whole stream at `path`.
    pub fn open_stream(&self, path: &[&str]) -> Result<Vec<u8>> {
        let id = self.find(path)?;
        self.read_stream(id)
    }

    // ----------------------------------------------------------------------------------
    // Mutation
    // ----------------------------------------------------------------------------------

    /// Add an empty storage below `parent`.
    pub fn create_storage(&mut self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.directory
            .create_entry(parent, name, ObjectType::Storage)
    }

    /// Add a stream below `parent` holding `data`.
    ///
    /// If the data cannot be stored the new entry is removed again.
    pub fn create_stream(&mut self, parent: EntryId, name: &str, data: &[u8]) -> Result<EntryId> {
        let id = self
            .directory
            .create_entry(parent, name, ObjectType::Stream)?;
        if let Err(err) = self.write_stream(id, data) {
            self.delete(id, false)?;
            return Err(err);
        }
        Ok(id)
    }

    /// Resolve a storage path, creating every missing storage along the way.
    pub fn create_storage_path(&mut self, path: &[&str]) -> Result<EntryId> {
        let mut current = ROOT_ID;
        for &name in path {
            current = match self.directory.lookup(current, name) {
                Ok(id) => {
                    let entry = self.directory.get(id)?;
                    if !entry.is_storage() {
                        return Err(CfbError::NotAStorage(entry.name.clone()));
                    }
                    id
                },
                Err(CfbError::NotFound(_)) => self.create_storage(current, name)?,
                Err(err) => return Err(err),
            };
        }
        Ok(current)
    }

    /// Create or replace the stream at `path`, creating missing parent storages.
    pub fn put_stream(&mut self, path: &[&str], data: &[u8]) -> Result<EntryId> {
        let Some((&name, parents)) = path.split_last() else {
            return Err(CfbError::InvalidArgument(
                "stream path must not be empty".to_string(),
            ));
        };
        let parent = self.create_storage_path(parents)?;
        match self.directory.lookup(parent, name) {
            Ok(id) => {
                self.write_stream(id, data)?;
                Ok(id)
            },
            Err(CfbError::NotFound(_)) => self.create_stream(parent, name, data),
            Err(err) => Err(err),
        }
    }

    /// Remove an entry and release the storage of every stream removed with it.
    ///
    /// A storage with children is only removed when `recursive` is set. Sector payloads
    /// are not erased.
    pub fn delete(&mut self, id: EntryId, recursive: bool) -> Result<()> {
        let mut doomed = vec![id];
        if self.directory.get(id)?.is_storage() {
            doomed.extend(self.directory.descendants(id)?);
        }
        // Chains are resolved while the entries still exist
        let mut chains = Vec::new();
        for &victim in &doomed {
            if self.directory.get(victim)?.is_stream() {
                chains.push(self.placement(victim)?);
            }
        }

        self.directory.delete(id, recursive)?;
        for placement in chains {
            let table = match placement {
                Placement::Empty => continue,
                Placement::Big { .. } => &mut self.fat,
                Placement::Mini { .. } => &mut self.minifat,
            };
            for &block in placement.chain() {
                table.set(block, FREESECT);
            }
        }
        Ok(())
    }

    /// Remove the entry at `path`.
    pub fn delete_path(&mut self, path: &[&str], recursive: bool) -> Result<()> {
        if path.is_empty() {
            return Err(CfbError::InvalidArgument(
                "the root entry cannot be deleted".to_string(),
            ));
        }
        let id = self.find(path)?;
        self.delete(id, recursive)
    }

    /// Move and/or rename an entry.
    pub fn move_entry(&mut self, id: EntryId, new_parent: EntryId, new_name: &str) -> Result<()> {
        self.directory.move_entry(id, new_parent, new_name)
    }

    /// Set the class id of a storage or the root.
    pub fn set_clsid(&mut self, id: EntryId, clsid: [u8; 16]) -> Result<()> {
        self.directory.get_mut(id)?.clsid = clsid;
        Ok(())
    }

    /// Set the user-defined state bits of an entry.
    pub fn set_state_bits(&mut self, id: EntryId, bits: u32) -> Result<()> {
        self.directory.get_mut(id)?.state_bits = bits;
        Ok(())
    }

    /// Set the creation and modification times of an entry. `None` clears a time.
    pub fn set_times(
        &mut self,
        id: EntryId,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.directory.get_mut(id)?.set_times(created, modified);
        Ok(())
    }

    // ----------------------------------------------------------------------------------
    // Integrity
    // ----------------------------------------------------------------------------------

    /// Verify every chain in the container.
    ///
    /// Checks that each table only holds valid pointers, that every stream chain has
    /// the length its size implies and stays inside the store, and that no sector or
    /// mini sector belongs to two owners.
    pub fn check_integrity(&self) -> Result<()> {
        self.fat.validate()?;
        self.minifat.validate()?;

        let sector_count = self.store.sector_count();
        let mut owned = FixedBitSet::with_capacity(sector_count as usize);
        let mut claim = |sector: u32| -> Result<()> {
            if sector >= sector_count {
                return Err(truncated(&self.store, sector));
            }
            if owned.put(sector as usize) {
                return Err(CfbError::CorruptChain {
                    table: TableKind::Fat,
                    sector,
                    reason: "sector is cross-linked between two owners".to_string(),
                });
            }
            Ok(())
        };

        for marker in [FATSECT, DIFSECT] {
            for sector in self.fat.positions_of(marker) {
                claim(sector)?;
            }
        }
        for sector in self.fat.chain_of(self.dir_start)? {
            claim(sector)?;
        }
        for sector in self.fat.chain_of(self.minifat_start)? {
            claim(sector)?;
        }
        let root = self.directory.root();
        for sector in ministream_chain(&self.fat, &self.store, root.start_sector, root.size)? {
            claim(sector)?;
        }

        let mini_count = (root.size / MINI_SECTOR_SIZE as u64) as usize;
        let mut mini_owned = FixedBitSet::with_capacity(mini_count);
        for id in self.directory.ids() {
            let entry = self.directory.get(id)?;
            if !entry.is_stream() {
                continue;
            }
            match self.placement(id)? {
                Placement::Empty => {},
                Placement::Big { chain } => {
                    for sector in chain {
                        claim(sector)?;
                    }
                },
                Placement::Mini { chain, .. } => {
                    for block in chain {
                        if mini_owned.put(block as usize) {
                            return Err(CfbError::CorruptChain {
                                table: TableKind::MiniFat,
                                sector: block,
                                reason: "mini sector is cross-linked between two streams"
                                    .to_string(),
                            });
                        }
                    }
                },
            }
        }

        let leaked = (0..sector_count)
            .filter(|&s| self.fat.next(s) != FREESECT && !owned.contains(s as usize))
            .count();
        if leaked > 0 {
            warn!("{} allocated sectors are not reachable from any owner", leaked);
        }
        debug!(
            "Integrity check passed: {} sectors, {} mini sectors in use",
            owned.count_ones(..),
            mini_owned.count_ones(..)
        );
        Ok(())
    }

    /// Number of sectors the mini stream occupies in the FAT.
    pub fn ministream_sectors(&self) -> usize {
        blocks_for(self.directory.root().size, self.store.sector_size())
    }
}
