//! Commit protocol.
//!
//! Committing serializes the in-memory container into a complete image:
//!
//! 1. Release mini sectors past the last one in use
//! 2. Encode the directory (balanced sibling links) and rewrite its chain
//! 3. Encode the MiniFAT and rewrite its chain, or drop it when there is no mini stream
//! 4. Reserve FAT and DIFAT sectors until the FAT describes every sector, itself included
//! 5. Write the FAT, the DIFAT and the header
//!
//! The container stays usable afterwards; further mutations start from the committed
//! layout.

use std::io::Write;
use std::path::Path;

use log::{debug, info};
use tempfile::NamedTempFile;

use super::consts::*;
use super::difat::{difat_sectors_needed, encode_difat};
use super::error::Result;
use super::file::CompoundFile;
use super::header::{Header, Version};
use super::ministream::{blocks_for, trim_ministream};

impl CompoundFile {
    /// Serialize the container into a complete compound file image.
    pub fn commit(&mut self) -> Result<Vec<u8>> {
        let sector_size = self.store.sector_size();
        let entries_per_sector = sector_size / 4;

        {
            let CompoundFile {
                store,
                fat,
                minifat,
                directory,
                ..
            } = self;
            trim_ministream(store, fat, minifat, directory.root_mut())?;
        }

        // FAT and DIFAT placement is recomputed from scratch below.
        for marker in [FATSECT, DIFSECT] {
            for sector in self.fat.positions_of(marker) {
                self.fat.set(sector, FREESECT);
            }
        }

        let dir_bytes = self.directory.to_bytes(sector_size);
        let dir_count = dir_bytes.len() / sector_size;
        self.dir_start = self
            .fat
            .resize_chain(self.dir_start, dir_count, &mut self.store)?;
        let dir_chain = self.fat.chain_of(self.dir_start)?;
        for (&sector, chunk) in dir_chain.iter().zip(dir_bytes.chunks_exact(sector_size)) {
            self.store.write_sector(sector, chunk)?;
        }

        let mini_blocks = (self.directory.root().size / MINI_SECTOR_SIZE as u64) as usize;
        let minifat_count = blocks_for(mini_blocks as u64 * 4, sector_size);
        self.minifat.truncate(minifat_count * entries_per_sector);
        self.minifat_start =
            self.fat
                .resize_chain(self.minifat_start, minifat_count, &mut self.store)?;
        if minifat_count > 0 {
            let minifat_bytes = self.minifat.to_bytes(sector_size, minifat_count);
            let chain = self.fat.chain_of(self.minifat_start)?;
            for (&sector, chunk) in chain.iter().zip(minifat_bytes.chunks_exact(sector_size)) {
                self.store.write_sector(sector, chunk)?;
            }
        }

        self.drop_trailing_free_sectors();

        let (fat_sectors, difat_sectors) = loop {
            let fat_sectors = self.fat.positions_of(FATSECT);
            let difat_sectors = self.fat.positions_of(DIFSECT);
            let needed_fat = (self.store.sector_count() as usize)
                .div_ceil(entries_per_sector)
                .max(1);
            let needed_difat = difat_sectors_needed(needed_fat, sector_size);
            if fat_sectors.len() >= needed_fat && difat_sectors.len() >= needed_difat {
                break (fat_sectors, difat_sectors);
            }
            if fat_sectors.len() < needed_fat {
                self.fat.claim_special(FATSECT, &mut self.store)?;
            }
            if difat_sectors.len() < needed_difat {
                self.fat.claim_special(DIFSECT, &mut self.store)?;
            }
        };

        let fat_bytes = self.fat.to_bytes(sector_size, fat_sectors.len());
        for (&sector, chunk) in fat_sectors.iter().zip(fat_bytes.chunks_exact(sector_size)) {
            self.store.write_sector(sector, chunk)?;
        }
        let (inline, payloads) = encode_difat(&fat_sectors, &difat_sectors, sector_size);
        for (&sector, payload) in difat_sectors.iter().zip(payloads.iter()) {
            self.store.write_sector(sector, payload)?;
        }

        let header = Header {
            version: self.version,
            num_dir_sectors: match self.version {
                Version::V3 => 0,
                Version::V4 => dir_count as u32,
            },
            num_fat_sectors: fat_sectors.len() as u32,
            first_dir_sector: self.dir_start,
            transaction_signature: self.transaction_signature,
            first_minifat_sector: self.minifat_start,
            num_minifat_sectors: minifat_count as u32,
            first_difat_sector: difat_sectors.first().copied().unwrap_or(ENDOFCHAIN),
            num_difat_sectors: difat_sectors.len() as u32,
            difat: inline,
        };

        let mut image = header.to_bytes();
        image.extend_from_slice(self.store.as_bytes());
        self.directory.mark_clean();

        debug!(
            "Committed compound file v{}: {} sectors ({} FAT, {} DIFAT, {} directory, {} MiniFAT)",
            self.version.major(),
            self.store.sector_count(),
            fat_sectors.len(),
            difat_sectors.len(),
            dir_count,
            minifat_count
        );
        Ok(image)
    }

    /// Release free sectors at the end of the store.
    fn drop_trailing_free_sectors(&mut self) {
        let mut count = self.store.sector_count();
        while count > 0 && self.fat.next(count - 1) == FREESECT {
            count -= 1;
        }
        if count < self.store.sector_count() {
            debug!(
                "Dropping {} trailing free sectors",
                self.store.sector_count() - count
            );
            self.store.truncate(count);
            self.fat.truncate(count as usize);
        }
    }

    /// Commit and write the image to `writer`.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let image = self.commit()?;
        writer.write_all(&image)?;
        writer.flush()?;
        Ok(())
    }

    /// Commit and save the image to `path`.
    ///
    /// The image is written to a temporary file next to `path` which then replaces the
    /// target in one rename, so an existing file is never left half-written.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use litchi_cfb::ole::CompoundFile;
    /// let mut cfb = CompoundFile::create();
    /// cfb.put_stream(&["Test"], b"Hello")?;
    /// cfb.save("output.ole")?;
    /// # Ok::<(), litchi_cfb::ole::CfbError>(())
    /// ```
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let image = self.commit()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&image)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        info!(
            "Saved compound file to {} ({} bytes)",
            path.display(),
            image.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::{CfbError, CompoundFileOptions};

    #[test]
    fn test_empty_layout() {
        let mut cfb = CompoundFile::create();
        let image = cfb.commit().unwrap();
        // Header, one directory sector, one FAT sector
        assert_eq!(image.len(), 512 * 3);
        assert!(!cfb.is_dirty());

        let header = Header::parse(&image).unwrap();
        assert_eq!(header.num_fat_sectors, 1);
        assert_eq!(header.first_dir_sector, 0);
        assert_eq!(header.difat[0], 1);
        assert_eq!(header.first_minifat_sector, ENDOFCHAIN);
        assert_eq!(header.first_difat_sector, ENDOFCHAIN);
        assert_eq!(cfb.fat().next(1), FATSECT);
    }

    #[test]
    fn test_recommit_is_stable() {
        let mut cfb = CompoundFile::create();
        cfb.put_stream(&["Data"], &[7u8; 10_000]).unwrap();
        cfb.put_stream(&["Small"], &[1u8; 300]).unwrap();
        let first = cfb.commit().unwrap();
        let second = cfb.commit().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_trailing_free_sectors_are_dropped() {
        let mut cfb = CompoundFile::create();
        cfb.put_stream(&["Keep"], &[1u8; 5000]).unwrap();
        cfb.put_stream(&["Drop"], &[2u8; 50_000]).unwrap();
        let large = cfb.commit().unwrap();

        cfb.delete_path(&["Drop"], false).unwrap();
        let small = cfb.commit().unwrap();
        assert!(small.len() < large.len());

        let reopened = CompoundFile::from_bytes(&small).unwrap();
        assert_eq!(reopened.open_stream(&["Keep"]).unwrap(), vec![1u8; 5000]);
        reopened.check_integrity().unwrap();
    }

    #[test]
    fn test_minifat_dropped_when_ministream_empties() {
        let mut cfb = CompoundFile::create();
        cfb.put_stream(&["Tiny"], b"tiny").unwrap();
        let image = cfb.commit().unwrap();
        assert_ne!(Header::parse(&image).unwrap().first_minifat_sector, ENDOFCHAIN);

        cfb.delete_path(&["Tiny"], false).unwrap();
        let image = cfb.commit().unwrap();
        let header = Header::parse(&image).unwrap();
        assert_eq!(header.first_minifat_sector, ENDOFCHAIN);
        assert_eq!(header.num_minifat_sectors, 0);
        assert_eq!(cfb.entry(cfb.root_id()).unwrap().size(), 0);
    }

    #[test]
    fn test_commit_fails_when_store_is_full() {
        let options = CompoundFileOptions::new().with_sector_limit(1);
        let mut cfb = CompoundFile::create_with_options(options);
        // The directory takes the only sector; the FAT has nowhere to go
        let err = cfb.commit().unwrap_err();
        assert!(matches!(err, CfbError::StorageFull { limit: 1 }));
    }
}
