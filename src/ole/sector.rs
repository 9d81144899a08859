//! Sector store.
//!
//! The body of a compound file (everything after the header block) viewed as an array of
//! fixed-size sectors. All writes land in an in-memory buffer; nothing reaches the
//! underlying file until the container is committed and saved, and writes are always
//! whole sectors.

use log::warn;

use super::error::{CfbError, Result};

/// Growable array of fixed-size sectors.
#[derive(Debug, Clone)]
pub struct SectorStore {
    sector_size: usize,
    data: Vec<u8>,
    limit: u32,
}

impl SectorStore {
    /// Create an empty store.
    pub fn new(sector_size: usize, limit: u32) -> Self {
        Self {
            sector_size,
            data: Vec::new(),
            limit,
        }
    }

    /// Build a store from the bytes that follow the header block.
    ///
    /// A trailing partial sector is zero-padded to a full one.
    pub fn from_bytes(body: &[u8], sector_size: usize, limit: u32) -> Result<Self> {
        let mut data = body.to_vec();
        let rem = data.len() % sector_size;
        if rem != 0 {
            warn!(
                "Input ends with a partial sector ({} of {} bytes); zero-padding",
                rem, sector_size
            );
            data.resize(data.len() + (sector_size - rem), 0);
        }
        let count = data.len() / sector_size;
        if count > limit as usize {
            return Err(CfbError::StorageFull { limit });
        }
        Ok(Self {
            sector_size,
            data,
            limit,
        })
    }

    /// Sector size in bytes.
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Number of sectors currently held.
    #[inline]
    pub fn sector_count(&self) -> u32 {
        (self.data.len() / self.sector_size) as u32
    }

    /// Maximum number of sectors.
    #[inline]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn range_of(&self, index: u32) -> Result<std::ops::Range<usize>> {
        let count = self.sector_count();
        if index >= count {
            return Err(CfbError::OutOfBounds { index, count });
        }
        let start = index as usize * self.sector_size;
        Ok(start..start + self.sector_size)
    }

    /// Borrow one sector.
    pub fn read_sector(&self, index: u32) -> Result<&[u8]> {
        let range = self.range_of(index)?;
        Ok(&self.data[range])
    }

    /// Replace one sector. `bytes` must be exactly one sector long.
    pub fn write_sector(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.sector_size {
            return Err(CfbError::InvalidArgument(format!(
                "sector write of {} bytes (sector size {})",
                bytes.len(),
                self.sector_size
            )));
        }
        let range = self.range_of(index)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Append one sector and return its index.
    pub fn append_sector(&mut self, bytes: &[u8]) -> Result<u32> {
        if bytes.len() != self.sector_size {
            return Err(CfbError::InvalidArgument(format!(
                "sector append of {} bytes (sector size {})",
                bytes.len(),
                self.sector_size
            )));
        }
        let index = self.sector_count();
        if index >= self.limit {
            return Err(CfbError::StorageFull { limit: self.limit });
        }
        self.data.extend_from_slice(bytes);
        Ok(index)
    }

    /// Append a zero-filled sector and return its index.
    pub fn append_zeroed(&mut self) -> Result<u32> {
        let index = self.sector_count();
        if index >= self.limit {
            return Err(CfbError::StorageFull { limit: self.limit });
        }
        self.data.resize(self.data.len() + self.sector_size, 0);
        Ok(index)
    }

    /// Drop trailing sectors so that exactly `count` remain.
    pub fn truncate(&mut self, count: u32) {
        self.data.truncate(count as usize * self.sector_size);
    }

    /// The raw body bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let mut store = SectorStore::new(512, 16);
        assert_eq!(store.sector_count(), 0);
        let idx = store.append_sector(&[7u8; 512]).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(store.append_zeroed().unwrap(), 1);
        assert_eq!(store.sector_count(), 2);
        assert_eq!(store.read_sector(0).unwrap(), &[7u8; 512][..]);
        assert!(store.read_sector(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_out_of_bounds() {
        let store = SectorStore::new(512, 16);
        assert!(matches!(
            store.read_sector(0),
            Err(CfbError::OutOfBounds { index: 0, count: 0 })
        ));
    }

    #[test]
    fn test_partial_write_rejected() {
        let mut store = SectorStore::new(512, 16);
        store.append_zeroed().unwrap();
        assert!(matches!(
            store.write_sector(0, &[1u8; 100]),
            Err(CfbError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.append_sector(&[1u8; 513]),
            Err(CfbError::InvalidArgument(_))
        ));
        store.write_sector(0, &[1u8; 512]).unwrap();
        assert_eq!(store.read_sector(0).unwrap()[511], 1);
    }

    #[test]
    fn test_limit() {
        let mut store = SectorStore::new(512, 2);
        store.append_zeroed().unwrap();
        store.append_zeroed().unwrap();
        assert!(matches!(
            store.append_zeroed(),
            Err(CfbError::StorageFull { limit: 2 })
        ));
        assert_eq!(store.sector_count(), 2);
    }

    #[test]
    fn test_trailing_partial_sector_padded() {
        let body = vec![9u8; 700];
        let store = SectorStore::from_bytes(&body, 512, 100).unwrap();
        assert_eq!(store.sector_count(), 2);
        let second = store.read_sector(1).unwrap();
        assert_eq!(second[187], 9);
        assert_eq!(second[188], 0);
    }
}
