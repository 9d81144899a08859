//! DIFAT (Double Indirect FAT).
//!
//! The header stores the first 109 FAT sector locations. Any further locations live in
//! a chain of DIFAT sectors:
//! - For 512-byte sectors: 127 FAT sector IDs + 1 next pointer (128 * 4 = 512)
//! - For 4096-byte sectors: 1023 FAT sector IDs + 1 next pointer (1024 * 4 = 4096)
//!
//! The last DIFAT sector's next pointer is ENDOFCHAIN.

use fixedbitset::FixedBitSet;
use log::warn;

use super::consts::*;
use super::error::{CfbError, Result};
use super::fat::TableKind;
use super::header::Header;
use super::sector::SectorStore;
use crate::common::binary::read_u32_table;

/// FAT sector IDs held by one DIFAT sector.
#[inline]
pub fn ids_per_difat_sector(sector_size: usize) -> usize {
    sector_size / 4 - 1
}

/// DIFAT sectors required to list `fat_sectors` FAT sectors.
pub fn difat_sectors_needed(fat_sectors: usize, sector_size: usize) -> usize {
    fat_sectors
        .saturating_sub(HEADER_DIFAT_ENTRIES)
        .div_ceil(ids_per_difat_sector(sector_size))
}

fn truncated(store: &SectorStore, sector: u32) -> CfbError {
    let sector_size = store.sector_size() as u64;
    CfbError::TruncatedInput {
        expected: (sector as u64 + 2) * sector_size,
        available: (store.sector_count() as u64 + 1) * sector_size,
    }
}

/// Collect the FAT sector locations from the header and the DIFAT chain.
///
/// Returns the FAT sector IDs in table order and the DIFAT sector IDs in chain order.
pub fn collect_fat_sectors(header: &Header, store: &SectorStore) -> Result<(Vec<u32>, Vec<u32>)> {
    let mut fat_sectors: Vec<u32> = header
        .difat
        .iter()
        .copied()
        .take_while(|&s| s != FREESECT && s != ENDOFCHAIN)
        .collect();

    let per_sector = ids_per_difat_sector(store.sector_size());
    let mut difat_sectors = Vec::new();
    let mut visited = FixedBitSet::with_capacity(store.sector_count() as usize);
    let mut current = header.first_difat_sector;

    while current != ENDOFCHAIN && current != FREESECT {
        if current > MAXREGSECT {
            return Err(CfbError::CorruptChain {
                table: TableKind::Difat,
                sector: current,
                reason: "invalid DIFAT sector pointer".to_string(),
            });
        }
        if current >= store.sector_count() {
            return Err(truncated(store, current));
        }
        if visited.put(current as usize) {
            return Err(CfbError::CorruptChain {
                table: TableKind::Difat,
                sector: current,
                reason: "cycle detected".to_string(),
            });
        }
        difat_sectors.push(current);

        let table = read_u32_table(store.read_sector(current)?);
        fat_sectors.extend(
            table[..per_sector]
                .iter()
                .copied()
                .filter(|&s| s != FREESECT),
        );
        current = table[per_sector];
    }

    if difat_sectors.len() != header.num_difat_sectors as usize {
        warn!(
            "Header declares {} DIFAT sectors, chain has {}",
            header.num_difat_sectors,
            difat_sectors.len()
        );
    }

    let declared = header.num_fat_sectors as usize;
    if fat_sectors.len() > declared {
        fat_sectors.truncate(declared);
    } else if fat_sectors.len() < declared {
        warn!(
            "Header declares {} FAT sectors, DIFAT lists {}",
            declared,
            fat_sectors.len()
        );
    }

    let mut seen = FixedBitSet::with_capacity(store.sector_count() as usize);
    for &sector in &fat_sectors {
        if sector > MAXREGSECT {
            return Err(CfbError::CorruptChain {
                table: TableKind::Difat,
                sector,
                reason: "invalid FAT sector location".to_string(),
            });
        }
        if sector >= store.sector_count() {
            return Err(truncated(store, sector));
        }
        if seen.put(sector as usize) || visited.contains(sector as usize) {
            return Err(CfbError::CorruptChain {
                table: TableKind::Fat,
                sector,
                reason: "sector listed twice as FAT/DIFAT storage".to_string(),
            });
        }
    }

    Ok((fat_sectors, difat_sectors))
}

/// Build the inline header DIFAT and the payload of every DIFAT sector.
///
/// `difat_sectors` must hold at least [`difat_sectors_needed`] entries.
pub fn encode_difat(
    fat_sectors: &[u32],
    difat_sectors: &[u32],
    sector_size: usize,
) -> ([u32; HEADER_DIFAT_ENTRIES], Vec<Vec<u8>>) {
    let mut inline = [FREESECT; HEADER_DIFAT_ENTRIES];
    for (slot, &sector) in inline.iter_mut().zip(fat_sectors.iter()) {
        *slot = sector;
    }

    let overflow = fat_sectors.get(HEADER_DIFAT_ENTRIES..).unwrap_or(&[]);
    let per_sector = ids_per_difat_sector(sector_size);
    let mut chunks = overflow.chunks(per_sector);

    let mut payloads = Vec::with_capacity(difat_sectors.len());
    for i in 0..difat_sectors.len() {
        let mut buf = vec![0xFFu8; sector_size];
        if let Some(chunk) = chunks.next() {
            for (slot, &sector) in buf.chunks_exact_mut(4).zip(chunk.iter()) {
                slot.copy_from_slice(&sector.to_le_bytes());
            }
        }
        let next = difat_sectors.get(i + 1).copied().unwrap_or(ENDOFCHAIN);
        buf[sector_size - 4..].copy_from_slice(&next.to_le_bytes());
        payloads.push(buf);
    }

    (inline, payloads)
}
