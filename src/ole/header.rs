//! Compound file header.
//!
//! The header is 512 bytes of fixed layout. With 4096-byte sectors the first sector-sized
//! block is still reserved for it, so sector `n` always starts at `(n + 1) * sector_size`.

use log::warn;
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32};
use zerocopy_derive::{
    FromBytes as DeriveFromBytes, Immutable as DeriveImmutable, IntoBytes as DeriveIntoBytes,
};

use super::consts::*;
use super::error::{CfbError, Result};
use crate::common::detection::{ContainerKind, detect_container};

/// Format version, which fixes the sector size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Version {
    /// Major version 3, 512-byte sectors
    #[default]
    V3,
    /// Major version 4, 4096-byte sectors
    V4,
}

impl Version {
    /// Sector size exponent stored in the header.
    pub const fn sector_shift(self) -> u16 {
        match self {
            Version::V3 => 9,
            Version::V4 => 12,
        }
    }

    /// Sector size in bytes.
    pub const fn sector_size(self) -> usize {
        1 << self.sector_shift()
    }

    /// Major version number stored in the header.
    pub const fn major(self) -> u16 {
        match self {
            Version::V3 => 3,
            Version::V4 => 4,
        }
    }

    /// Largest stream size addressable by this version.
    ///
    /// Version 3 readers only look at the low 32 bits of the size field.
    pub const fn max_stream_size(self) -> u64 {
        match self {
            Version::V3 => u32::MAX as u64,
            Version::V4 => u64::MAX,
        }
    }

    fn from_major(major: u16) -> Result<Self> {
        match major {
            3 => Ok(Version::V3),
            4 => Ok(Version::V4),
            other => Err(CfbError::UnsupportedVersion(format!(
                "major version {}",
                other
            ))),
        }
    }
}

/// On-disk header layout (512 bytes)
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, DeriveImmutable)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 8],
    clsid: [u8; 16],
    minor_version: U16<LE>,
    major_version: U16<LE>,
    byte_order: U16<LE>,
    sector_shift: U16<LE>,
    mini_sector_shift: U16<LE>,
    reserved: [u8; 6],
    num_dir_sectors: U32<LE>,
    num_fat_sectors: U32<LE>,
    first_dir_sector: U32<LE>,
    transaction_signature: U32<LE>,
    mini_stream_cutoff: U32<LE>,
    first_minifat_sector: U32<LE>,
    num_minifat_sectors: U32<LE>,
    first_difat_sector: U32<LE>,
    num_difat_sectors: U32<LE>,
    difat: [U32<LE>; HEADER_DIFAT_ENTRIES],
}

/// Decoded header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: Version,
    /// Directory sector count (always 0 for version 3)
    pub num_dir_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub transaction_signature: u32,
    pub first_minifat_sector: u32,
    pub num_minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    /// The 109 inline FAT sector locations, `FREESECT`-padded
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Header of an empty container.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            num_dir_sectors: 0,
            num_fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            transaction_signature: 0,
            first_minifat_sector: ENDOFCHAIN,
            num_minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_ENTRIES],
        }
    }

    /// Sector size declared by the header.
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.version.sector_size()
    }

    /// Parse and validate the header at the start of `bytes`.
    ///
    /// Checks run in this order: signature, length, byte order, major version,
    /// sector shift, mini sector shift, mini stream cutoff. Reserved bytes are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let lead = &bytes[..bytes.len().min(MAGIC.len())];
        if lead.is_empty() || lead != &MAGIC[..lead.len()] {
            return Err(match detect_container(bytes) {
                ContainerKind::Zip => CfbError::WrongContainerFormat {
                    detected: ContainerKind::Zip,
                },
                _ if bytes.is_empty() => CfbError::TruncatedInput {
                    expected: HEADER_SIZE as u64,
                    available: 0,
                },
                _ => CfbError::MalformedHeader("invalid signature".to_string()),
            });
        }
        if bytes.len() < HEADER_SIZE {
            return Err(CfbError::TruncatedInput {
                expected: HEADER_SIZE as u64,
                available: bytes.len() as u64,
            });
        }

        let raw = RawHeader::read_from_bytes(&bytes[..HEADER_SIZE])
            .map_err(|_| CfbError::MalformedHeader("unreadable header".to_string()))?;

        let byte_order = raw.byte_order.get();
        if byte_order != BYTE_ORDER_MARK {
            return Err(CfbError::MalformedHeader(format!(
                "invalid byte order mark 0x{:04X}",
                byte_order
            )));
        }

        let version = Version::from_major(raw.major_version.get())?;

        let sector_shift = raw.sector_shift.get();
        if sector_shift != 9 && sector_shift != 12 {
            return Err(CfbError::UnsupportedVersion(format!(
                "sector shift {}",
                sector_shift
            )));
        }
        if sector_shift != version.sector_shift() {
            return Err(CfbError::MalformedHeader(format!(
                "sector shift {} does not match major version {}",
                sector_shift,
                version.major()
            )));
        }

        let mini_shift = raw.mini_sector_shift.get();
        if mini_shift != MINI_SECTOR_SHIFT {
            return Err(CfbError::MalformedHeader(format!(
                "mini sector shift {} (expected {})",
                mini_shift, MINI_SECTOR_SHIFT
            )));
        }

        let cutoff = raw.mini_stream_cutoff.get();
        if cutoff != MINI_STREAM_CUTOFF {
            return Err(CfbError::MalformedHeader(format!(
                "mini stream cutoff {} (expected {})",
                cutoff, MINI_STREAM_CUTOFF
            )));
        }

        let num_dir_sectors = raw.num_dir_sectors.get();
        if version == Version::V3 && num_dir_sectors != 0 {
            warn!(
                "Version 3 header declares {} directory sectors; ignoring",
                num_dir_sectors
            );
        }

        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (slot, value) in difat.iter_mut().zip(raw.difat.iter()) {
            *slot = value.get();
        }

        Ok(Self {
            version,
            num_dir_sectors: if version == Version::V3 {
                0
            } else {
                num_dir_sectors
            },
            num_fat_sectors: raw.num_fat_sectors.get(),
            first_dir_sector: raw.first_dir_sector.get(),
            transaction_signature: raw.transaction_signature.get(),
            first_minifat_sector: raw.first_minifat_sector.get(),
            num_minifat_sectors: raw.num_minifat_sectors.get(),
            first_difat_sector: raw.first_difat_sector.get(),
            num_difat_sectors: raw.num_difat_sectors.get(),
            difat,
        })
    }

    /// Encode the header block.
    ///
    /// The result is one sector long: 512 header bytes followed by zero padding for
    /// version 4. Reserved fields and the header CLSID are written as zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut difat = [U32::<LE>::new(FREESECT); HEADER_DIFAT_ENTRIES];
        for (slot, &value) in difat.iter_mut().zip(self.difat.iter()) {
            *slot = U32::new(value);
        }

        let raw = RawHeader {
            magic: *MAGIC,
            clsid: [0; 16],
            minor_version: U16::new(MINOR_VERSION),
            major_version: U16::new(self.version.major()),
            byte_order: U16::new(BYTE_ORDER_MARK),
            sector_shift: U16::new(self.version.sector_shift()),
            mini_sector_shift: U16::new(MINI_SECTOR_SHIFT),
            reserved: [0; 6],
            num_dir_sectors: U32::new(match self.version {
                Version::V3 => 0,
                Version::V4 => self.num_dir_sectors,
            }),
            num_fat_sectors: U32::new(self.num_fat_sectors),
            first_dir_sector: U32::new(self.first_dir_sector),
            transaction_signature: U32::new(self.transaction_signature),
            mini_stream_cutoff: U32::new(MINI_STREAM_CUTOFF),
            first_minifat_sector: U32::new(self.first_minifat_sector),
            num_minifat_sectors: U32::new(self.num_minifat_sectors),
            first_difat_sector: U32::new(self.first_difat_sector),
            num_difat_sectors: U32::new(self.num_difat_sectors),
            difat,
        };

        let mut block = vec![0u8; self.sector_size()];
        block[..HEADER_SIZE].copy_from_slice(raw.as_bytes());
        block
    }
}
