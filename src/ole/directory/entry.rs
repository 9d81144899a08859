//! Directory entry record (128 bytes) and the sibling name ordering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32, U64};
use zerocopy_derive::{
    FromBytes as DeriveFromBytes, Immutable as DeriveImmutable, IntoBytes as DeriveIntoBytes,
};

use crate::common::filetime::{datetime_to_filetime, filetime_to_datetime};
use crate::ole::consts::*;
use crate::ole::error::{CfbError, Result};
use crate::ole::header::Version;

/// Raw OLE directory entry structure (128 bytes)
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, DeriveImmutable)]
#[repr(C)]
struct RawDirectoryEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    /// Entry type (1 = storage, 2 = stream, 5 = root)
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    node_color: u8,
    sid_left: U32<LE>,
    sid_right: U32<LE>,
    sid_child: U32<LE>,
    clsid: [u8; 16],
    state_bits: U32<LE>,
    creation_time: U64<LE>,
    modified_time: U64<LE>,
    start_sector: U32<LE>,
    stream_size: U64<LE>,
}

/// Kind of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Unused,
    Storage,
    Stream,
    Root,
}

impl ObjectType {
    /// Decode the on-disk type byte. Types this crate does not model yield `None`.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            STGTY_EMPTY => Some(ObjectType::Unused),
            STGTY_STORAGE => Some(ObjectType::Storage),
            STGTY_STREAM => Some(ObjectType::Stream),
            STGTY_ROOT => Some(ObjectType::Root),
            _ => None,
        }
    }

    /// On-disk type byte.
    pub fn to_raw(self) -> u8 {
        match self {
            ObjectType::Unused => STGTY_EMPTY,
            ObjectType::Storage => STGTY_STORAGE,
            ObjectType::Stream => STGTY_STREAM,
            ObjectType::Root => STGTY_ROOT,
        }
    }
}

/// Sibling/child links as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Links {
    pub left: u32,
    pub right: u32,
    pub child: u32,
}

impl Links {
    pub const NONE: Links = Links {
        left: NOSTREAM,
        right: NOSTREAM,
        child: NOSTREAM,
    };
}

/// A storage, stream, or the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (UTF-16 decoded)
    pub name: String,
    pub obj_type: ObjectType,
    /// CLSID of this entry, raw little-endian GUID bytes
    pub clsid: [u8; 16],
    pub state_bits: u32,
    /// Creation time (raw FILETIME, 0 = unset)
    pub created: u64,
    /// Modification time (raw FILETIME, 0 = unset)
    pub modified: u64,
    /// First sector of the stream (FAT or MiniFAT depending on size)
    pub start_sector: u32,
    /// Size of the stream in bytes
    pub size: u64,
}

impl DirEntry {
    /// A fresh entry with no data.
    pub fn new(name: &str, obj_type: ObjectType) -> Self {
        Self {
            name: name.to_string(),
            obj_type,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
            start_sector: ENDOFCHAIN,
            size: 0,
        }
    }

    /// The root entry of an empty container.
    pub fn root() -> Self {
        Self::new(ROOT_ENTRY_NAME, ObjectType::Root)
    }

    pub(crate) fn unused() -> Self {
        Self {
            start_sector: 0,
            ..Self::new("", ObjectType::Unused)
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn object_type(&self) -> ObjectType {
        self.obj_type
    }

    #[inline]
    pub fn is_stream(&self) -> bool {
        self.obj_type == ObjectType::Stream
    }

    /// Storage or root.
    #[inline]
    pub fn is_storage(&self) -> bool {
        matches!(self.obj_type, ObjectType::Storage | ObjectType::Root)
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.obj_type == ObjectType::Root
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    #[inline]
    pub fn clsid(&self) -> &[u8; 16] {
        &self.clsid
    }

    /// CLSID formatted as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, empty when all zero.
    pub fn clsid_string(&self) -> String {
        format_clsid(&self.clsid)
    }

    #[inline]
    pub fn state_bits(&self) -> u32 {
        self.state_bits
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.created)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modified)
    }

    /// Set both timestamps; `None` clears a timestamp.
    pub fn set_times(&mut self, created: Option<DateTime<Utc>>, modified: Option<DateTime<Utc>>) {
        self.created = created.as_ref().map(datetime_to_filetime).unwrap_or(0);
        self.modified = modified.as_ref().map(datetime_to_filetime).unwrap_or(0);
    }

    /// Decode one 128-byte record.
    ///
    /// Returns `None` for the entry when the type byte is not one this crate models.
    pub fn parse(bytes: &[u8], version: Version) -> Result<(Option<Self>, Links)> {
        let raw = RawDirectoryEntry::read_from_bytes(bytes).map_err(|_| {
            CfbError::CorruptDirectory(format!(
                "directory record of {} bytes (expected {})",
                bytes.len(),
                DIRENTRY_SIZE
            ))
        })?;

        let links = Links {
            left: raw.sid_left.get(),
            right: raw.sid_right.get(),
            child: raw.sid_child.get(),
        };

        let Some(obj_type) = ObjectType::from_raw(raw.entry_type) else {
            return Ok((None, links));
        };

        let name_len = (raw.name_len.get() as usize).min(64);
        let name = decode_name(&raw.name[..name_len.saturating_sub(2)]);

        // Version 3 readers ignore the high half of the size field
        let size = match version {
            Version::V3 => raw.stream_size.get() & 0xFFFF_FFFF,
            Version::V4 => raw.stream_size.get(),
        };

        Ok((
            Some(Self {
                name,
                obj_type,
                clsid: raw.clsid,
                state_bits: raw.state_bits.get(),
                created: raw.creation_time.get(),
                modified: raw.modified_time.get(),
                start_sector: raw.start_sector.get(),
                size,
            }),
            links,
        ))
    }

    /// Encode this entry with the given links. All nodes are written black.
    pub fn to_bytes(&self, links: Links) -> [u8; DIRENTRY_SIZE] {
        let mut name = [0u8; 64];
        let mut name_len = 0u16;
        if self.obj_type != ObjectType::Unused {
            let units: Vec<u16> = self.name.encode_utf16().take(MAX_NAME_LEN).collect();
            for (slot, unit) in name.chunks_exact_mut(2).zip(units.iter()) {
                slot.copy_from_slice(&unit.to_le_bytes());
            }
            name_len = ((units.len() + 1) * 2) as u16;
        }

        let (start_sector, size) = match self.obj_type {
            ObjectType::Stream | ObjectType::Root => (self.start_sector, self.size),
            ObjectType::Storage | ObjectType::Unused => (0, 0),
        };

        let raw = RawDirectoryEntry {
            name,
            name_len: U16::new(name_len),
            entry_type: self.obj_type.to_raw(),
            node_color: if self.obj_type == ObjectType::Unused {
                COLOR_RED
            } else {
                COLOR_BLACK
            },
            sid_left: U32::new(links.left),
            sid_right: U32::new(links.right),
            sid_child: U32::new(links.child),
            clsid: self.clsid,
            state_bits: U32::new(self.state_bits),
            creation_time: U64::new(self.created),
            modified_time: U64::new(self.modified),
            start_sector: U32::new(start_sector),
            stream_size: U64::new(size),
        };

        let mut out = [0u8; DIRENTRY_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }
}

/// Decode a UTF-16LE name, stopping at the first NUL.
fn decode_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Format CLSID as a human-readable string
pub fn format_clsid(bytes: &[u8; 16]) -> String {
    if bytes.iter().all(|&b| b == 0) {
        return String::new();
    }

    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u16::from_le_bytes([bytes[4], bytes[5]]),
        u16::from_le_bytes([bytes[6], bytes[7]]),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}

/// Canonical sibling order: shorter names (in UTF-16 units) first, then the
/// upper-cased names unit by unit.
///
/// Upper-casing is per character and only applies when it maps to a single character,
/// so names keep their length (`ß` stays `ß`).
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let len_a = a.encode_utf16().count();
    let len_b = b.encode_utf16().count();
    len_a
        .cmp(&len_b)
        .then_with(|| upper_units(a).cmp(upper_units(b)))
}

fn simple_uppercase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}

fn upper_units(name: &str) -> impl Iterator<Item = u16> + '_ {
    name.chars().flat_map(|c| {
        let mut buf = [0u16; 2];
        let units = simple_uppercase(c).encode_utf16(&mut buf);
        units.to_vec()
    })
}

/// Reject names the format cannot store.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CfbError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    let units = name.encode_utf16().count();
    if units > MAX_NAME_LEN {
        return Err(invalid(&format!(
            "{} UTF-16 units exceeds the limit of {}",
            units, MAX_NAME_LEN
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(invalid(&format!("contains forbidden character {:?}", c)));
    }
    if name.contains('\0') {
        return Err(invalid("contains a NUL character"));
    }
    Ok(())
}
