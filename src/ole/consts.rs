//! On-disk constants of the compound file format and the property set format.

/// Magic bytes that should be at the beginning of every OLE file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the fixed header structure (a v4 header block is padded to a full sector)
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Sector size for version 3 (512 bytes)
pub const SECTOR_SIZE_V3: usize = 512;

/// Sector size for version 4 (4096 bytes)
pub const SECTOR_SIZE_V4: usize = 4096;

/// Mini sector size exponent, fixed by the format
pub const MINI_SECTOR_SHIFT: u16 = 6;

/// Size of a mini sector (64 bytes)
pub const MINI_SECTOR_SIZE: usize = 1 << MINI_SECTOR_SHIFT;

/// Streams strictly smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Number of FAT sector locations stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

/// Maximum name length in UTF-16 code units, excluding the terminator
pub const MAX_NAME_LEN: usize = 31;

/// Name of the root directory entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Characters that may not appear in an entry name
pub const FORBIDDEN_NAME_CHARS: [char; 4] = ['/', '\\', ':', '!'];

/// Byte order mark stored at offset 0x1C
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Minor version written on every header
pub const MINOR_VERSION: u16 = 0x003E;

// Sector IDs
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs
/// Maximum directory entry ID
pub const MAXREGSID: u32 = 0xFFFFFFFA; // -6
/// No sibling / child
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

/// Red node colour
pub const COLOR_RED: u8 = 0;
/// Black node colour
pub const COLOR_BLACK: u8 = 1;

// Property types
pub const VT_EMPTY: u16 = 0;
pub const VT_NULL: u16 = 1;
pub const VT_I2: u16 = 2;
pub const VT_I4: u16 = 3;
pub const VT_R4: u16 = 4;
pub const VT_R8: u16 = 5;
pub const VT_CY: u16 = 6;
pub const VT_DATE: u16 = 7;
pub const VT_ERROR: u16 = 10;
pub const VT_BOOL: u16 = 11;
pub const VT_VARIANT: u16 = 12;
pub const VT_I1: u16 = 16;
pub const VT_UI1: u16 = 17;
pub const VT_UI2: u16 = 18;
pub const VT_UI4: u16 = 19;
pub const VT_I8: u16 = 20;
pub const VT_UI8: u16 = 21;
pub const VT_LPSTR: u16 = 30;
pub const VT_LPWSTR: u16 = 31;
pub const VT_FILETIME: u16 = 64;
pub const VT_BLOB: u16 = 65;
pub const VT_CF: u16 = 71;
pub const VT_CLSID: u16 = 72;
pub const VT_VECTOR: u16 = 0x1000;

// Property IDs
/// Dictionary of property names
pub const PID_DICTIONARY: u32 = 0;
/// Code page of the section strings
pub const PID_CODEPAGE: u32 = 1;
/// Locale of the section
pub const PID_LOCALE: u32 = 0x8000_0000;
/// Case sensitivity of dictionary names
pub const PID_BEHAVIOR: u32 = 0x8000_0003;

/// Code page marking UTF-16LE strings
pub const CODEPAGE_UTF16: u16 = 1200;

/// Code page assumed when a section carries none
pub const CODEPAGE_DEFAULT: u16 = 1252;

/// FMTID of the `\u{5}SummaryInformation` section
pub const FMTID_SUMMARY_INFORMATION: [u8; 16] = [
    0xE0, 0x85, 0x9F, 0xF2, 0xF9, 0x4F, 0x68, 0x10, 0xAB, 0x91, 0x08, 0x00, 0x2B, 0x27, 0xB3, 0xD9,
];

/// FMTID of the first `\u{5}DocumentSummaryInformation` section
pub const FMTID_DOC_SUMMARY_INFORMATION: [u8; 16] = [
    0x02, 0xD5, 0xCD, 0xD5, 0x9C, 0x2E, 0x1B, 0x10, 0x93, 0x97, 0x08, 0x00, 0x2B, 0x2C, 0xF9, 0xAE,
];

/// FMTID of the user-defined section of `\u{5}DocumentSummaryInformation`
pub const FMTID_USER_DEFINED_PROPERTIES: [u8; 16] = [
    0x05, 0xD5, 0xCD, 0xD5, 0x9C, 0x2E, 0x1B, 0x10, 0x93, 0x97, 0x08, 0x00, 0x2B, 0x2C, 0xF9, 0xAE,
];

/// Stream holding the summary information property set
pub const SUMMARY_INFORMATION_STREAM: &str = "\u{5}SummaryInformation";

/// Stream holding the document summary information property set
pub const DOC_SUMMARY_INFORMATION_STREAM: &str = "\u{5}DocumentSummaryInformation";

/// OS version written into new property sets (Win32, 10.4)
pub const OS_VERSION_WIN32: u32 = 0x0002_0A04;
