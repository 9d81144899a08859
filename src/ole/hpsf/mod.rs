//! Property sets (HPSF).
//!
//! Streams such as `\u{5}SummaryInformation` hold a property set: a small header, a
//! list of sections keyed by format id, and the sections themselves. This module
//! decodes such streams into [`PropertySet`] values and encodes them back byte for byte,
//! with every value padded to four bytes.
//!
//! # Examples
//!
//! ```rust
//! use litchi_cfb::ole::CompoundFile;
//! use litchi_cfb::ole::consts::{FMTID_SUMMARY_INFORMATION, SUMMARY_INFORMATION_STREAM};
//! use litchi_cfb::ole::hpsf::{PropertySet, Variant};
//!
//! let mut set = PropertySet::new(FMTID_SUMMARY_INFORMATION);
//! set.sections[0].set(2, Variant::Lpstr("Quarterly report".into()));
//!
//! let mut cfb = CompoundFile::create();
//! cfb.write_property_set(&[SUMMARY_INFORMATION_STREAM], &set).unwrap();
//! let meta = cfb.metadata().unwrap();
//! assert_eq!(meta.title.as_deref(), Some("Quarterly report"));
//! ```

mod custom;
mod section;
mod summary;
mod variant;

pub use custom::CustomProperties;
pub use section::{Property, Section};
pub use summary::OleMetadata;
pub use variant::Variant;

use super::consts::*;
use super::directory::EntryId;
use super::error::{CfbError, Result};
use super::file::CompoundFile;
use crate::common::binary::{read_bytes, read_u16_le, read_u32_le, write_u16_le, write_u32_le};

const PROPERTY_SET_HEADER_SIZE: usize = 28;
const SECTION_DECLARATION_SIZE: usize = 20;

/// A decoded property set stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySet {
    /// Format version (0 or 1)
    pub format: u16,
    /// OS kind and version of the writer
    pub os_version: u32,
    pub class_id: [u8; 16],
    pub sections: Vec<Section>,
}

impl PropertySet {
    /// A property set with one empty section.
    pub fn new(format_id: [u8; 16]) -> Self {
        Self {
            format: 0,
            os_version: OS_VERSION_WIN32,
            class_id: [0u8; 16],
            sections: vec![Section::new(format_id)],
        }
    }

    /// Section with the given format id.
    pub fn section(&self, format_id: &[u8; 16]) -> Option<&Section> {
        self.sections.iter().find(|s| &s.format_id == format_id)
    }

    /// Mutable section with the given format id.
    pub fn section_mut(&mut self, format_id: &[u8; 16]) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| &s.format_id == format_id)
    }

    /// Decode a property set stream.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let byte_order = read_u16_le(data, 0)?;
        if byte_order != BYTE_ORDER_MARK {
            return Err(CfbError::MalformedPropertySet(format!(
                "byte order mark 0x{:04X}",
                byte_order
            )));
        }
        let format = read_u16_le(data, 2)?;
        let os_version = read_u32_le(data, 4)?;
        let mut class_id = [0u8; 16];
        class_id.copy_from_slice(read_bytes(data, 8, 16)?);
        let count = read_u32_le(data, 24)? as usize;
        if count > data.len().saturating_sub(PROPERTY_SET_HEADER_SIZE) / SECTION_DECLARATION_SIZE {
            return Err(CfbError::MalformedPropertySet(format!(
                "property set claims {} sections in {} bytes",
                count,
                data.len()
            )));
        }

        let mut sections = Vec::with_capacity(count);
        for i in 0..count {
            let at = PROPERTY_SET_HEADER_SIZE + i * SECTION_DECLARATION_SIZE;
            let mut format_id = [0u8; 16];
            format_id.copy_from_slice(read_bytes(data, at, 16)?);
            let offset = read_u32_le(data, at + 16)? as usize;
            sections.push(Section::parse(data, offset, format_id)?);
        }

        Ok(Self {
            format,
            os_version,
            class_id,
            sections,
        })
    }

    /// Encode into a property set stream.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bodies = self
            .sections
            .iter()
            .map(Section::to_bytes)
            .collect::<Result<Vec<_>>>()?;

        let mut out = Vec::new();
        write_u16_le(&mut out, BYTE_ORDER_MARK);
        write_u16_le(&mut out, self.format);
        write_u32_le(&mut out, self.os_version);
        out.extend_from_slice(&self.class_id);
        write_u32_le(&mut out, bodies.len() as u32);

        let mut offset = PROPERTY_SET_HEADER_SIZE + bodies.len() * SECTION_DECLARATION_SIZE;
        for (section, body) in self.sections.iter().zip(&bodies) {
            out.extend_from_slice(&section.format_id);
            write_u32_le(&mut out, offset as u32);
            offset += body.len();
        }
        for body in bodies {
            out.extend_from_slice(&body);
        }
        Ok(out)
    }
}

impl CompoundFile {
    /// Decode the property set stored in the stream at `path`.
    pub fn read_property_set(&self, path: &[&str]) -> Result<PropertySet> {
        PropertySet::from_bytes(&self.open_stream(path)?)
    }

    /// Encode `set` into the stream at `path`, creating or replacing it.
    pub fn write_property_set(&mut self, path: &[&str], set: &PropertySet) -> Result<EntryId> {
        let bytes = set.to_bytes()?;
        self.put_stream(path, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let set = PropertySet::new(FMTID_SUMMARY_INFORMATION);
        let bytes = set.to_bytes().unwrap();
        assert_eq!(&bytes[0..2], &[0xFE, 0xFF]);
        assert_eq!(read_u32_le(&bytes, 4).unwrap(), OS_VERSION_WIN32);
        assert_eq!(read_u32_le(&bytes, 24).unwrap(), 1);
        assert_eq!(&bytes[28..44], &FMTID_SUMMARY_INFORMATION);
        assert_eq!(read_u32_le(&bytes, 44).unwrap(), 48);
        // Empty section: size 8, no properties
        assert_eq!(read_u32_le(&bytes, 48).unwrap(), 8);
        assert_eq!(bytes.len(), 56);
    }

    #[test]
    fn test_two_sections() {
        let mut set = PropertySet::new(FMTID_DOC_SUMMARY_INFORMATION);
        set.sections[0].set(PID_CODEPAGE, Variant::I2(1252));
        set.sections[0].set(2, Variant::Lpstr("Finance".into()));
        let mut user = Section::new(FMTID_USER_DEFINED_PROPERTIES);
        user.dictionary = Some(vec![(2, "Reviewed".into())]);
        user.set(2, Variant::Bool(true));
        set.sections.push(user);

        let parsed = PropertySet::from_bytes(&set.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, set);
        let user = parsed.section(&FMTID_USER_DEFINED_PROPERTIES).unwrap();
        assert_eq!(user.name_of(2), Some("Reviewed"));
        assert_eq!(user.get(2), Some(&Variant::Bool(true)));
    }

    #[test]
    fn test_rejects_bad_byte_order() {
        let mut bytes = PropertySet::new(FMTID_SUMMARY_INFORMATION)
            .to_bytes()
            .unwrap();
        bytes[0] = 0;
        assert!(matches!(
            PropertySet::from_bytes(&bytes),
            Err(CfbError::MalformedPropertySet(_))
        ));
    }

    #[test]
    fn test_rejects_absurd_section_count() {
        let mut bytes = PropertySet::new(FMTID_SUMMARY_INFORMATION)
            .to_bytes()
            .unwrap();
        bytes[24..28].copy_from_slice(&1000u32.to_le_bytes());
        assert!(PropertySet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = PropertySet::new(FMTID_SUMMARY_INFORMATION)
            .to_bytes()
            .unwrap();
        assert!(matches!(
            PropertySet::from_bytes(&bytes[..50]),
            Err(CfbError::TruncatedInput { .. })
        ));
    }

    fn scalar() -> impl Strategy<Value = Variant> {
        prop_oneof![
            Just(Variant::Empty),
            any::<i8>().prop_map(Variant::I1),
            any::<i16>().prop_map(Variant::I2),
            any::<i32>().prop_map(Variant::I4),
            any::<i64>().prop_map(Variant::I8),
            any::<u8>().prop_map(Variant::UI1),
            any::<u16>().prop_map(Variant::UI2),
            any::<u32>().prop_map(Variant::UI4),
            any::<u64>().prop_map(Variant::UI8),
            any::<bool>().prop_map(Variant::Bool),
            (-1.0e9f64..1.0e9).prop_map(Variant::R8),
            any::<u64>().prop_map(Variant::Filetime),
            "[a-zA-Z0-9 äöüßéÆ€]{0,40}".prop_map(Variant::Lpstr),
            "\\PC{0,20}".prop_map(Variant::Lpwstr),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(Variant::Blob),
            any::<[u8; 16]>().prop_map(Variant::Clsid),
        ]
    }

    fn raw() -> impl Strategy<Value = Variant> {
        proptest::collection::vec(any::<[u8; 4]>(), 0..4).prop_map(|words| Variant::Unknown {
            type_tag: 0x0049,
            bytes: words.concat(),
        })
    }

    fn value() -> impl Strategy<Value = Variant> {
        prop_oneof![
            4 => scalar(),
            1 => raw(),
            1 => proptest::collection::vec(any::<i16>().prop_map(Variant::I2), 0..9)
                .prop_map(|items| Variant::Vector { element_type: VT_I2, items }),
            1 => proptest::collection::vec(
                    scalar().prop_filter("no blobs in vectors", |v| !matches!(v, Variant::Blob(_))),
                    0..6,
                )
                .prop_map(|items| Variant::Vector { element_type: VT_VARIANT, items }),
        ]
    }

    proptest! {
        #[test]
        fn prop_property_set_round_trip(
            values in proptest::collection::vec(value(), 0..12),
            class_id in any::<[u8; 16]>(),
        ) {
            let mut set = PropertySet::new(FMTID_SUMMARY_INFORMATION);
            set.class_id = class_id;
            for (i, value) in values.into_iter().enumerate() {
                set.sections[0].set(i as u32 + 2, value);
            }
            let bytes = set.to_bytes().unwrap();
            prop_assert_eq!(bytes.len() % 4, 0);
            prop_assert_eq!(PropertySet::from_bytes(&bytes).unwrap(), set);
        }

        #[test]
        fn prop_codepage_strings_round_trip_or_fail(text in "\\PC{0,20}", unsigned in any::<bool>()) {
            let mut set = PropertySet::new(FMTID_SUMMARY_INFORMATION);
            let codepage = if unsigned {
                Variant::UI2(1252)
            } else {
                Variant::I2(1252)
            };
            set.sections[0].set(PID_CODEPAGE, codepage);
            set.sections[0].set(2, Variant::Lpstr(text));
            match set.to_bytes() {
                Ok(bytes) => prop_assert_eq!(PropertySet::from_bytes(&bytes).unwrap(), set),
                Err(err) => prop_assert!(matches!(err, CfbError::InvalidArgument(_))),
            }
        }
    }

    #[test]
    fn test_unrepresentable_lpstr_is_an_error() {
        let mut set = PropertySet::new(FMTID_SUMMARY_INFORMATION);
        set.sections[0].set(PID_CODEPAGE, Variant::I2(1252));
        set.sections[0].set(2, Variant::Lpstr("日本".into()));
        assert!(matches!(set.to_bytes(), Err(CfbError::InvalidArgument(_))));
    }
}
