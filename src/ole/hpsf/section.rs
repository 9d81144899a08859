//! Property set sections.
//!
//! A section is a size, a property count, a list of `(id, offset)` pairs relative to the
//! start of the section, and the values themselves. Property 0 is the dictionary that
//! names user-defined properties; property 1 is the code page used for narrow strings.

use std::collections::HashSet;

use log::warn;

use super::variant::{Variant, read_typed, write_typed};
use crate::common::binary::{align4, pad_to_4, read_bytes, read_u32_le, write_u32_le};
use crate::ole::codepage::{decode_bytes, encode_str, terminator_len};
use crate::ole::consts::*;
use crate::ole::error::{CfbError, Result};

/// One property of a section.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub id: u32,
    pub value: Variant,
}

impl Property {
    pub fn new(id: u32, value: Variant) -> Self {
        Self { id, value }
    }
}

/// A section: the properties stored under one format id.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub format_id: [u8; 16],
    /// Names of user-defined properties (property 0), in stored order
    pub dictionary: Option<Vec<(u32, String)>>,
    /// Properties other than the dictionary, in stored order
    pub properties: Vec<Property>,
}

impl Section {
    /// Create an empty section.
    pub fn new(format_id: [u8; 16]) -> Self {
        Self {
            format_id,
            dictionary: None,
            properties: Vec::new(),
        }
    }

    /// Value of property `id`.
    pub fn get(&self, id: u32) -> Option<&Variant> {
        self.properties
            .iter()
            .find(|p| p.id == id)
            .map(|p| &p.value)
    }

    /// Set property `id`, replacing an existing value in place.
    pub fn set(&mut self, id: u32, value: Variant) {
        match self.properties.iter_mut().find(|p| p.id == id) {
            Some(property) => property.value = value,
            None => self.properties.push(Property::new(id, value)),
        }
    }

    /// Remove property `id`, returning its value.
    pub fn remove(&mut self, id: u32) -> Option<Variant> {
        let pos = self.properties.iter().position(|p| p.id == id)?;
        Some(self.properties.remove(pos).value)
    }

    /// Code page for narrow strings; Windows-1252 when the section has none.
    pub fn codepage(&self) -> u16 {
        self.get(PID_CODEPAGE)
            .and_then(codepage_value)
            .unwrap_or(CODEPAGE_DEFAULT)
    }

    /// Dictionary name of property `id`.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.dictionary
            .as_ref()?
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, name)| name.as_str())
    }

    /// Decode the section starting at `offset` of a property set stream.
    pub(crate) fn parse(data: &[u8], offset: usize, format_id: [u8; 16]) -> Result<Self> {
        let size = read_u32_le(data, offset)? as usize;
        let section = read_bytes(data, offset, size)?;
        let count = read_u32_le(section, 4)? as usize;
        if count > (size.saturating_sub(8)) / 8 {
            return Err(CfbError::MalformedPropertySet(format!(
                "section of {} bytes claims {} properties",
                size, count
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let id = read_u32_le(section, 8 + i * 8)?;
            let value_offset = read_u32_le(section, 12 + i * 8)? as usize;
            if value_offset >= size {
                return Err(CfbError::MalformedPropertySet(format!(
                    "property {} at offset {} lies outside the section ({} bytes)",
                    id, value_offset, size
                )));
            }
            entries.push((id, value_offset));
        }

        // A value runs until the next value in the section, or the section end.
        let mut starts: Vec<usize> = entries.iter().map(|&(_, at)| at).collect();
        starts.sort_unstable();
        starts.dedup();
        let end_of = |at: usize| -> usize {
            starts
                .iter()
                .copied()
                .find(|&other| other > at)
                .unwrap_or(size)
        };

        // The code page property is a plain integer, so it decodes without one
        let codepage = match entries.iter().find(|(id, _)| *id == PID_CODEPAGE) {
            Some(&(_, at)) => codepage_value(&read_typed(section, at, end_of(at), CODEPAGE_DEFAULT)?)
                .unwrap_or(CODEPAGE_DEFAULT),
            None => CODEPAGE_DEFAULT,
        };

        let mut dictionary = None;
        let mut properties = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for &(id, at) in &entries {
            if !seen.insert(id) {
                warn!("Section repeats property {}; keeping the first", id);
                continue;
            }
            if id == PID_DICTIONARY {
                dictionary = Some(parse_dictionary(section, at, codepage)?);
            } else {
                properties.push(Property::new(id, read_typed(section, at, end_of(at), codepage)?));
            }
        }

        Ok(Self {
            format_id,
            dictionary,
            properties,
        })
    }

    /// Encode the section (size, property list, values).
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let codepage = self.codepage();
        let mut values: Vec<(u32, Vec<u8>)> = Vec::with_capacity(self.properties.len() + 1);

        if let Some(dictionary) = &self.dictionary {
            values.push((PID_DICTIONARY, encode_dictionary(dictionary, codepage)?));
        }
        for property in &self.properties {
            if property.id == PID_DICTIONARY {
                return Err(CfbError::InvalidArgument(
                    "property id 0 is reserved for the dictionary".to_string(),
                ));
            }
            let mut buf = Vec::new();
            write_typed(&mut buf, &property.value, codepage)?;
            values.push((property.id, buf));
        }

        let list_len = 8 + values.len() * 8;
        let size = list_len + values.iter().map(|(_, v)| v.len()).sum::<usize>();
        let mut out = Vec::with_capacity(size);
        write_u32_le(&mut out, size as u32);
        write_u32_le(&mut out, values.len() as u32);
        let mut offset = list_len;
        for (id, value) in &values {
            write_u32_le(&mut out, *id);
            write_u32_le(&mut out, offset as u32);
            offset += value.len();
        }
        for (_, value) in values {
            out.extend_from_slice(&value);
        }
        Ok(out)
    }
}

/// Code page carried by a `PID_CODEPAGE` value, stored as either `VT_I2` or `VT_UI2`.
fn codepage_value(value: &Variant) -> Option<u16> {
    match *value {
        Variant::I2(cp) => Some(cp as u16),
        Variant::UI2(cp) => Some(cp),
        _ => None,
    }
}

/// Decode a dictionary at `offset` of a section.
///
/// Entry lengths count characters including the terminator. In UTF-16 sections every
/// entry is padded to four bytes.
fn parse_dictionary(section: &[u8], offset: usize, codepage: u16) -> Result<Vec<(u32, String)>> {
    let count = read_u32_le(section, offset)? as usize;
    if count > section.len().saturating_sub(offset + 4) / 8 {
        return Err(CfbError::MalformedPropertySet(format!(
            "dictionary claims {} entries",
            count
        )));
    }
    let unit = terminator_len(codepage);
    let mut pos = offset + 4;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let id = read_u32_le(section, pos)?;
        let chars = read_u32_le(section, pos + 4)? as usize;
        let len = chars
            .checked_mul(unit)
            .ok_or_else(|| CfbError::MalformedPropertySet("dictionary entry too long".into()))?;
        let name = decode_bytes(read_bytes(section, pos + 8, len)?, codepage);
        pos += 8 + len;
        if codepage == CODEPAGE_UTF16 {
            pos = offset + align4(pos - offset);
        }
        entries.push((id, name));
    }
    Ok(entries)
}

fn encode_dictionary(entries: &[(u32, String)], codepage: u16) -> Result<Vec<u8>> {
    let unit = terminator_len(codepage);
    let mut out = Vec::new();
    write_u32_le(&mut out, entries.len() as u32);
    for (id, name) in entries {
        let mut bytes = encode_str(name, codepage)?;
        bytes.resize(bytes.len() + unit, 0);
        write_u32_le(&mut out, *id);
        write_u32_le(&mut out, (bytes.len() / unit) as u32);
        out.extend_from_slice(&bytes);
        if codepage == CODEPAGE_UTF16 {
            pad_to_4(&mut out);
        }
    }
    pad_to_4(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(section: &Section) -> Section {
        let bytes = section.to_bytes().unwrap();
        assert_eq!(bytes.len() % 4, 0);
        Section::parse(&bytes, 0, section.format_id).unwrap()
    }

    #[test]
    fn test_layout() {
        let mut section = Section::new(FMTID_SUMMARY_INFORMATION);
        section.set(PID_CODEPAGE, Variant::I2(1252));
        section.set(2, Variant::Lpstr("Title".into()));
        let bytes = section.to_bytes().unwrap();

        // size, count, two (id, offset) pairs, I2 (8 bytes), LPSTR (4 + 4 + 8)
        assert_eq!(read_u32_le(&bytes, 0).unwrap() as usize, bytes.len());
        assert_eq!(bytes.len(), 8 + 16 + 8 + 16);
        assert_eq!(read_u32_le(&bytes, 4).unwrap(), 2);
        assert_eq!(read_u32_le(&bytes, 12).unwrap(), 24);
        assert_eq!(read_u32_le(&bytes, 20).unwrap(), 32);
    }

    #[test]
    fn test_round_trip_with_dictionary() {
        for codepage in [CODEPAGE_DEFAULT, CODEPAGE_UTF16] {
            let mut section = Section::new(FMTID_USER_DEFINED_PROPERTIES);
            section.dictionary = Some(vec![(2, "Client".into()), (3, "Ünïcode name".into())]);
            section.set(PID_CODEPAGE, Variant::I2(codepage as i16));
            section.set(2, Variant::Lpstr("Acme".into()));
            section.set(3, Variant::I4(42));

            let parsed = reparse(&section);
            assert_eq!(parsed, section);
            assert_eq!(parsed.name_of(3), Some("Ünïcode name"));
            assert_eq!(parsed.codepage(), codepage);
        }
    }

    #[test]
    fn test_unsigned_codepage_honoured() {
        let mut section = Section::new(FMTID_SUMMARY_INFORMATION);
        section.set(PID_CODEPAGE, Variant::UI2(CODEPAGE_UTF16));
        section.set(2, Variant::Lpstr("Title".into()));
        let bytes = section.to_bytes().unwrap();
        // "Title" plus terminator as UTF-16
        assert_eq!(read_u32_le(&bytes, 32 + 4).unwrap(), 12);

        let parsed = reparse(&section);
        assert_eq!(parsed.codepage(), CODEPAGE_UTF16);
        assert_eq!(parsed.get(2), Some(&Variant::Lpstr("Title".into())));
        assert_eq!(parsed, section);
    }

    #[test]
    fn test_unrepresentable_dictionary_name_rejected() {
        let mut section = Section::new(FMTID_USER_DEFINED_PROPERTIES);
        section.set(PID_CODEPAGE, Variant::I2(1252));
        section.dictionary = Some(vec![(2, "日本".into())]);
        section.set(2, Variant::I4(1));
        assert!(matches!(
            section.to_bytes(),
            Err(CfbError::InvalidArgument(_))
        ));

        section.set(PID_CODEPAGE, Variant::I2(CODEPAGE_UTF16 as i16));
        assert_eq!(reparse(&section).name_of(2), Some("日本"));
    }

    #[test]
    fn test_unknown_value_runs_to_next_offset() {
        let mut section = Section::new(FMTID_SUMMARY_INFORMATION);
        section.set(
            5,
            Variant::Unknown {
                type_tag: 0x0049,
                bytes: vec![9, 9, 9, 9, 8, 8, 8, 8],
            },
        );
        section.set(6, Variant::UI4(1));
        let parsed = reparse(&section);
        assert_eq!(parsed, section);
    }

    #[test]
    fn test_reserved_id_rejected() {
        let mut section = Section::new(FMTID_SUMMARY_INFORMATION);
        section.set(PID_DICTIONARY, Variant::I4(1));
        assert!(matches!(
            section.to_bytes(),
            Err(CfbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_offset_outside_section() {
        let mut bytes = Vec::new();
        write_u32_le(&mut bytes, 16);
        write_u32_le(&mut bytes, 1);
        write_u32_le(&mut bytes, 2);
        write_u32_le(&mut bytes, 64);
        assert!(matches!(
            Section::parse(&bytes, 0, FMTID_SUMMARY_INFORMATION),
            Err(CfbError::MalformedPropertySet(_))
        ));
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut section = Section::new(FMTID_SUMMARY_INFORMATION);
        section.set(2, Variant::I4(1));
        section.set(3, Variant::I4(2));
        section.set(2, Variant::I4(3));
        assert_eq!(section.properties[0], Property::new(2, Variant::I4(3)));
        assert_eq!(section.remove(3), Some(Variant::I4(2)));
        assert_eq!(section.get(3), None);
    }
}
