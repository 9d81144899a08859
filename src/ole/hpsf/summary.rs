//! Document metadata from the standard property set streams.
//!
//! `\u{5}SummaryInformation` carries title, author, timestamps and counts;
//! `\u{5}DocumentSummaryInformation` carries company, manager, presentation counts and,
//! in its second section, the user-defined properties. [`OleMetadata`] flattens both
//! into optional fields and writes them back with [`CompoundFile::set_metadata`].

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::custom::CustomProperties;
use super::{PropertySet, Section, Variant};
use crate::common::filetime::datetime_to_filetime;
use crate::ole::consts::*;
use crate::ole::error::Result;
use crate::ole::file::CompoundFile;

// SummaryInformation property ids
const PIDSI_TITLE: u32 = 2;
const PIDSI_SUBJECT: u32 = 3;
const PIDSI_AUTHOR: u32 = 4;
const PIDSI_KEYWORDS: u32 = 5;
const PIDSI_COMMENTS: u32 = 6;
const PIDSI_TEMPLATE: u32 = 7;
const PIDSI_LASTAUTHOR: u32 = 8;
const PIDSI_REVNUMBER: u32 = 9;
const PIDSI_EDITTIME: u32 = 10;
const PIDSI_LASTPRINTED: u32 = 11;
const PIDSI_CREATE_DTM: u32 = 12;
const PIDSI_LASTSAVE_DTM: u32 = 13;
const PIDSI_PAGECOUNT: u32 = 14;
const PIDSI_WORDCOUNT: u32 = 15;
const PIDSI_CHARCOUNT: u32 = 16;
const PIDSI_APPNAME: u32 = 18;
const PIDSI_DOC_SECURITY: u32 = 19;

// DocumentSummaryInformation property ids
const PIDDSI_CATEGORY: u32 = 2;
const PIDDSI_PRESFORMAT: u32 = 3;
const PIDDSI_BYTECOUNT: u32 = 4;
const PIDDSI_LINECOUNT: u32 = 5;
const PIDDSI_PARCOUNT: u32 = 6;
const PIDDSI_SLIDECOUNT: u32 = 7;
const PIDDSI_NOTECOUNT: u32 = 8;
const PIDDSI_HIDDENCOUNT: u32 = 9;
const PIDDSI_MMCLIPCOUNT: u32 = 10;
const PIDDSI_SCALE: u32 = 11;
const PIDDSI_MANAGER: u32 = 14;
const PIDDSI_COMPANY: u32 = 15;
const PIDDSI_LINKSDIRTY: u32 = 16;
const PIDDSI_CCHWITHSPACES: u32 = 17;
const PIDDSI_HYPERLINKSCHANGED: u32 = 22;
const PIDDSI_VERSION: u32 = 23;
const PIDDSI_CONTENTTYPE: u32 = 26;
const PIDDSI_CONTENTSTATUS: u32 = 27;
const PIDDSI_LANGUAGE: u32 = 28;
const PIDDSI_DOCVERSION: u32 = 29;

/// Metadata extracted from the standard property set streams.
///
/// Every field is optional; a document that lacks a property (or both streams) simply
/// leaves it `None`. Setting a field and calling [`CompoundFile::set_metadata`] writes
/// it; clearing it removes the property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OleMetadata {
    // SummaryInformation properties
    pub codepage: Option<u16>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub author: Option<String>,
    pub keywords: Option<String>,
    pub comments: Option<String>,
    pub template: Option<String>,
    pub last_saved_by: Option<String>,
    pub revision_number: Option<String>,
    /// Total editing time in 100ns ticks
    pub edit_time: Option<u64>,
    pub last_printed: Option<DateTime<Utc>>,
    pub create_time: Option<DateTime<Utc>>,
    pub last_saved_time: Option<DateTime<Utc>>,
    pub num_pages: Option<u32>,
    pub num_words: Option<u32>,
    pub num_chars: Option<u32>,
    pub creating_application: Option<String>,
    pub security: Option<u32>,

    // DocumentSummaryInformation properties
    pub category: Option<String>,
    pub presentation_format: Option<String>,
    pub byte_count: Option<u32>,
    pub line_count: Option<u32>,
    pub paragraph_count: Option<u32>,
    pub slide_count: Option<u32>,
    pub note_count: Option<u32>,
    pub hidden_slide_count: Option<u32>,
    pub multimedia_clip_count: Option<u32>,
    pub scale_crop: Option<bool>,
    pub manager: Option<String>,
    pub company: Option<String>,
    pub links_dirty: Option<bool>,
    pub char_count_with_spaces: Option<u32>,
    pub hyperlinks_changed: Option<bool>,
    /// Major version in the high word, minor in the low word
    pub application_version: Option<u32>,
    pub content_type: Option<String>,
    pub content_status: Option<String>,
    pub language: Option<String>,
    pub document_version: Option<String>,

    /// User-defined properties
    pub custom: CustomProperties,
}

fn string(value: Option<&Variant>) -> Option<String> {
    value
        .and_then(Variant::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn count(value: Option<&Variant>) -> Option<u32> {
    value
        .and_then(Variant::as_i64)
        .and_then(|v| u32::try_from(v).ok())
}

fn flag(value: Option<&Variant>) -> Option<bool> {
    match value {
        Some(Variant::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn ticks(value: Option<&Variant>) -> Option<u64> {
    match value {
        Some(Variant::Filetime(t)) => Some(*t),
        _ => None,
    }
}

fn time(value: Option<&Variant>) -> Option<DateTime<Utc>> {
    value.and_then(Variant::as_datetime)
}

/// Set `id` to `value`, or remove it when `value` is `None`.
fn put(section: &mut Section, id: u32, value: Option<Variant>) {
    match value {
        Some(value) => section.set(id, value),
        None => {
            section.remove(id);
        },
    }
}

fn put_string(section: &mut Section, id: u32, value: &Option<String>) {
    let value = value.as_ref().filter(|s| !s.is_empty());
    put(section, id, value.map(|s| Variant::Lpstr(s.clone())));
}

fn put_count(section: &mut Section, id: u32, value: Option<u32>) {
    put(
        section,
        id,
        value.map(|v| i32::try_from(v).map(Variant::I4).unwrap_or(Variant::UI4(v))),
    );
}

fn put_flag(section: &mut Section, id: u32, value: Option<bool>) {
    put(section, id, value.map(Variant::Bool));
}

fn put_time(section: &mut Section, id: u32, value: &Option<DateTime<Utc>>) {
    put(section, id, value.as_ref().map(|t| Variant::Filetime(datetime_to_filetime(t))));
}

/// The section of `set` with `format_id`, created in front if missing.
fn leading_section<'a>(set: &'a mut PropertySet, format_id: &[u8; 16]) -> &'a mut Section {
    let pos = match set.sections.iter().position(|s| &s.format_id == format_id) {
        Some(pos) => pos,
        None => {
            set.sections.insert(0, Section::new(*format_id));
            0
        },
    };
    &mut set.sections[pos]
}

impl OleMetadata {
    /// Collect metadata from decoded SummaryInformation and DocumentSummaryInformation sets.
    pub fn from_property_sets(
        summary: Option<&PropertySet>,
        doc_summary: Option<&PropertySet>,
    ) -> Self {
        let mut metadata = OleMetadata::default();

        if let Some(section) = summary.and_then(|s| s.section(&FMTID_SUMMARY_INFORMATION)) {
            metadata.codepage = section.get(PID_CODEPAGE).map(|_| section.codepage());
            metadata.title = string(section.get(PIDSI_TITLE));
            metadata.subject = string(section.get(PIDSI_SUBJECT));
            metadata.author = string(section.get(PIDSI_AUTHOR));
            metadata.keywords = string(section.get(PIDSI_KEYWORDS));
            metadata.comments = string(section.get(PIDSI_COMMENTS));
            metadata.template = string(section.get(PIDSI_TEMPLATE));
            metadata.last_saved_by = string(section.get(PIDSI_LASTAUTHOR));
            metadata.revision_number = string(section.get(PIDSI_REVNUMBER));
            metadata.edit_time = ticks(section.get(PIDSI_EDITTIME));
            metadata.last_printed = time(section.get(PIDSI_LASTPRINTED));
            metadata.create_time = time(section.get(PIDSI_CREATE_DTM));
            metadata.last_saved_time = time(section.get(PIDSI_LASTSAVE_DTM));
            metadata.num_pages = count(section.get(PIDSI_PAGECOUNT));
            metadata.num_words = count(section.get(PIDSI_WORDCOUNT));
            metadata.num_chars = count(section.get(PIDSI_CHARCOUNT));
            metadata.creating_application = string(section.get(PIDSI_APPNAME));
            metadata.security = count(section.get(PIDSI_DOC_SECURITY));
        }

        if let Some(set) = doc_summary {
            if let Some(section) = set.section(&FMTID_DOC_SUMMARY_INFORMATION) {
                metadata.category = string(section.get(PIDDSI_CATEGORY));
                metadata.presentation_format = string(section.get(PIDDSI_PRESFORMAT));
                metadata.byte_count = count(section.get(PIDDSI_BYTECOUNT));
                metadata.line_count = count(section.get(PIDDSI_LINECOUNT));
                metadata.paragraph_count = count(section.get(PIDDSI_PARCOUNT));
                metadata.slide_count = count(section.get(PIDDSI_SLIDECOUNT));
                metadata.note_count = count(section.get(PIDDSI_NOTECOUNT));
                metadata.hidden_slide_count = count(section.get(PIDDSI_HIDDENCOUNT));
                metadata.multimedia_clip_count = count(section.get(PIDDSI_MMCLIPCOUNT));
                metadata.scale_crop = flag(section.get(PIDDSI_SCALE));
                metadata.manager = string(section.get(PIDDSI_MANAGER));
                metadata.company = string(section.get(PIDDSI_COMPANY));
                metadata.links_dirty = flag(section.get(PIDDSI_LINKSDIRTY));
                metadata.char_count_with_spaces = count(section.get(PIDDSI_CCHWITHSPACES));
                metadata.hyperlinks_changed = flag(section.get(PIDDSI_HYPERLINKSCHANGED));
                metadata.application_version = count(section.get(PIDDSI_VERSION));
                metadata.content_type = string(section.get(PIDDSI_CONTENTTYPE));
                metadata.content_status = string(section.get(PIDDSI_CONTENTSTATUS));
                metadata.language = string(section.get(PIDDSI_LANGUAGE));
                metadata.document_version = string(section.get(PIDDSI_DOCVERSION));
            }
            if let Some(section) = set.section(&FMTID_USER_DEFINED_PROPERTIES) {
                metadata.custom = CustomProperties::from_section(section);
            }
        }

        metadata
    }

    /// Code page for new strings: the explicit one, else the section's, else UTF-16.
    fn codepage_for(&self, section: &Section) -> u16 {
        self.codepage
            .or_else(|| section.get(PID_CODEPAGE).map(|_| section.codepage()))
            .unwrap_or(CODEPAGE_UTF16)
    }

    /// Write the SummaryInformation fields into `set`, keeping properties not modelled here.
    pub fn apply_summary(&self, set: &mut PropertySet) {
        let section = leading_section(set, &FMTID_SUMMARY_INFORMATION);
        let codepage = self.codepage_for(section);
        section.set(PID_CODEPAGE, Variant::I2(codepage as i16));
        put_string(section, PIDSI_TITLE, &self.title);
        put_string(section, PIDSI_SUBJECT, &self.subject);
        put_string(section, PIDSI_AUTHOR, &self.author);
        put_string(section, PIDSI_KEYWORDS, &self.keywords);
        put_string(section, PIDSI_COMMENTS, &self.comments);
        put_string(section, PIDSI_TEMPLATE, &self.template);
        put_string(section, PIDSI_LASTAUTHOR, &self.last_saved_by);
        put_string(section, PIDSI_REVNUMBER, &self.revision_number);
        put(section, PIDSI_EDITTIME, self.edit_time.map(Variant::Filetime));
        put_time(section, PIDSI_LASTPRINTED, &self.last_printed);
        put_time(section, PIDSI_CREATE_DTM, &self.create_time);
        put_time(section, PIDSI_LASTSAVE_DTM, &self.last_saved_time);
        put_count(section, PIDSI_PAGECOUNT, self.num_pages);
        put_count(section, PIDSI_WORDCOUNT, self.num_words);
        put_count(section, PIDSI_CHARCOUNT, self.num_chars);
        put_string(section, PIDSI_APPNAME, &self.creating_application);
        put_count(section, PIDSI_DOC_SECURITY, self.security);
    }

    /// Write the DocumentSummaryInformation fields and custom properties into `set`.
    ///
    /// An empty custom property map removes the user-defined section.
    pub fn apply_doc_summary(&self, set: &mut PropertySet) -> Result<()> {
        let section = leading_section(set, &FMTID_DOC_SUMMARY_INFORMATION);
        let codepage = self.codepage_for(section);
        section.set(PID_CODEPAGE, Variant::I2(codepage as i16));
        put_string(section, PIDDSI_CATEGORY, &self.category);
        put_string(section, PIDDSI_PRESFORMAT, &self.presentation_format);
        put_count(section, PIDDSI_BYTECOUNT, self.byte_count);
        put_count(section, PIDDSI_LINECOUNT, self.line_count);
        put_count(section, PIDDSI_PARCOUNT, self.paragraph_count);
        put_count(section, PIDDSI_SLIDECOUNT, self.slide_count);
        put_count(section, PIDDSI_NOTECOUNT, self.note_count);
        put_count(section, PIDDSI_HIDDENCOUNT, self.hidden_slide_count);
        put_count(section, PIDDSI_MMCLIPCOUNT, self.multimedia_clip_count);
        put_flag(section, PIDDSI_SCALE, self.scale_crop);
        put_string(section, PIDDSI_MANAGER, &self.manager);
        put_string(section, PIDDSI_COMPANY, &self.company);
        put_flag(section, PIDDSI_LINKSDIRTY, self.links_dirty);
        put_count(section, PIDDSI_CCHWITHSPACES, self.char_count_with_spaces);
        put_flag(section, PIDDSI_HYPERLINKSCHANGED, self.hyperlinks_changed);
        put_count(section, PIDDSI_VERSION, self.application_version);
        put_string(section, PIDDSI_CONTENTTYPE, &self.content_type);
        put_string(section, PIDDSI_CONTENTSTATUS, &self.content_status);
        put_string(section, PIDDSI_LANGUAGE, &self.language);
        put_string(section, PIDDSI_DOCVERSION, &self.document_version);

        if self.custom.is_empty() {
            set.sections
                .retain(|s| s.format_id != FMTID_USER_DEFINED_PROPERTIES);
            return Ok(());
        }
        let user = match set
            .sections
            .iter()
            .position(|s| s.format_id == FMTID_USER_DEFINED_PROPERTIES)
        {
            Some(pos) => &mut set.sections[pos],
            None => {
                set.sections
                    .push(Section::new(FMTID_USER_DEFINED_PROPERTIES));
                let last = set.sections.len() - 1;
                &mut set.sections[last]
            },
        };
        if user.get(PID_CODEPAGE).is_none() {
            user.set(PID_CODEPAGE, Variant::I2(codepage as i16));
        }
        self.custom.write_to(user)
    }
}

impl CompoundFile {
    /// Read the standard document metadata.
    ///
    /// Missing streams leave their fields empty. A stream that exists but does not
    /// decode is skipped with a warning.
    pub fn metadata(&self) -> Result<OleMetadata> {
        let load = |name: &str| -> Option<PropertySet> {
            if !self.exists(&[name]) {
                return None;
            }
            match self.read_property_set(&[name]) {
                Ok(set) => Some(set),
                Err(err) => {
                    warn!("Ignoring unreadable property set {:?}: {}", name, err);
                    None
                },
            }
        };
        let summary = load(SUMMARY_INFORMATION_STREAM);
        let doc_summary = load(DOC_SUMMARY_INFORMATION_STREAM);
        Ok(OleMetadata::from_property_sets(
            summary.as_ref(),
            doc_summary.as_ref(),
        ))
    }

    /// Write `metadata` into both summary streams, creating them if missing.
    ///
    /// Properties the metadata does not model (thumbnails, heading pairs, other
    /// sections) are kept. Strings are stored in the code page of `metadata.codepage`,
    /// else the existing section's, else UTF-16; a string the code page cannot hold is
    /// an `InvalidArgument` error and leaves both streams unchanged.
    pub fn set_metadata(&mut self, metadata: &OleMetadata) -> Result<()> {
        let mut summary = self.existing_set(SUMMARY_INFORMATION_STREAM, FMTID_SUMMARY_INFORMATION)?;
        let mut doc_summary =
            self.existing_set(DOC_SUMMARY_INFORMATION_STREAM, FMTID_DOC_SUMMARY_INFORMATION)?;
        metadata.apply_summary(&mut summary);
        metadata.apply_doc_summary(&mut doc_summary)?;

        // Encode both before touching either stream
        let summary_bytes = summary.to_bytes()?;
        let doc_summary_bytes = doc_summary.to_bytes()?;
        self.put_stream(&[SUMMARY_INFORMATION_STREAM], &summary_bytes)?;
        self.put_stream(&[DOC_SUMMARY_INFORMATION_STREAM], &doc_summary_bytes)?;
        debug!(
            "Wrote metadata ({} custom properties)",
            metadata.custom.len()
        );
        Ok(())
    }

    fn existing_set(&self, name: &str, format_id: [u8; 16]) -> Result<PropertySet> {
        if self.exists(&[name]) {
            self.read_property_set(&[name])
        } else {
            Ok(PropertySet::new(format_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ole::error::CfbError;

    #[test]
    fn test_metadata_from_streams() {
        let created = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut summary = PropertySet::new(FMTID_SUMMARY_INFORMATION);
        let section = &mut summary.sections[0];
        section.set(PID_CODEPAGE, Variant::I2(1252));
        section.set(PIDSI_TITLE, Variant::Lpstr("Budget".into()));
        section.set(PIDSI_AUTHOR, Variant::Lpstr("J. Doe".into()));
        section.set(PIDSI_COMMENTS, Variant::Lpstr(String::new()));
        section.set(PIDSI_CREATE_DTM, Variant::Filetime(datetime_to_filetime(&created)));
        section.set(PIDSI_PAGECOUNT, Variant::I4(12));
        section.set(PIDSI_DOC_SECURITY, Variant::I4(-1));

        let mut doc = PropertySet::new(FMTID_DOC_SUMMARY_INFORMATION);
        doc.sections[0].set(PIDDSI_COMPANY, Variant::Lpwstr("Acme".into()));
        doc.sections[0].set(PIDDSI_SLIDECOUNT, Variant::I4(30));
        doc.sections[0].set(PIDDSI_LINKSDIRTY, Variant::Bool(true));
        let mut user = Section::new(FMTID_USER_DEFINED_PROPERTIES);
        user.dictionary = Some(vec![(2, "Client".into())]);
        user.set(2, Variant::Lpstr("Initech".into()));
        doc.sections.push(user);

        let mut cfb = CompoundFile::create();
        cfb.write_property_set(&[SUMMARY_INFORMATION_STREAM], &summary)
            .unwrap();
        cfb.write_property_set(&[DOC_SUMMARY_INFORMATION_STREAM], &doc)
            .unwrap();
        let bytes = cfb.commit().unwrap();

        let cfb = CompoundFile::from_bytes(&bytes).unwrap();
        let meta = cfb.metadata().unwrap();
        assert_eq!(meta.codepage, Some(1252));
        assert_eq!(meta.title.as_deref(), Some("Budget"));
        assert_eq!(meta.author.as_deref(), Some("J. Doe"));
        assert_eq!(meta.comments, None);
        assert_eq!(meta.create_time, Some(created));
        assert_eq!(meta.num_pages, Some(12));
        assert_eq!(meta.security, None);
        assert_eq!(meta.company.as_deref(), Some("Acme"));
        assert_eq!(meta.slide_count, Some(30));
        assert_eq!(meta.links_dirty, Some(true));
        assert_eq!(meta.category, None);
        assert_eq!(
            meta.custom.get("client"),
            Some(&Variant::Lpstr("Initech".into()))
        );
    }

    #[test]
    fn test_metadata_without_streams() {
        let cfb = CompoundFile::create();
        assert_eq!(cfb.metadata().unwrap(), OleMetadata::default());
    }

    #[test]
    fn test_unreadable_stream_is_skipped() {
        let mut cfb = CompoundFile::create();
        cfb.put_stream(&[SUMMARY_INFORMATION_STREAM], b"garbage").unwrap();
        assert_eq!(cfb.metadata().unwrap(), OleMetadata::default());
    }

    #[test]
    fn test_set_metadata_round_trip() {
        let saved = DateTime::parse_from_rfc3339("2024-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut meta = OleMetadata {
            codepage: Some(CODEPAGE_UTF16),
            title: Some("Jahresbericht für 2024".into()),
            author: Some("山田".into()),
            edit_time: Some(36_000_000_000),
            last_saved_time: Some(saved),
            num_words: Some(3_000_000_000),
            presentation_format: Some("On-screen Show (4:3)".into()),
            slide_count: Some(12),
            hidden_slide_count: Some(1),
            scale_crop: Some(false),
            application_version: Some(0x0010_0000),
            language: Some("de-DE".into()),
            ..OleMetadata::default()
        };
        meta.custom.insert("Project", Variant::Lpstr("Apollo".into()));
        meta.custom.insert("Approved", Variant::Bool(true));
        meta.custom.insert("Budget", Variant::R8(1.5e6));

        let mut cfb = CompoundFile::create();
        cfb.set_metadata(&meta).unwrap();
        let bytes = cfb.commit().unwrap();
        let mut cfb = CompoundFile::from_bytes(&bytes).unwrap();
        assert_eq!(cfb.metadata().unwrap(), meta);

        // Clearing fields removes them; unmodelled properties survive
        let mut summary = cfb.read_property_set(&[SUMMARY_INFORMATION_STREAM]).unwrap();
        summary.sections[0].set(17, Variant::Blob(vec![1, 2, 3, 4]));
        cfb.write_property_set(&[SUMMARY_INFORMATION_STREAM], &summary)
            .unwrap();

        meta.author = None;
        meta.custom.remove("approved");
        cfb.set_metadata(&meta).unwrap();
        let reread = cfb.metadata().unwrap();
        assert_eq!(reread.author, None);
        assert_eq!(reread.custom.len(), 2);
        assert_eq!(reread, meta);
        let summary = cfb.read_property_set(&[SUMMARY_INFORMATION_STREAM]).unwrap();
        assert_eq!(
            summary.sections[0].get(17),
            Some(&Variant::Blob(vec![1, 2, 3, 4]))
        );

        meta.custom = CustomProperties::new();
        cfb.set_metadata(&meta).unwrap();
        let doc = cfb.read_property_set(&[DOC_SUMMARY_INFORMATION_STREAM]).unwrap();
        assert!(doc.section(&FMTID_USER_DEFINED_PROPERTIES).is_none());
    }

    #[test]
    fn test_set_metadata_keeps_existing_codepage() {
        let mut summary = PropertySet::new(FMTID_SUMMARY_INFORMATION);
        summary.sections[0].set(PID_CODEPAGE, Variant::I2(1252));
        let mut cfb = CompoundFile::create();
        cfb.write_property_set(&[SUMMARY_INFORMATION_STREAM], &summary)
            .unwrap();

        let meta = OleMetadata {
            title: Some("Grüße".into()),
            ..OleMetadata::default()
        };
        cfb.set_metadata(&meta).unwrap();
        let reread = cfb.metadata().unwrap();
        assert_eq!(reread.codepage, Some(1252));
        assert_eq!(reread.title.as_deref(), Some("Grüße"));
    }

    #[test]
    fn test_set_metadata_rejects_unrepresentable_text() {
        let mut cfb = CompoundFile::create();
        let meta = OleMetadata {
            codepage: Some(1252),
            title: Some("日本".into()),
            ..OleMetadata::default()
        };
        assert!(matches!(
            cfb.set_metadata(&meta),
            Err(CfbError::InvalidArgument(_))
        ));
        assert!(!cfb.exists(&[SUMMARY_INFORMATION_STREAM]));
        assert!(!cfb.exists(&[DOC_SUMMARY_INFORMATION_STREAM]));
    }
}
