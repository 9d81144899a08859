//! User-defined document properties.
//!
//! The second section of `\u{5}DocumentSummaryInformation` stores properties under
//! arbitrary ids and names them through the section dictionary. [`CustomProperties`]
//! hides the ids and exposes the properties by name.

use log::warn;
use serde::{Deserialize, Serialize};

use super::section::Section;
use super::variant::Variant;
use crate::ole::consts::*;
use crate::ole::error::{CfbError, Result};

/// First id handed out to a custom property.
const FIRST_CUSTOM_ID: u32 = 2;

/// Named custom properties in insertion order.
///
/// Names compare case-insensitively, as dictionary names do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomProperties {
    entries: Vec<(String, Variant)>,
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl CustomProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of the property called `name`.
    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.entries
            .iter()
            .find(|(key, _)| same_name(key, name))
            .map(|(_, value)| value)
    }

    /// Set a property, returning the value it replaces.
    ///
    /// A replaced property keeps its position and its original spelling.
    pub fn insert(&mut self, name: impl Into<String>, value: Variant) -> Option<Variant> {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| same_name(key, &name)) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            },
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove the property called `name`.
    pub fn remove(&mut self, name: &str) -> Option<Variant> {
        let pos = self.entries.iter().position(|(key, _)| same_name(key, name))?;
        Some(self.entries.remove(pos).1)
    }

    /// Properties in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Collect the named properties of a user-defined section.
    ///
    /// The code page and the reserved ids are not custom properties. Properties
    /// without a dictionary name are skipped.
    pub fn from_section(section: &Section) -> Self {
        let mut custom = Self::new();
        for property in &section.properties {
            if property.id == PID_CODEPAGE || property.id & 0x8000_0000 != 0 {
                continue;
            }
            let Some(name) = section.name_of(property.id) else {
                warn!("Custom property {} has no name; skipping", property.id);
                continue;
            };
            if custom.get(name).is_some() {
                warn!("Custom property name {:?} is repeated; keeping the first", name);
                continue;
            }
            custom.entries.push((name.to_string(), property.value.clone()));
        }
        custom
    }

    /// Replace the named properties of `section` with these, numbering them from 2.
    ///
    /// The code page and reserved properties of the section are kept.
    pub fn write_to(&self, section: &mut Section) -> Result<()> {
        if let Some((name, _)) = self.entries.iter().find(|(name, _)| name.is_empty()) {
            return Err(CfbError::InvalidArgument(format!(
                "custom property name {:?} is empty",
                name
            )));
        }
        section
            .properties
            .retain(|p| p.id == PID_CODEPAGE || p.id & 0x8000_0000 != 0);
        let mut dictionary = Vec::with_capacity(self.entries.len());
        for (id, (name, value)) in (FIRST_CUSTOM_ID..).zip(&self.entries) {
            dictionary.push((id, name.clone()));
            section.set(id, value.clone());
        }
        section.dictionary = Some(dictionary);
        Ok(())
    }
}
