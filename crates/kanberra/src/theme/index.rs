//! `index.theme` parsing
//!
//! Two steps, kept separate from the inheritance walk:
//!
//! 1. [`IndexDocument::parse`] turns the text into sections of key/value
//!    entries, with no interpretation.
//! 2. [`ThemeIndex::from_document`] reads the keys a sound theme cares
//!    about and validates them.
//!
//! ```text
//! [Sound Theme]
//! Name=Example
//! Inherits=freedesktop
//! Directories=stereo,5.1
//!
//! [5.1]
//! OutputProfile=5.1
//! ```

use std::collections::HashMap;

use crate::error::{KaError, KaResult};

/// Section holding the theme-wide keys
pub const THEME_SECTION: &str = "Sound Theme";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

/// Raw section → key → value form of an index file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDocument {
    pub sections: Vec<IndexSection>,
}

impl IndexDocument {
    /// Parse index text. `#` starts a comment anywhere on a line; entries
    /// before the first section header are ignored.
    pub fn parse(text: &str) -> Self {
        let mut doc = IndexDocument::default();

        for raw in text.lines() {
            let line = match raw.find(|c| c == '#' || c == '\r') {
                Some(end) => &raw[..end],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
                doc.sections.push(IndexSection {
                    name: line[1..line.len() - 1].to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if let Some(section) = doc.sections.last_mut() {
                section
                    .entries
                    .push((key.trim().to_string(), value.trim().to_string()));
            }
        }

        doc
    }

    /// Every value of `key` across all sections named `section`, in file order
    pub fn values<'a>(&'a self, section: &'a str, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.sections
            .iter()
            .filter(move |s| s.name == section)
            .flat_map(|s| s.entries.iter())
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Split a `Directories=`/`Inherits=` list on commas and spaces
pub fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split([',', ' ']).filter(|s| !s.is_empty())
}

/// The validated sound-theme view of an index document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThemeIndex {
    pub inherits: Vec<String>,
    pub directories: Vec<String>,
    /// Output profile per directory, for directories that declare one
    pub profiles: HashMap<String, String>,
}

impl ThemeIndex {
    pub fn from_document(doc: &IndexDocument) -> KaResult<Self> {
        let mut index = ThemeIndex::default();

        let mut inherits = doc.values(THEME_SECTION, "Inherits");
        if let Some(list) = inherits.next() {
            if inherits.next().is_some() {
                return Err(KaError::Corrupt);
            }
            index.inherits = split_list(list).map(str::to_string).collect();
        }

        for list in doc.values(THEME_SECTION, "Directories") {
            for dir in split_list(list) {
                if !index.directories.iter().any(|d| d == dir) {
                    index.directories.push(dir.to_string());
                }
            }
        }

        for dir in &index.directories {
            for profile in doc.values(dir, "OutputProfile") {
                match index.profiles.get(dir) {
                    Some(existing) if existing != profile => return Err(KaError::Corrupt),
                    Some(_) => {}
                    None => {
                        index.profiles.insert(dir.clone(), profile.to_string());
                    }
                }
            }
        }

        Ok(index)
    }

    pub fn parse(text: &str) -> KaResult<Self> {
        Self::from_document(&IndexDocument::parse(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_comments() {
        let doc = IndexDocument::parse(
            "ignored=before\n[Sound Theme]\nName=Demo # trailing\n# full comment\n\n[stereo]\r\nOutputProfile=stereo\n",
        );
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].name, "Sound Theme");
        assert_eq!(doc.sections[0].entries, vec![("Name".to_string(), "Demo".to_string())]);
        assert_eq!(doc.values("stereo", "OutputProfile").collect::<Vec<_>>(), vec!["stereo"]);
    }

    #[test]
    fn test_theme_index_lists() {
        let index = ThemeIndex::parse(
            "[Sound Theme]\nInherits=base, freedesktop\nDirectories=stereo,5.1 extra\n[5.1]\nOutputProfile=5.1\n",
        )
        .unwrap();
        assert_eq!(index.inherits, vec!["base", "freedesktop"]);
        assert_eq!(index.directories, vec!["stereo", "5.1", "extra"]);
        assert_eq!(index.profiles.get("5.1").map(String::as_str), Some("5.1"));
        assert_eq!(index.profiles.get("stereo"), None);
    }

    #[test]
    fn test_duplicate_inherits_is_corrupt() {
        let err = ThemeIndex::parse("[Sound Theme]\nInherits=a\nInherits=b\n").err();
        assert_eq!(err, Some(KaError::Corrupt));
    }

    #[test]
    fn test_conflicting_profile_is_corrupt() {
        let text = "[Sound Theme]\nDirectories=d\n[d]\nOutputProfile=stereo\n[d]\nOutputProfile=5.1\n";
        assert_eq!(ThemeIndex::parse(text).err(), Some(KaError::Corrupt));

        let same = "[Sound Theme]\nDirectories=d\n[d]\nOutputProfile=stereo\n[d]\nOutputProfile=stereo\n";
        assert!(ThemeIndex::parse(same).is_ok());
    }

    #[test]
    fn test_profile_for_unlisted_directory_ignored() {
        let index = ThemeIndex::parse("[Sound Theme]\nDirectories=a\n[b]\nOutputProfile=x\n").unwrap();
        assert!(index.profiles.is_empty());
    }
}
