//! Property bag attached to contexts and play requests
//!
//! Keys are 7-bit ASCII strings, values are binary. String values are stored
//! with a trailing NUL so that binary and string properties share one
//! representation. Iteration follows first-insertion order; setting an
//! existing key replaces its value in place.
//!
//! A `PropList` has no lock of its own. Shared bags live behind the owning
//! [`Context`](crate::Context)'s mutex, and borrowing rules take care of the
//! rest.

use std::fmt;

use crate::error::{KaError, KaResult};

/// Well-known property keys
pub mod props {
    pub const EVENT_ID: &str = "event.id";
    pub const EVENT_DESCRIPTION: &str = "event.description";
    pub const MEDIA_FILENAME: &str = "media.filename";
    pub const MEDIA_NAME: &str = "media.name";
    pub const MEDIA_LANGUAGE: &str = "media.language";
    pub const APPLICATION_NAME: &str = "application.name";
    pub const APPLICATION_ID: &str = "application.id";
    pub const APPLICATION_LANGUAGE: &str = "application.language";
    pub const XDG_THEME_NAME: &str = "kanberra.xdg-theme.name";
    pub const XDG_THEME_OUTPUT_PROFILE: &str = "kanberra.xdg-theme.output-profile";
    pub const ENABLE: &str = "kanberra.enable";
    pub const CACHE_CONTROL: &str = "kanberra.cache-control";
    pub const VOLUME: &str = "kanberra.volume";
}

/// Ordered key/value attribute store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropList {
    items: Vec<(String, Vec<u8>)>,
}

fn valid_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii() && !b.is_ascii_control())
}

impl PropList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag of string properties
    pub fn from_strs(pairs: &[(&str, &str)]) -> KaResult<Self> {
        let mut p = Self::new();
        for (k, v) in pairs {
            p.sets(k, v)?;
        }
        Ok(p)
    }

    /// Set a binary value, replacing any existing value for `key`
    pub fn set(&mut self, key: &str, value: &[u8]) -> KaResult<()> {
        if !valid_key(key) {
            return Err(KaError::Invalid);
        }
        match self.items.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => {
                v.clear();
                v.extend_from_slice(value);
            }
            None => self.items.push((key.to_string(), value.to_vec())),
        }
        Ok(())
    }

    /// Set a string value (stored NUL-terminated)
    pub fn sets(&mut self, key: &str, value: &str) -> KaResult<()> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.set(key, &bytes)
    }

    /// Format and set a string value
    ///
    /// ```ignore
    /// props.setf(props::MEDIA_NAME, format_args!("Track {}", n))?;
    /// ```
    pub fn setf(&mut self, key: &str, args: fmt::Arguments<'_>) -> KaResult<()> {
        self.sets(key, &fmt::format(args))
    }

    /// Raw value of `key`
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// String value of `key`. Binary values without a NUL terminator, or
    /// that are not UTF-8, are not strings and yield `None`.
    pub fn gets(&self, key: &str) -> Option<&str> {
        let raw = self.get(key)?;
        let nul = raw.iter().position(|b| *b == 0)?;
        std::str::from_utf8(&raw[..nul]).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.iter().any(|(k, _)| k == key)
    }

    /// Remove `key`, returning whether it was present
    pub fn unset(&mut self, key: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|(k, _)| k != key);
        self.items.len() != before
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Copy every pair of `other` into `self`; `other` wins on collision
    pub fn merge_from(&mut self, other: &PropList) {
        for (k, v) in &other.items {
            match self.items.iter_mut().find(|(key, _)| key == k) {
                Some((_, value)) => value.clone_from(v),
                None => self.items.push((k.clone(), v.clone())),
            }
        }
    }

    /// Fresh bag with all of `b`'s pairs, then all of `c`'s. On key
    /// collision `c` wins.
    pub fn merge(b: &PropList, c: &PropList) -> PropList {
        let mut a = b.clone();
        a.merge_from(c);
        a
    }

    /// First string value found for `key`, looking at `first` then `second`
    pub fn gets_either<'a>(key: &str, first: &'a PropList, second: &'a PropList) -> Option<&'a str> {
        first.gets(key).or_else(|| second.gets(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_existing_key() {
        let mut p = PropList::new();
        p.sets("x", "1").unwrap();
        p.sets("y", "9").unwrap();
        p.sets("x", "3").unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.gets("x"), Some("3"));
        let keys: Vec<_> = p.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn test_merge_later_source_wins() {
        let a = PropList::from_strs(&[("x", "1"), ("y", "9")]).unwrap();
        let b = PropList::from_strs(&[("x", "2")]).unwrap();
        let merged = PropList::merge(&a, &b);
        assert_eq!(merged.gets("x"), Some("2"));
        assert_eq!(merged.gets("y"), Some("9"));
        // Sources are left untouched
        assert_eq!(a.gets("x"), Some("1"));
    }

    #[test]
    fn test_binary_values_are_not_strings() {
        let mut p = PropList::new();
        p.set("blob", &[1, 2, 3]).unwrap();
        assert_eq!(p.get("blob"), Some(&[1u8, 2, 3][..]));
        assert_eq!(p.gets("blob"), None);

        p.sets("s", "hello").unwrap();
        assert_eq!(p.get("s"), Some(&b"hello\0"[..]));
    }

    #[test]
    fn test_setf_formats() {
        let mut p = PropList::new();
        p.setf(props::MEDIA_NAME, format_args!("Track {}", 7)).unwrap();
        assert_eq!(p.gets(props::MEDIA_NAME), Some("Track 7"));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let mut p = PropList::new();
        assert_eq!(p.sets("", "x"), Err(KaError::Invalid));
        assert_eq!(p.sets("k\u{e9}y", "x"), Err(KaError::Invalid));
        assert_eq!(p.sets("a\nb", "x"), Err(KaError::Invalid));
    }

    #[test]
    fn test_unset_and_contains() {
        let mut p = PropList::from_strs(&[(props::EVENT_ID, "bell")]).unwrap();
        assert!(p.contains(props::EVENT_ID));
        assert!(p.unset(props::EVENT_ID));
        assert!(!p.unset(props::EVENT_ID));
        assert!(p.is_empty());
    }
}
