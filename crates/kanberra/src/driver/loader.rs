//! Driver registry and backend selection
//!
//! An explicit driver string is a `,` or `:` separated list tried in order.
//! A `multi` entry takes the rest of the list as its members. Without a
//! driver string the auto-selectable drivers are tried in preference order.
//! Either way soft errors move on to the next candidate and any other error
//! aborts selection.

use std::sync::Arc;

use super::{Driver, DriverOpener, DriverSetup};
use crate::error::{KaError, KaResult};

pub const MULTI_DRIVER: &str = "multi";

/// Built-in preference order for automatic selection
#[cfg(feature = "cpal-backend")]
pub const DRIVER_ORDER: &[&str] = &["cpal", "file", "null"];
#[cfg(not(feature = "cpal-backend"))]
pub const DRIVER_ORDER: &[&str] = &["file", "null"];

/// Map anything outside `[A-Za-z0-9]` to `_`
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// All non-empty entries of a driver list
pub(crate) fn entries(spec: &str) -> impl Iterator<Item = &str> {
    spec.split([',', ':']).filter(|s| !s.is_empty())
}

/// First candidate that opened. Candidates are opened lazily, so a hard
/// error stops the ones after it from being tried.
fn first_opened<'a>(
    candidates: impl Iterator<Item = (&'a str, KaResult<Box<dyn Driver>>)>,
) -> KaResult<Box<dyn Driver>> {
    for (name, result) in candidates {
        match result {
            Ok(driver) => {
                log::info!("[DRIVER] Selected {}", name);
                return Ok(driver);
            }
            Err(e) if e.is_soft() => {
                log::debug!("[DRIVER] {} unavailable: {}", name, e);
            }
            Err(e) => {
                log::warn!("[DRIVER] {} failed: {}", name, e);
                return Err(e);
            }
        }
    }
    Err(KaError::NoDriver)
}

struct DriverEntry {
    name: String,
    opener: Arc<DriverOpener>,
    auto_select: bool,
}

/// Name to constructor map
pub struct DriverRegistry {
    entries: Vec<DriverEntry>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registry with every backend compiled into this build
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        #[cfg(feature = "cpal-backend")]
        registry.register("cpal", Arc::new(crate::backend::cpal::open));
        registry.register("file", Arc::new(crate::backend::file::open));
        registry.register("null", Arc::new(crate::backend::null::open));
        registry.register_manual(MULTI_DRIVER, Arc::new(super::multi::open));
        registry
    }

    /// Add (or replace) a driver that takes part in automatic selection,
    /// after the ones already registered
    pub fn register(&mut self, name: &str, opener: Arc<DriverOpener>) {
        self.insert(name, opener, true);
    }

    /// Add (or replace) a driver that is only opened when named explicitly
    pub fn register_manual(&mut self, name: &str, opener: Arc<DriverOpener>) {
        self.insert(name, opener, false);
    }

    fn insert(&mut self, name: &str, opener: Arc<DriverOpener>, auto_select: bool) {
        let name = normalize_name(name);
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.opener = opener;
                entry.auto_select = auto_select;
            }
            None => self.entries.push(DriverEntry {
                name,
                opener,
                auto_select,
            }),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Drivers tried by automatic selection, in order
    pub fn auto_order(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.auto_select)
            .map(|e| e.name.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.entries.iter().any(|e| e.name == name)
    }

    /// Open the driver selected by `setup.driver`
    pub fn open(&self, setup: &DriverSetup<'_>) -> KaResult<Box<dyn Driver>> {
        let Some(list) = setup.driver else {
            let auto = self.entries.iter().filter(|e| e.auto_select);
            return first_opened(auto.map(|entry| (entry.name.as_str(), (entry.opener)(setup))));
        };

        let names: Vec<&str> = entries(list).collect();
        if names.is_empty() {
            return Err(KaError::Invalid);
        }

        // `multi` takes every later entry as a member, so nothing after it
        // is tried on its own
        let end = names
            .iter()
            .position(|n| normalize_name(n) == MULTI_DRIVER)
            .map_or(names.len(), |i| i + 1);

        first_opened(names[..end].iter().enumerate().map(|(i, &name)| {
            let result = if i + 1 == end && normalize_name(name) == MULTI_DRIVER {
                let tail = names[i..].join(",");
                self.open_named(name, &DriverSetup { driver: Some(&tail), ..setup.clone() })
            } else {
                self.open_named(name, &DriverSetup { driver: Some(name), ..setup.clone() })
            };
            (name, result)
        }))
    }

    /// Open one driver by name. Unknown names are NODRIVER.
    pub fn open_named(&self, name: &str, setup: &DriverSetup<'_>) -> KaResult<Box<dyn Driver>> {
        let key = normalize_name(name);
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == key)
            .ok_or(KaError::NoDriver)?;
        let driver = (entry.opener)(setup)?;
        log::debug!("[DRIVER] Opened {}", entry.name);
        Ok(driver)
    }
}
