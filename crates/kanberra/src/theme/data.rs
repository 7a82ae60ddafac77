//! Theme inheritance walk
//!
//! Loads a theme's index from the first search root that has one, records
//! its data directories, then follows `Inherits=` recursively. A visited set
//! makes cycles and diamonds load each theme once; a depth bound catches
//! pathological chains.

use std::collections::HashSet;
use std::path::Path;

use super::index::ThemeIndex;
use crate::config::SearchPaths;
use crate::error::{KaError, KaResult};

/// Deepest inheritance chain accepted before the theme is declared corrupt
pub const MAX_THEME_DEPTH: usize = 8;

/// One searchable directory of a theme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    /// Theme that declared the directory
    pub theme_name: String,
    pub dir_name: String,
    pub output_profile: Option<String>,
}

impl DataDir {
    /// A directory without a profile serves every profile
    pub fn matches(&self, profile: &str) -> bool {
        self.output_profile.as_deref().map_or(true, |p| p == profile)
    }
}

/// A loaded theme plus everything it inherits, in search order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeData {
    pub name: String,
    pub data_dirs: Vec<DataDir>,
}

impl ThemeData {
    /// Load `name` and its ancestors, then (best-effort) the fallback theme
    pub fn load(name: &str, fallback: &str, paths: &SearchPaths) -> KaResult<Self> {
        let mut walk = Walk {
            paths,
            visited: HashSet::new(),
            data: ThemeData {
                name: name.to_string(),
                data_dirs: Vec::new(),
            },
        };

        walk.load_theme(name, 0)?;

        if !walk.visited.contains(fallback) {
            if let Err(e) = walk.load_theme(fallback, 0) {
                log::debug!("[THEME] Fallback theme {} not loaded: {}", fallback, e);
            }
        }

        log::debug!(
            "[THEME] Loaded {} with {} data dirs",
            name,
            walk.data.data_dirs.len()
        );
        Ok(walk.data)
    }
}

struct Walk<'a> {
    paths: &'a SearchPaths,
    visited: HashSet<String>,
    data: ThemeData,
}

impl Walk<'_> {
    fn load_theme(&mut self, name: &str, depth: usize) -> KaResult<()> {
        if depth >= MAX_THEME_DEPTH {
            log::warn!("[THEME] Inheritance deeper than {} at {}", MAX_THEME_DEPTH, name);
            return Err(KaError::Corrupt);
        }
        if !self.visited.insert(name.to_string()) {
            return Ok(());
        }

        for root in self.paths.roots() {
            match self.load_from_root(&root, name, depth) {
                Err(KaError::NotFound) => continue,
                other => return other,
            }
        }

        Err(KaError::NotFound)
    }

    fn load_from_root(&mut self, root: &Path, name: &str, depth: usize) -> KaResult<()> {
        let path = root.join("sounds").join(name).join("index.theme");
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(KaError::NotFound),
            Err(e) => {
                log::warn!("[THEME] Cannot read {:?}: {}", path, e);
                return Err(KaError::System);
            }
        };

        let index = ThemeIndex::parse(&text).map_err(|e| {
            log::warn!("[THEME] Malformed index {:?}", path);
            e
        })?;

        for dir in &index.directories {
            let known = self
                .data
                .data_dirs
                .iter()
                .any(|d| d.theme_name == name && &d.dir_name == dir);
            if !known {
                self.data.data_dirs.push(DataDir {
                    theme_name: name.to_string(),
                    dir_name: dir.clone(),
                    output_profile: index.profiles.get(dir).cloned(),
                });
            }
        }

        for parent in &index.inherits {
            match self.load_theme(parent, depth + 1) {
                Ok(()) => {}
                Err(KaError::NotFound) => {
                    log::debug!("[THEME] {} inherits missing theme {}", name, parent);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write_index(root: &Path, theme: &str, body: &str) {
        let dir = root.join("sounds").join(theme);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.theme"), body).unwrap();
    }

    fn paths(home: &Path, dirs: &[PathBuf]) -> SearchPaths {
        SearchPaths::new(Some(home.to_path_buf()), dirs.to_vec())
    }

    #[test]
    fn test_inheritance_order_and_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_index(root, "child", "[Sound Theme]\nInherits=parent\nDirectories=stereo\n");
        write_index(root, "parent", "[Sound Theme]\nDirectories=base,5.1\n[5.1]\nOutputProfile=5.1\n");
        write_index(root, "freedesktop", "[Sound Theme]\nDirectories=stereo\n");

        let data = ThemeData::load("child", "freedesktop", &paths(root, &[])).unwrap();
        let dirs: Vec<_> = data
            .data_dirs
            .iter()
            .map(|d| format!("{}/{}", d.theme_name, d.dir_name))
            .collect();
        assert_eq!(dirs, vec!["child/stereo", "parent/base", "parent/5.1", "freedesktop/stereo"]);
        assert!(data.data_dirs[2].matches("5.1"));
        assert!(!data.data_dirs[2].matches("stereo"));
        assert!(data.data_dirs[1].matches("anything"));
    }

    #[test]
    fn test_cycle_loads_each_theme_once() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_index(root, "a", "[Sound Theme]\nInherits=b\nDirectories=x\n");
        write_index(root, "b", "[Sound Theme]\nInherits=a\nDirectories=y\n");

        let data = ThemeData::load("a", "freedesktop", &paths(root, &[])).unwrap();
        assert_eq!(data.data_dirs.len(), 2);
    }

    #[test]
    fn test_depth_bound_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        for i in 0..MAX_THEME_DEPTH + 2 {
            write_index(
                root,
                &format!("t{}", i),
                &format!("[Sound Theme]\nInherits=t{}\nDirectories=d\n", i + 1),
            );
        }
        let err = ThemeData::load("t0", "freedesktop", &paths(root, &[])).err();
        assert_eq!(err, Some(KaError::Corrupt));
    }

    #[test]
    fn test_missing_theme_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ThemeData::load("nope", "freedesktop", &paths(tmp.path(), &[])).err();
        assert_eq!(err, Some(KaError::NotFound));
    }

    #[test]
    fn test_user_root_shadows_system_root() {
        let home = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        write_index(home.path(), "t", "[Sound Theme]\nDirectories=user\n");
        write_index(sys.path(), "t", "[Sound Theme]\nDirectories=system\n");

        let data = ThemeData::load("t", "freedesktop", &paths(home.path(), &[sys.path().to_path_buf()])).unwrap();
        assert_eq!(data.data_dirs.len(), 1);
        assert_eq!(data.data_dirs[0].dir_name, "user");
    }
}
