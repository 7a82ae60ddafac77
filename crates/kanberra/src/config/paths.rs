//! Filesystem locations: XDG data roots, the config file and the lookup
//! cache file.

use std::path::{Path, PathBuf};

/// Search roots for sound themes, user root first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    /// `$XDG_DATA_HOME`, or `$HOME/.local/share`
    pub data_home: Option<PathBuf>,
    /// `$XDG_DATA_DIRS`, or `/usr/local/share:/usr/share`
    pub data_dirs: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn new(data_home: Option<PathBuf>, data_dirs: Vec<PathBuf>) -> Self {
        Self { data_home, data_dirs }
    }

    /// Read the XDG base directory variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key).map(PathBuf::from), dirs::home_dir())
    }

    fn from_lookup<F>(lookup: F, home: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let data_home = lookup("XDG_DATA_HOME")
            .filter(|p| p.is_absolute())
            .or_else(|| home.map(|h| h.join(".local").join("share")));

        let data_dirs = lookup("XDG_DATA_DIRS")
            .map(|joined| {
                std::env::split_paths(&joined)
                    .filter(|p| p.is_absolute())
                    .collect::<Vec<_>>()
            })
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| vec![PathBuf::from("/usr/local/share"), PathBuf::from("/usr/share")]);

        Self { data_home, data_dirs }
    }

    /// All roots in search order
    pub fn roots(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.data_home.iter().chain(self.data_dirs.iter()).cloned()
    }
}

/// `<config_dir>/kanberra/config.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kanberra")
        .join("config.yaml")
}

/// Default lookup cache file: one per machine and build target, under the
/// platform cache directory.
pub fn cache_file_path() -> Option<PathBuf> {
    let cache_home = dirs::cache_dir().or_else(|| dirs::home_dir().map(|h| h.join(".cache")))?;
    Some(cache_file_in(&cache_home, &machine_id()))
}

pub(crate) fn cache_file_in(cache_home: &Path, machine_id: &str) -> PathBuf {
    cache_home.join(format!(
        "event-sound-cache.{}.{}.sqlite",
        machine_id,
        env!("KANBERRA_TARGET_TRIPLE")
    ))
}

/// Stable identifier of this machine
///
/// Tries the systemd/D-Bus machine id files, then the hostname, then the
/// numeric host id in hex.
pub fn machine_id() -> String {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let id = contents.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }

    if let Some(host) = hostname() {
        return host;
    }

    host_id()
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates on success
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok().filter(|s| !s.is_empty())
}

#[cfg(unix)]
fn host_id() -> String {
    // SAFETY: gethostid has no preconditions
    let id = unsafe { libc::gethostid() };
    format!("{:08x}", id as u32)
}

#[cfg(not(unix))]
fn host_id() -> String {
    "00000000".to_string()
}
