//! Persistent lookup cache in front of the theme resolver
//!
//! Maps `(theme, event name, locale, profile)` to the resolved file path,
//! or to a negative entry meaning "confirmed absent". Records live in one
//! SQLite key/value table:
//!
//! ```text
//! key   = theme \0 name \0 locale \0 profile \0
//! value = u32 timestamp (native endian) [ path \0 ]
//! ```
//!
//! A record is stale when its timestamp predates the newest modification
//! of any `<root>/sounds` directory, or lies in the future. Stale and
//! malformed records are evicted on lookup and reported as misses.
//!
//! The database is opened lazily on first use. If it cannot be opened the
//! handle stays "unavailable" for the rest of its life and every lookup is
//! a miss, so resolution simply runs uncached.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use crate::config::{CacheSettings, SearchPaths};
use crate::error::{KaError, KaResult};

/// Result of a successful cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedSound {
    /// Previously resolved to this file
    Found(PathBuf),
    /// Negative entry: known not to exist
    Absent,
}

enum DbState {
    Unopened,
    Open(Connection),
    Unavailable,
}

struct CacheState {
    conn: DbState,
    /// Newest `sounds` directory mtime seen, seconds since the epoch
    last_change: u64,
    last_check: Option<Instant>,
}

/// Owned handle to the on-disk lookup cache
pub struct SoundCache {
    path: Option<PathBuf>,
    roots: SearchPaths,
    refresh_interval: Duration,
    state: Mutex<CacheState>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn make_key(theme: &str, name: &str, locale: &str, profile: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(theme.len() + name.len() + locale.len() + profile.len() + 4);
    for part in [theme, name, locale, profile] {
        key.extend_from_slice(part.as_bytes());
        key.push(0);
    }
    key
}

fn map_sql_error(e: rusqlite::Error) -> KaError {
    log::debug!("[CACHE] SQLite error: {}", e);
    match e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            rusqlite::ErrorCode::CannotOpen => KaError::Io,
            rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::ReadOnly => KaError::Access,
            rusqlite::ErrorCode::OutOfMemory => KaError::Oom,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => KaError::NotAvailable,
            _ => KaError::Corrupt,
        },
        _ => KaError::Internal,
    }
}

/// Newest mtime of `<root>/sounds` over all roots, 0 when none exist
fn theme_tree_mtime(roots: &SearchPaths) -> u64 {
    roots
        .roots()
        .filter_map(|root| std::fs::metadata(root.join("sounds")).ok())
        .filter_map(|meta| meta.modified().ok())
        .filter_map(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .max()
        .unwrap_or(0)
}

fn create_db_file(path: &Path) -> KaResult<()> {
    if let Some(parent) = path.parent() {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder.create(parent)?;
    }

    if !path.exists() {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path)?;
    }
    Ok(())
}

impl SoundCache {
    /// Cache stored at `path`, invalidated by changes under `roots`
    pub fn new(path: PathBuf, roots: SearchPaths, refresh_interval: Duration) -> Self {
        Self::with_optional_path(Some(path), roots, refresh_interval)
    }

    /// Cache at the configured or default machine-scoped location
    pub fn from_settings(settings: &CacheSettings, roots: SearchPaths) -> Self {
        let path = settings.path.clone().or_else(crate::config::cache_file_path);
        Self::with_optional_path(path, roots, settings.refresh_interval())
    }

    fn with_optional_path(path: Option<PathBuf>, roots: SearchPaths, refresh_interval: Duration) -> Self {
        Self {
            path,
            roots,
            refresh_interval,
            state: Mutex::new(CacheState {
                conn: DbState::Unopened,
                last_change: 0,
                last_check: None,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn open_db(&self) -> KaResult<Connection> {
        let path = self.path.as_deref().ok_or(KaError::NotAvailable)?;
        create_db_file(path)?;

        let conn = Connection::open(path).map_err(map_sql_error)?;
        conn.busy_timeout(Duration::from_millis(250)).map_err(map_sql_error)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS event_sounds (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )
        .map_err(map_sql_error)?;

        log::info!("[CACHE] Opened lookup cache {:?}", path);
        Ok(conn)
    }

    /// Run `f` against the open connection, opening it on first use
    fn with_conn<T, F>(&self, f: F) -> KaResult<T>
    where
        F: FnOnce(&Connection, &mut u64, &mut Option<Instant>) -> KaResult<T>,
    {
        let mut state = self.state.lock().map_err(|_| KaError::Internal)?;

        if let DbState::Unopened = state.conn {
            state.conn = match self.open_db() {
                Ok(conn) => DbState::Open(conn),
                Err(e) => {
                    log::warn!("[CACHE] Lookup cache unavailable: {}", e);
                    DbState::Unavailable
                }
            };
        }

        let CacheState {
            conn,
            last_change,
            last_check,
        } = &mut *state;
        match conn {
            DbState::Open(conn) => f(conn, last_change, last_check),
            _ => Err(KaError::NotAvailable),
        }
    }

    /// Whether the database could be opened (opens it if needed)
    pub fn is_available(&self) -> bool {
        self.with_conn(|_, _, _| Ok(())).is_ok()
    }

    /// Close the database. The next operation reopens it.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.conn = DbState::Unopened;
            state.last_check = None;
        }
    }

    /// Look up a resolution result
    ///
    /// `Err(NotFound)` is a miss (absent, stale or malformed record).
    /// `Ok(CachedSound::Absent)` is a confirmed negative entry.
    pub fn lookup(&self, theme: &str, name: &str, locale: &str, profile: &str) -> KaResult<CachedSound> {
        let key = make_key(theme, name, locale, profile);

        self.with_conn(|conn, last_change, last_check| {
            let value: Option<Vec<u8>> = conn
                .query_row("SELECT value FROM event_sounds WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(map_sql_error)?;

            let Some(value) = value else {
                return Err(KaError::NotFound);
            };

            let evict = |why: &str| -> KaResult<CachedSound> {
                log::debug!("[CACHE] Evicting {}/{} ({})", theme, name, why);
                conn.execute("DELETE FROM event_sounds WHERE key = ?1", params![key])
                    .map_err(map_sql_error)?;
                Err(KaError::NotFound)
            };

            if value.len() < 4 || (value.len() > 4 && value[value.len() - 1] != 0) {
                return evict("malformed");
            }

            let stamp = u32::from_ne_bytes([value[0], value[1], value[2], value[3]]) as u64;
            let now = now_secs();

            let due = last_check.map_or(true, |t| t.elapsed() >= self.refresh_interval);
            if due {
                *last_change = theme_tree_mtime(&self.roots);
                *last_check = Some(Instant::now());
            }

            if stamp < *last_change {
                return evict("theme changed");
            }
            if stamp > now {
                return evict("timestamp in the future");
            }

            if value.len() == 4 {
                return Ok(CachedSound::Absent);
            }

            match std::str::from_utf8(&value[4..value.len() - 1]) {
                Ok(path) if !path.is_empty() => Ok(CachedSound::Found(PathBuf::from(path))),
                _ => evict("bad path"),
            }
        })
    }

    /// Record a resolution result; `None` stores a negative entry
    pub fn store(
        &self,
        theme: &str,
        name: &str,
        locale: &str,
        profile: &str,
        path: Option<&Path>,
    ) -> KaResult<()> {
        let mut value = (now_secs() as u32).to_ne_bytes().to_vec();
        if let Some(path) = path {
            let path = path.to_str().ok_or(KaError::Invalid)?;
            value.extend_from_slice(path.as_bytes());
            value.push(0);
        }
        self.put_raw(&make_key(theme, name, locale, profile), &value)
    }

    /// Drop one entry
    pub fn evict(&self, theme: &str, name: &str, locale: &str, profile: &str) -> KaResult<()> {
        let key = make_key(theme, name, locale, profile);
        self.with_conn(|conn, _, _| {
            conn.execute("DELETE FROM event_sounds WHERE key = ?1", params![key])
                .map_err(map_sql_error)?;
            Ok(())
        })
    }

    fn put_raw(&self, key: &[u8], value: &[u8]) -> KaResult<()> {
        self.with_conn(|conn, _, _| {
            conn.execute(
                "INSERT OR REPLACE INTO event_sounds (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
    }
}
