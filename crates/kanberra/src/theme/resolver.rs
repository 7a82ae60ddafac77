//! Sound lookup over the XDG sound theme trees
//!
//! Search order, outermost loop first:
//!
//! ```text
//! profile   requested → "stereo" → none (theme-level files)
//!  └ data dir   every dir of the theme (and ancestors) matching the profile
//!     └ root       user data home, then system data dirs
//!        └ name       "a-b-c" → "a-b" → "a"
//!           └ locale     "de_DE@euro" → "de_DE" → "de" → "C" → none
//!              └ suffix     .disabled → .oga → .ogg → .wav
//! ```
//!
//! followed by the same search without any theme. A `.disabled` marker stops
//! everything with DISABLED. Any error other than NOTFOUND aborts the search.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::data::{DataDir, ThemeData};
use crate::cache::{CachedSound, SoundCache};
use crate::config::{SearchPaths, DEFAULT_OUTPUT_PROFILE, DEFAULT_THEME};
use crate::error::{KaError, KaResult};
use crate::proplist::{props, PropList};
use crate::sound_file::{open_sound_file, SoundFile};

/// Opens a candidate path. NOTFOUND moves the search on.
pub type SoundOpener = dyn Fn(&Path) -> KaResult<Box<dyn SoundFile>> + Send + Sync;

const SUFFIXES: [&str; 3] = [".oga", ".ogg", ".wav"];
const DISABLED_SUFFIX: &str = ".disabled";

/// An opened sound and where it came from
pub struct Resolved {
    pub file: Box<dyn SoundFile>,
    pub path: PathBuf,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved").field("path", &self.path).finish()
    }
}

/// The four inputs of a themed lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundQuery {
    pub theme: String,
    pub name: String,
    pub locale: String,
    pub profile: String,
}

impl SoundQuery {
    /// Pick theme, locale and profile from request properties first, then
    /// context properties, then defaults. `None` when no event id is set.
    pub fn from_props(ctx: &PropList, req: &PropList, default_theme: &str) -> Option<Self> {
        let name = PropList::gets_either(props::EVENT_ID, req, ctx)?;
        let theme = PropList::gets_either(props::XDG_THEME_NAME, req, ctx).unwrap_or(default_theme);
        let locale = req
            .gets(props::MEDIA_LANGUAGE)
            .or_else(|| req.gets(props::APPLICATION_LANGUAGE))
            .or_else(|| ctx.gets(props::MEDIA_LANGUAGE))
            .or_else(|| ctx.gets(props::APPLICATION_LANGUAGE))
            .map(str::to_string)
            .unwrap_or_else(system_locale);
        let profile =
            PropList::gets_either(props::XDG_THEME_OUTPUT_PROFILE, req, ctx).unwrap_or(DEFAULT_OUTPUT_PROFILE);

        Some(Self {
            theme: theme.to_string(),
            name: name.to_string(),
            locale,
            profile: profile.to_string(),
        })
    }
}

/// Message locale of the process environment, "C" when unset
pub fn system_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "C".to_string())
}

/// Locale directories to try, most specific first; `None` is "no locale"
pub fn locale_candidates(locale: &str) -> Vec<Option<String>> {
    let mut out: Vec<Option<String>> = vec![Some(locale.to_string())];
    let mut push = |candidate: &str| {
        let candidate = Some(candidate.to_string());
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    if let Some(at) = locale.find('@') {
        push(&locale[..at]);
    }
    if let Some(us) = locale.find('_') {
        push(&locale[..us]);
    }
    push("C");
    out.push(None);
    out
}

/// Event names to try: the name itself, then shorter prefixes cut at each
/// '-' from the right
pub fn name_candidates(name: &str) -> Vec<&str> {
    let mut out = vec![name];
    let mut end = name.len();
    while let Some(dash) = name[..end].rfind('-') {
        if dash == 0 {
            break;
        }
        out.push(&name[..dash]);
        end = dash;
    }
    out
}

/// First candidate that does not fail with NOTFOUND
fn first_found<T, I, F>(candidates: I, mut attempt: F) -> KaResult<Resolved>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> KaResult<Resolved>,
{
    for candidate in candidates {
        match attempt(candidate) {
            Err(KaError::NotFound) => continue,
            other => return other,
        }
    }
    Err(KaError::NotFound)
}

/// Theme-aware sound lookup with an optional persistent cache
pub struct ThemeResolver {
    paths: SearchPaths,
    default_theme: String,
    fallback_theme: String,
    cache: Option<Arc<SoundCache>>,
    opener: Arc<SoundOpener>,
    /// Most recently loaded theme
    theme: Mutex<Option<Arc<ThemeData>>>,
}

impl ThemeResolver {
    pub fn new(paths: SearchPaths) -> Self {
        Self {
            paths,
            default_theme: DEFAULT_THEME.to_string(),
            fallback_theme: DEFAULT_THEME.to_string(),
            cache: None,
            opener: Arc::new(open_sound_file),
            theme: Mutex::new(None),
        }
    }

    pub fn with_cache(mut self, cache: Arc<SoundCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_default_theme(mut self, theme: &str) -> Self {
        self.default_theme = theme.to_string();
        self
    }

    pub fn with_opener(mut self, opener: Arc<SoundOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn paths(&self) -> &SearchPaths {
        &self.paths
    }

    /// Resolve the sound for a request against the context's defaults
    ///
    /// Consults the cache first when one is attached; a negative entry is
    /// reported as NOTFOUND without touching the theme trees. Resolution
    /// results, including NOTFOUND, are written back. If nothing themed is
    /// found, `media.filename` is opened as a last resort.
    pub fn lookup_sound(&self, ctx: &PropList, req: &PropList) -> KaResult<Resolved> {
        let result = match SoundQuery::from_props(ctx, req, &self.default_theme) {
            Some(query) => self.lookup_cached(&query),
            None => Err(KaError::Invalid),
        };

        match result {
            Err(KaError::NotFound) | Err(KaError::Invalid) => {
                match PropList::gets_either(props::MEDIA_FILENAME, req, ctx) {
                    Some(filename) => {
                        let path = PathBuf::from(filename);
                        let file = (self.opener)(&path)?;
                        Ok(Resolved { file, path })
                    }
                    None => result,
                }
            }
            other => other,
        }
    }

    fn lookup_cached(&self, q: &SoundQuery) -> KaResult<Resolved> {
        let Some(cache) = &self.cache else {
            return self.find_sound(&q.theme, &q.name, &q.locale, &q.profile);
        };

        match cache.lookup(&q.theme, &q.name, &q.locale, &q.profile) {
            Ok(CachedSound::Found(path)) => match (self.opener)(&path) {
                Ok(file) => {
                    log::debug!("[THEME] Cache hit for {}: {:?}", q.name, path);
                    return Ok(Resolved { file, path });
                }
                Err(e) => {
                    log::debug!("[THEME] Cached {:?} unusable ({}), resolving again", path, e);
                    if let Err(e) = cache.evict(&q.theme, &q.name, &q.locale, &q.profile) {
                        log::debug!("[THEME] Could not evict {:?} from lookup cache: {}", path, e);
                    }
                }
            },
            Ok(CachedSound::Absent) => {
                log::debug!("[THEME] Cache says {} does not exist", q.name);
                return Err(KaError::NotFound);
            }
            Err(KaError::NotFound) => {}
            Err(e) => log::debug!("[THEME] Lookup cache unavailable: {}", e),
        }

        let result = self.find_sound(&q.theme, &q.name, &q.locale, &q.profile);
        let stored = match &result {
            Ok(resolved) => cache.store(&q.theme, &q.name, &q.locale, &q.profile, Some(&resolved.path)),
            Err(KaError::NotFound) => cache.store(&q.theme, &q.name, &q.locale, &q.profile, None),
            Err(_) => Ok(()),
        };
        if let Err(e) = stored {
            log::debug!("[THEME] Could not update lookup cache: {}", e);
        }
        result
    }

    /// Uncached themed lookup
    pub fn find_sound(&self, theme: &str, name: &str, locale: &str, profile: &str) -> KaResult<Resolved> {
        if name.is_empty() {
            return Err(KaError::Invalid);
        }

        let data = match self.theme_data(theme) {
            Err(KaError::NotFound) if theme != self.fallback_theme => self.theme_data(&self.fallback_theme),
            other => other,
        };

        match data {
            Ok(data) => match self.find_in_theme(Some(&data), name, locale, profile) {
                Err(KaError::NotFound) => {}
                other => return other,
            },
            Err(e) => {
                log::debug!("[THEME] No theme data for {} ({}), searching unthemed", theme, e);
            }
        }

        self.find_in_theme(None, name, locale, profile)
    }

    fn theme_data(&self, name: &str) -> KaResult<Arc<ThemeData>> {
        let mut current = self.theme.lock().map_err(|_| KaError::Internal)?;
        if let Some(data) = current.as_ref().filter(|d| d.name == name) {
            return Ok(data.clone());
        }

        let data = Arc::new(ThemeData::load(name, &self.fallback_theme, &self.paths)?);
        *current = Some(data.clone());
        Ok(data)
    }

    fn find_in_theme(&self, theme: Option<&ThemeData>, name: &str, locale: &str, profile: &str) -> KaResult<Resolved> {
        if let Some(t) = theme {
            let mut profiles = vec![profile];
            if profile != DEFAULT_OUTPUT_PROFILE {
                profiles.push(DEFAULT_OUTPUT_PROFILE);
            }
            match first_found(profiles, |p| self.find_in_profile(t, name, locale, p)) {
                Err(KaError::NotFound) => {}
                other => return other,
            }
        }

        self.find_in_subdir(theme.map(|t| t.name.as_str()), None, name, locale)
    }

    fn find_in_profile(&self, theme: &ThemeData, name: &str, locale: &str, profile: &str) -> KaResult<Resolved> {
        let dirs = theme.data_dirs.iter().filter(|d| d.matches(profile));
        first_found(dirs, |d: &DataDir| {
            self.find_in_subdir(Some(&d.theme_name), Some(&d.dir_name), name, locale)
        })
    }

    fn find_in_subdir(&self, theme: Option<&str>, subdir: Option<&str>, name: &str, locale: &str) -> KaResult<Resolved> {
        first_found(self.paths.roots(), |root| {
            let base = root.join("sounds");
            first_found(name_candidates(name), |n| {
                first_found(locale_candidates(locale), |l| {
                    let mut dir = base.clone();
                    dir.extend(theme);
                    dir.extend(subdir);
                    dir.extend(l.as_deref());
                    self.find_with_suffix(&dir, n)
                })
            })
        })
    }

    fn find_with_suffix(&self, dir: &Path, name: &str) -> KaResult<Resolved> {
        let marker = dir.join(format!("{}{}", name, DISABLED_SUFFIX));
        match std::fs::symlink_metadata(&marker) {
            Ok(_) => {
                log::debug!("[THEME] {} disabled by {:?}", name, marker);
                return Err(KaError::Disabled);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => return Err(KaError::System),
        }

        first_found(SUFFIXES, |suffix| {
            let path = dir.join(format!("{}{}", name, suffix));
            let file = (self.opener)(&path)?;
            log::debug!("[THEME] Resolved {} to {:?}", name, path);
            Ok(Resolved { file, path })
        })
    }
}
