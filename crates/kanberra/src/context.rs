//! Client handle: default properties, driver selection and lifecycle
//!
//! A [`Context`] starts closed. It opens its driver explicitly through
//! [`Context::open`] or lazily on the first `play`/`cache`. Dropping the
//! context destroys it, which blocks until every outstanding playback has
//! delivered its callback.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::SoundCache;
use crate::config::KanberraConfig;
use crate::driver::{Driver, DriverRegistry, DriverSetup, FinishCallback};
use crate::error::{KaError, KaResult};
use crate::proplist::{props, PropList};
use crate::theme::ThemeResolver;

struct ContextState {
    props: PropList,
    driver: Option<String>,
    device: Option<String>,
    backend: Option<Arc<dyn Driver>>,
}

pub struct Context {
    pid: u32,
    registry: DriverRegistry,
    resolver: Arc<ThemeResolver>,
    state: Mutex<ContextState>,
}

impl Context {
    /// Context configured from the user's config file and the
    /// `KANBERRA_DRIVER` / `KANBERRA_DEVICE` environment variables
    pub fn create() -> KaResult<Self> {
        Self::with_config(KanberraConfig::load_default().apply_env())
    }

    pub fn with_config(config: KanberraConfig) -> KaResult<Self> {
        Self::with_registry(config, DriverRegistry::builtin())
    }

    /// Context using a custom set of drivers
    pub fn with_registry(config: KanberraConfig, registry: DriverRegistry) -> KaResult<Self> {
        let paths = config.search_paths();
        let mut resolver = ThemeResolver::new(paths.clone()).with_default_theme(config.theme_name());
        if config.cache.enabled {
            resolver = resolver.with_cache(Arc::new(SoundCache::from_settings(&config.cache, paths)));
        }

        let mut defaults = PropList::new();
        if let Some(profile) = &config.output_profile {
            defaults.sets(props::XDG_THEME_OUTPUT_PROFILE, profile)?;
        }

        log::debug!(
            "[CONTEXT] Created (driver={:?}, device={:?}, theme={})",
            config.driver,
            config.device,
            config.theme_name()
        );

        Ok(Self {
            pid: std::process::id(),
            registry,
            resolver: Arc::new(resolver),
            state: Mutex::new(ContextState {
                props: defaults,
                driver: config.driver,
                device: config.device,
                backend: None,
            }),
        })
    }

    fn check_fork(&self) -> KaResult<()> {
        if std::process::id() != self.pid {
            return Err(KaError::Forked);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_locked(&self, state: &mut ContextState) -> KaResult<Arc<dyn Driver>> {
        if let Some(backend) = &state.backend {
            return Ok(Arc::clone(backend));
        }

        let setup = DriverSetup {
            driver: state.driver.as_deref(),
            device: state.device.as_deref(),
            props: &state.props,
            resolver: Arc::clone(&self.resolver),
            registry: &self.registry,
        };
        let backend: Arc<dyn Driver> = Arc::from(self.registry.open(&setup)?);
        log::info!("[CONTEXT] Opened driver {}", backend.name());

        state.backend = Some(Arc::clone(&backend));
        Ok(backend)
    }

    /// Select the driver (or `,`/`:` separated list) to open. Only allowed
    /// while closed.
    pub fn set_driver(&self, driver: Option<&str>) -> KaResult<()> {
        self.check_fork()?;
        let mut state = self.lock();
        if state.backend.is_some() {
            return Err(KaError::State);
        }
        state.driver = driver.map(str::to_string);
        Ok(())
    }

    /// Change the output device, forwarding to the driver when open
    pub fn change_device(&self, device: Option<&str>) -> KaResult<()> {
        self.check_fork()?;
        let mut state = self.lock();
        if let Some(backend) = &state.backend {
            backend.change_device(device)?;
        }
        state.device = device.map(str::to_string);
        Ok(())
    }

    pub fn open(&self) -> KaResult<()> {
        self.check_fork()?;
        let mut state = self.lock();
        if state.backend.is_some() {
            return Err(KaError::State);
        }
        self.open_locked(&mut state).map(|_| ())
    }

    pub fn is_open(&self) -> bool {
        self.lock().backend.is_some()
    }

    /// Name of the open driver
    pub fn driver_name(&self) -> Option<String> {
        self.lock().backend.as_ref().map(|b| b.name().to_string())
    }

    /// Merge `changed` into the default properties
    pub fn change_props(&self, changed: &PropList) -> KaResult<()> {
        self.check_fork()?;
        let mut state = self.lock();
        let merged = PropList::merge(&state.props, changed);
        if let Some(backend) = &state.backend {
            backend.change_props(changed, &merged)?;
        }
        state.props = merged;
        Ok(())
    }

    /// Copy of the default properties
    pub fn props(&self) -> PropList {
        self.lock().props.clone()
    }

    pub fn resolver(&self) -> &Arc<ThemeResolver> {
        &self.resolver
    }

    /// Fire-and-forget playback
    pub fn play(&self, id: u32, req: &PropList) -> KaResult<()> {
        self.start_play(id, req, None)
    }

    /// Play with a completion callback. On `Ok` the callback fires exactly
    /// once, from another thread, with the terminal result.
    pub fn play_full<F>(&self, id: u32, req: &PropList, callback: F) -> KaResult<()>
    where
        F: FnOnce(u32, KaResult<()>) + Send + 'static,
    {
        self.start_play(id, req, Some(Box::new(callback)))
    }

    fn start_play(&self, id: u32, req: &PropList, callback: Option<FinishCallback>) -> KaResult<()> {
        self.check_fork()?;

        let (backend, ctx_props) = {
            let mut state = self.lock();
            let named = [props::EVENT_ID, props::MEDIA_FILENAME]
                .iter()
                .any(|key| req.contains(key) || state.props.contains(key));
            if !named {
                return Err(KaError::Invalid);
            }

            let enable = PropList::gets_either(props::ENABLE, req, &state.props);
            if enable == Some("0") {
                return Err(KaError::Disabled);
            }

            (self.open_locked(&mut state)?, state.props.clone())
        };

        backend.play(id, req, &ctx_props, callback)
    }

    /// Cancel playbacks started with `id`
    pub fn cancel(&self, id: u32) -> KaResult<()> {
        self.check_fork()?;
        let backend = self.lock().backend.clone().ok_or(KaError::State)?;
        backend.cancel(id)
    }

    pub fn playing(&self, id: u32) -> KaResult<bool> {
        self.check_fork()?;
        let backend = self.lock().backend.clone().ok_or(KaError::State)?;
        backend.playing(id)
    }

    /// Preload the sound for `req` into the driver's sample cache
    pub fn cache(&self, req: &PropList) -> KaResult<()> {
        self.check_fork()?;

        let (backend, ctx_props) = {
            let mut state = self.lock();
            if !req.contains(props::EVENT_ID) && !state.props.contains(props::EVENT_ID) {
                return Err(KaError::Invalid);
            }
            (self.open_locked(&mut state)?, state.props.clone())
        };

        backend.cache(req, &ctx_props)
    }

    /// Close the driver. Blocks until every outstanding playback has
    /// delivered its callback (with DESTROYED if it had not finished).
    /// The context can be opened again afterwards.
    pub fn destroy(&self) -> KaResult<()> {
        self.check_fork()?;
        let backend = self.lock().backend.take();
        match backend {
            Some(backend) => {
                log::debug!("[CONTEXT] Destroying driver {}", backend.name());
                backend.destroy()
            }
            None => Ok(()),
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if std::process::id() != self.pid {
            return;
        }
        if let Err(e) = self.destroy() {
            log::warn!("[CONTEXT] Destroy failed: {}", e);
        }
    }
}
