//! Driver contract
//!
//! A driver is an opened backend. Opening happens through a [`DriverOpener`]
//! registered in the [`DriverRegistry`]; once constructed the driver is
//! shared behind an `Arc` and every operation takes `&self`, so drivers do
//! their own locking.
//!
//! `play` and `cache` follow one rule: if they return `Ok`, the callback
//! (when given) fires exactly once, later. If they return an error, it never
//! fires.

mod loader;
pub mod multi;

use std::sync::Arc;

use crate::error::KaResult;
use crate::proplist::PropList;
use crate::theme::ThemeResolver;

pub use crate::registry::FinishCallback;
pub use loader::{normalize_name, DriverRegistry, DRIVER_ORDER, MULTI_DRIVER};
pub use multi::MultiDriver;

/// Everything a backend needs to open
#[derive(Clone)]
pub struct DriverSetup<'a> {
    /// Driver name or list as configured (`None` selects automatically)
    pub driver: Option<&'a str>,
    /// Backend specific device string
    pub device: Option<&'a str>,
    /// Context properties at open time
    pub props: &'a PropList,
    pub resolver: Arc<ThemeResolver>,
    /// Lets composite drivers open their members
    pub registry: &'a DriverRegistry,
}

pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Tear down: outstanding operations finish with DESTROYED before this
    /// returns
    fn destroy(&self) -> KaResult<()>;

    fn change_device(&self, device: Option<&str>) -> KaResult<()>;

    /// `changed` holds just the new pairs, `merged` the full context bag
    fn change_props(&self, changed: &PropList, merged: &PropList) -> KaResult<()>;

    fn play(
        &self,
        id: u32,
        req: &PropList,
        ctx: &PropList,
        callback: Option<FinishCallback>,
    ) -> KaResult<()>;

    /// Best effort; matching zero operations is not an error
    fn cancel(&self, id: u32) -> KaResult<()>;

    /// Preload the sound for `req`. NOTSUPPORTED if the backend has no
    /// sample cache.
    fn cache(&self, req: &PropList, ctx: &PropList) -> KaResult<()>;

    fn playing(&self, id: u32) -> KaResult<bool>;
}

/// Opens a backend
pub type DriverOpener = dyn Fn(&DriverSetup<'_>) -> KaResult<Box<dyn Driver>> + Send + Sync;
