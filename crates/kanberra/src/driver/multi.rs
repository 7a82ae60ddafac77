//! Fan-out driver: several backends behind one handle
//!
//! `play` and `cache` go to the members in order and the first one that
//! accepts takes the request. Everything else is broadcast to every member;
//! the first error is reported but does not stop the broadcast.

use std::sync::{Arc, Mutex};

use super::loader::{entries, MULTI_DRIVER};
use super::{Driver, DriverSetup, FinishCallback};
use crate::error::{KaError, KaResult};
use crate::proplist::PropList;

pub struct MultiDriver {
    members: Vec<Box<dyn Driver>>,
}

/// Opener registered as `multi`. Members come from the driver list after
/// the leading `multi`, or the automatic order when the list names none.
pub fn open(setup: &DriverSetup<'_>) -> KaResult<Box<dyn Driver>> {
    let mut names: Vec<&str> = setup.driver.map(|spec| entries(spec).collect()).unwrap_or_default();
    if names.first() == Some(&MULTI_DRIVER) {
        names.remove(0);
    }
    if names.is_empty() {
        names = setup.registry.auto_order();
    }

    let mut members: Vec<Box<dyn Driver>> = Vec::new();
    let mut first_error = None;

    for name in names {
        match open_member(setup, &members, name) {
            Ok(driver) => members.push(driver),
            Err(e) => {
                log::debug!("[MULTI] Skipping {}: {}", name, e);
                first_error.get_or_insert(e);
            }
        }
    }

    if members.is_empty() {
        return Err(first_error.unwrap_or(KaError::NoDriver));
    }

    log::info!(
        "[MULTI] Opened with {}",
        members.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(Box::new(MultiDriver { members }))
}

fn open_member(setup: &DriverSetup<'_>, members: &[Box<dyn Driver>], name: &str) -> KaResult<Box<dyn Driver>> {
    let key = super::normalize_name(name);
    if key == MULTI_DRIVER || members.iter().any(|m| m.name() == key) {
        return Err(KaError::NotAvailable);
    }
    let member_setup = DriverSetup {
        driver: Some(name),
        ..setup.clone()
    };
    setup.registry.open_named(name, &member_setup)
}

impl MultiDriver {
    pub fn new(members: Vec<Box<dyn Driver>>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name())
    }

    fn broadcast<F>(&self, mut op: F) -> KaResult<()>
    where
        F: FnMut(&dyn Driver) -> KaResult<()>,
    {
        let mut first_error = None;
        for member in &self.members {
            if let Err(e) = op(member.as_ref()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// One shared slot so that whichever member ends up accepting the request
/// can fire the caller's callback
type CallbackSlot = Arc<Mutex<Option<FinishCallback>>>;

fn forward(slot: &CallbackSlot) -> FinishCallback {
    let slot = Arc::clone(slot);
    Box::new(move |id, result| {
        let callback = slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(callback) = callback {
            callback(id, result);
        }
    })
}

impl Driver for MultiDriver {
    fn name(&self) -> &str {
        MULTI_DRIVER
    }

    fn destroy(&self) -> KaResult<()> {
        self.broadcast(|m| m.destroy())
    }

    fn change_device(&self, _device: Option<&str>) -> KaResult<()> {
        Err(KaError::NotSupported)
    }

    fn change_props(&self, changed: &PropList, merged: &PropList) -> KaResult<()> {
        self.broadcast(|m| m.change_props(changed, merged))
    }

    fn play(
        &self,
        id: u32,
        req: &PropList,
        ctx: &PropList,
        callback: Option<FinishCallback>,
    ) -> KaResult<()> {
        let slot: Option<CallbackSlot> = callback.map(|cb| Arc::new(Mutex::new(Some(cb))));
        let mut first_error = None;

        for member in &self.members {
            match member.play(id, req, ctx, slot.as_ref().map(forward)) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or(KaError::NoDriver))
    }

    fn cancel(&self, id: u32) -> KaResult<()> {
        self.broadcast(|m| m.cancel(id))
    }

    fn cache(&self, req: &PropList, ctx: &PropList) -> KaResult<()> {
        let mut first_error = None;
        for member in &self.members {
            match member.cache(req, ctx) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(KaError::NoDriver))
    }

    /// True if any member is playing `id`. Errors only surface when no
    /// member reports the id.
    fn playing(&self, id: u32) -> KaResult<bool> {
        let mut first_error = None;
        for member in &self.members {
            match member.playing(id) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(false), Err)
    }
}
