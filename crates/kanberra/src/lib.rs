//! Kanberra - Event sound playback
//!
//! Resolves abstract event names (`"bell"`, `"message-new-instant"`) to
//! sound files through the XDG sound theme trees, caches lookups, and
//! plays them asynchronously through interchangeable backends.
//!
//! ```no_run
//! use kanberra::{props, Context, PropList};
//!
//! let ctx = Context::create()?;
//! let req = PropList::from_strs(&[(props::EVENT_ID, "bell")])?;
//! ctx.play_full(1, &req, |id, result| println!("{} finished: {:?}", id, result))?;
//! # Ok::<(), kanberra::KaError>(())
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod proplist;
pub mod registry;
pub mod sample_cache;
pub mod sound_file;
pub mod theme;

pub use context::Context;
pub use driver::{Driver, DriverRegistry, DriverSetup, FinishCallback};
pub use error::{result_code, strerror, KaError, KaResult};
pub use proplist::{props, PropList};
