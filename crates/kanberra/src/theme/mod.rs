//! XDG sound theme resolution
//!
//! - [`index`]: parses `index.theme` files into sections, then into a
//!   validated [`ThemeIndex`]
//! - [`data`]: walks `Inherits=` chains into an ordered list of data dirs
//! - [`resolver`]: searches the data dirs (profile, locale and event-name
//!   fallback) and glues in the persistent lookup cache

pub mod data;
pub mod index;
mod resolver;

pub use data::{DataDir, ThemeData, MAX_THEME_DEPTH};
pub use index::{IndexDocument, ThemeIndex};
pub use resolver::{
    locale_candidates, name_candidates, system_locale, Resolved, SoundOpener, SoundQuery, ThemeResolver,
};
