//! PixelPortal: a layered pixel-art raster editor core.
//!
//! [`document::Document`] is the entry point. It owns a layer stack, an
//! optional selection and an undo history; every edit goes through a
//! reversible [`components::history::Command`].

pub mod canvas;
pub mod cli;
pub mod components;
pub mod document;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod selection;
pub mod settings;

pub use canvas::{PixelRect, RasterBuffer};
pub use document::Document;
pub use error::{EditorError, Result};
