//! Headless document model for IntraPaint: the layer tree, selection, undo history and document format.

pub mod commands;
pub mod id;
pub mod io;
pub mod notify;
pub mod raster;
pub mod state;
pub mod undo;
pub mod util;

pub use state::{Document, EditError, EditMode};
