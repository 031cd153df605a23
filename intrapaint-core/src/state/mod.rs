pub mod document;
pub mod graph;
pub mod selection;
pub mod stack;
pub mod transform;

pub use document::Document;

use crate::commands::CommandError;
use crate::id::LayerID;
use crate::undo::UndoError;
use crate::util::Size;

/// How generated content is applied to the document.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::AsRefStr,
    strum::EnumIter,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EditMode {
    /// Regenerate only the selected part of the generation area.
    #[default]
    Inpaint,
    /// Regenerate the whole generation area from its current content.
    Img2Img,
    /// Generate from the prompt alone.
    Txt2Img,
}

/// Everything that can stop a document edit. Always raised before any state changes.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error(transparent)]
    Locked(#[from] graph::LockedError),
    #[error("no such layer {0}")]
    InvalidReference(LayerID),
    #[error(transparent)]
    Target(#[from] graph::TargetError),
    #[error("can't move {0} into itself or its own children")]
    Cycle(LayerID),
    #[error("no layer is active")]
    NoActiveLayer,
    #[error("nothing below {0} to merge into")]
    NoLayerBelow(LayerID),
    #[error("the selection is empty")]
    EmptySelection,
    #[error("{0} has no content")]
    EmptyLayer(LayerID),
    #[error("{layer} is a {found} layer, expected {expected}")]
    IncompatibleLayer {
        layer: LayerID,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} is hidden")]
    HiddenLayer(LayerID),
    #[error("the selection layer can't be removed or rearranged")]
    SelectionLayer,
    #[error("invalid size {}x{}", .0.width, .0.height)]
    InvalidSize(Size),
    #[error("{0} is transformed down to nothing")]
    DegenerateTransform(LayerID),
    #[error("concurrent document change: attempted {attempted:?} while {in_progress:?} is in progress")]
    ConcurrentChange {
        attempted: String,
        in_progress: String,
    },
    #[error("can't open {attempted:?} group while {open:?} group is still open")]
    GroupAlreadyOpen { attempted: String, open: String },
    #[error("change could not be applied: {0}")]
    Command(#[from] CommandError),
}
impl From<UndoError> for EditError {
    fn from(value: UndoError) -> Self {
        match value {
            UndoError::ConcurrentChange {
                attempted,
                in_progress,
            } => Self::ConcurrentChange {
                attempted,
                in_progress,
            },
            UndoError::GroupAlreadyOpen { attempted, open } => {
                Self::GroupAlreadyOpen { attempted, open }
            }
            UndoError::Transaction { source, .. } => Self::Command(source),
        }
    }
}
impl From<graph::ReparentError> for EditError {
    fn from(value: graph::ReparentError) -> Self {
        match value {
            graph::ReparentError::TargetError(err) | graph::ReparentError::DestinationError(err) => {
                Self::Target(err)
            }
            // Callers check for cycles with the layer at hand, this is a fallback.
            graph::ReparentError::WouldCycle => Self::Cycle(LayerID::ROOT),
        }
    }
}
