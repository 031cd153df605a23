use crate::id::LayerID;
use crate::state::graph::{Detached, TextData};
use crate::state::transform::Matrix;
use crate::util::{Rect, Size};
use image::{GrayImage, RgbaImage};

/// A simple layer attribute, carried by value.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerProperty {
    Name(String),
    Visible(bool),
    Locked(bool),
    Opacity(f32),
    Transform(Matrix),
}
impl LayerProperty {
    /// Whether two values describe the same attribute.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One reversible change to an [`super::ImageStack`]. Every variant carries both the old and new state,
/// so applying it is checked against the current state and undoing it is exact.
#[derive(Clone, Debug)]
pub enum StackCommand {
    /// Parts of one larger operation, applied atomically.
    Scope(Box<[StackCommand]>),
    LayerCreated {
        /// The new layer (and, for restored groups, its children).
        subtree: Detached,
        parent: LayerID,
        index: usize,
    },
    LayerRemoved {
        subtree: Detached,
        parent: LayerID,
        index: usize,
    },
    /// Indices are the clamped positions actually occupied.
    Reparented {
        target: LayerID,
        old: (LayerID, usize),
        new: (LayerID, usize),
    },
    PropertyChanged {
        target: LayerID,
        old: LayerProperty,
        new: LayerProperty,
    },
    /// Image content replaced, possibly along with its placement (crop, resize, paint, merge).
    ImageChanged {
        target: LayerID,
        old: RgbaImage,
        new: RgbaImage,
        old_transform: Matrix,
        new_transform: Matrix,
    },
    TextChanged {
        target: LayerID,
        old: TextData,
        new: TextData,
    },
    SelectionChanged {
        old: GrayImage,
        new: GrayImage,
    },
    GenerationAreaChanged {
        old: Rect,
        new: Rect,
    },
    ActiveChanged {
        old: Option<LayerID>,
        new: Option<LayerID>,
    },
    /// Only the document size. Layer and mask content changes are separate members of the same scope.
    DocumentResized {
        old: Size,
        new: Size,
    },
}
impl StackCommand {
    /// Bundle several commands to be applied atomically. A single command is returned as-is.
    #[must_use]
    pub fn atoms(mut commands: Vec<StackCommand>) -> Self {
        if commands.len() == 1 {
            // Unwrap ok - length checked.
            return commands.pop().unwrap();
        }
        Self::Scope(commands.into_boxed_slice())
    }
    /// Short name for logging and history labels.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scope(..) => "scope",
            Self::LayerCreated { .. } => "create layer",
            Self::LayerRemoved { .. } => "remove layer",
            Self::Reparented { .. } => "move layer",
            Self::PropertyChanged { new, .. } => match new {
                LayerProperty::Name(_) => "rename layer",
                LayerProperty::Visible(_) => "layer visibility",
                LayerProperty::Locked(_) => "layer lock",
                LayerProperty::Opacity(_) => "layer opacity",
                LayerProperty::Transform(_) => "layer transform",
            },
            Self::ImageChanged { .. } => "image content",
            Self::TextChanged { .. } => "text content",
            Self::SelectionChanged { .. } => "selection",
            Self::GenerationAreaChanged { .. } => "generation area",
            Self::ActiveChanged { .. } => "active layer",
            Self::DocumentResized { .. } => "resize document",
        }
    }
}
