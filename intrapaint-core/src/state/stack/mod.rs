//! # Image stack
//!
//! The whole editable state of one document: the layer tree, the selection mask, the active layer,
//! the generation area and the document size.
//!
//! Changes are made exclusively by applying [`StackCommand`]s, which the `*_command` builders produce after
//! validating the request against the current state. Building never mutates, so a rejected request leaves
//! the stack untouched. Every applied command is announced on the stack's change bus.

pub mod commands;

pub use commands::{LayerProperty, StackCommand};

use super::graph::{Detached, LayerGraph, LayerKind, LayerNode, Location, TextData};
use super::selection::{SelectionLayer, SelectionMode, Shape};
use super::transform::Matrix;
use super::{EditError, EditMode};
use crate::commands::{apply_scope, CommandConsumer, CommandError, DoUndo};
use crate::id::{LayerID, LayerIDServer};
use crate::notify::{ChangeBus, Coalesce, Subscription};
use crate::raster;
use crate::util::{Anchor, Point, Rect, Size};
use image::{GrayImage, Luma, RgbaImage};

/// Smallest generation area edge, in pixels.
pub const MIN_GENERATION_AREA: u32 = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::AsRefStr)]
pub enum ChangeKind {
    Content,
    Visibility,
    Lock,
    Name,
    Transform,
    Bounds,
    Opacity,
    Text,
    /// Layers added, removed or rearranged. `layer` is the affected parent group.
    Structure,
    ActiveLayer,
    Selection,
    GenerationArea,
    Size,
}
bitflags::bitflags! {
    /// Filter for [`ImageStack::subscribe`].
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ChangeKinds: u16 {
        const CONTENT = 1 << 0;
        const VISIBILITY = 1 << 1;
        const LOCK = 1 << 2;
        const NAME = 1 << 3;
        const TRANSFORM = 1 << 4;
        const BOUNDS = 1 << 5;
        const OPACITY = 1 << 6;
        const TEXT = 1 << 7;
        const STRUCTURE = 1 << 8;
        const ACTIVE_LAYER = 1 << 9;
        const SELECTION = 1 << 10;
        const GENERATION_AREA = 1 << 11;
        const SIZE = 1 << 12;
    }
}
impl From<ChangeKind> for ChangeKinds {
    fn from(value: ChangeKind) -> Self {
        match value {
            ChangeKind::Content => Self::CONTENT,
            ChangeKind::Visibility => Self::VISIBILITY,
            ChangeKind::Lock => Self::LOCK,
            ChangeKind::Name => Self::NAME,
            ChangeKind::Transform => Self::TRANSFORM,
            ChangeKind::Bounds => Self::BOUNDS,
            ChangeKind::Opacity => Self::OPACITY,
            ChangeKind::Text => Self::TEXT,
            ChangeKind::Structure => Self::STRUCTURE,
            ChangeKind::ActiveLayer => Self::ACTIVE_LAYER,
            ChangeKind::Selection => Self::SELECTION,
            ChangeKind::GenerationArea => Self::GENERATION_AREA,
            ChangeKind::Size => Self::SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeValue {
    None,
    Bool(bool),
    Opacity(f32),
    Name(String),
    Rect(Rect),
    Size(Size),
    Layer(Option<LayerID>),
    Transform(Matrix),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub layer: Option<LayerID>,
    pub value: ChangeValue,
}
impl Coalesce for ChangeEvent {
    fn supersedes(&self, earlier: &Self) -> bool {
        self.kind == earlier.kind && self.layer == earlier.layer
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GenerationAreaConstraints {
    /// Size generated images are requested at.
    pub generation_size: Size,
    /// Snap the area to the aspect ratio of `generation_size`.
    pub fixed_aspect: bool,
}
impl Default for GenerationAreaConstraints {
    fn default() -> Self {
        Self {
            generation_size: Size::new(512, 512),
            fixed_aspect: false,
        }
    }
}

#[derive(Debug)]
pub struct ImageStack {
    uuid: uuid::Uuid,
    graph: LayerGraph,
    selection: SelectionLayer,
    active: Option<LayerID>,
    generation_area: Rect,
    size: Size,
    ids: LayerIDServer,
    constraints: GenerationAreaConstraints,
    bus: ChangeBus<ChangeEvent>,
}

/// Raw parts of a stack, as stored by the document format.
pub struct StackParts {
    pub uuid: uuid::Uuid,
    pub graph: LayerGraph,
    pub selection: GrayImage,
    pub active: Option<LayerID>,
    pub generation_area: Rect,
    pub size: Size,
    pub ids: LayerIDServer,
}

impl ImageStack {
    /// An empty document. Fails on zero size.
    pub fn new(size: Size, constraints: GenerationAreaConstraints) -> Result<Self, EditError> {
        if size.is_empty() {
            return Err(EditError::InvalidSize(size));
        }
        let mut this = Self {
            uuid: uuid::Uuid::new_v4(),
            graph: LayerGraph::default(),
            selection: SelectionLayer::new(size),
            active: None,
            generation_area: Rect::from_size(size),
            size,
            ids: LayerIDServer::default(),
            constraints,
            bus: ChangeBus::new(),
        };
        this.generation_area = this.constrain_area(Rect::from_size(constraints.generation_size));
        Ok(this)
    }
    /// Reassemble a stored stack, checking the parts agree with each other.
    pub fn from_parts(
        parts: StackParts,
        constraints: GenerationAreaConstraints,
    ) -> Result<Self, EditError> {
        let StackParts {
            uuid,
            graph,
            selection,
            active,
            generation_area,
            size,
            mut ids,
        } = parts;
        if size.is_empty() || raster::size_of(&selection) != size {
            return Err(EditError::InvalidSize(size));
        }
        if let Some(active) = active {
            if !graph.contains(active) || active == LayerID::ROOT {
                return Err(EditError::InvalidReference(active));
            }
        }
        // Never hand out an id that is already in use, whatever the stored counter says.
        for (id, _) in graph.iter_top_down() {
            ids.reserve_through(id);
        }
        let mut selection_layer = SelectionLayer::new(size);
        selection_layer.replace(selection);
        let mut this = Self {
            uuid,
            graph,
            selection: selection_layer,
            active,
            generation_area,
            size,
            ids,
            constraints,
            bus: ChangeBus::new(),
        };
        this.generation_area = this.constrain_area(generation_area);
        Ok(this)
    }

    #[must_use]
    pub fn uuid(&self) -> uuid::Uuid {
        self.uuid
    }
    #[must_use]
    pub fn graph(&self) -> &LayerGraph {
        &self.graph
    }
    #[must_use]
    pub fn selection(&self) -> &SelectionLayer {
        &self.selection
    }
    #[must_use]
    pub fn active_layer(&self) -> Option<LayerID> {
        self.active
    }
    #[must_use]
    pub fn generation_area(&self) -> Rect {
        self.generation_area
    }
    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }
    #[must_use]
    pub fn next_layer_id(&self) -> u64 {
        self.ids.peek()
    }
    #[must_use]
    pub fn id_server(&self) -> &LayerIDServer {
        &self.ids
    }
    #[must_use]
    pub fn constraints(&self) -> GenerationAreaConstraints {
        self.constraints
    }
    /// Change generation area limits. Not an edit: the current area is re-fit without a history entry.
    pub fn set_constraints(&mut self, constraints: GenerationAreaConstraints) {
        self.constraints = constraints;
        let area = self.constrain_area(self.generation_area);
        if area != self.generation_area {
            self.generation_area = area;
            self.emit(ChangeKind::GenerationArea, None, ChangeValue::Rect(area));
        }
    }
    /// Receive changes of the given kinds.
    pub fn subscribe(&self, kinds: ChangeKinds) -> Subscription<ChangeEvent> {
        self.bus
            .subscribe_filtered(move |event: &ChangeEvent| kinds.contains(event.kind.into()))
    }
    /// The change bus, for holding notifications over several edits.
    #[must_use]
    pub fn bus(&self) -> &ChangeBus<ChangeEvent> {
        &self.bus
    }
    /// Look up a layer of the tree.
    pub fn layer(&self, id: LayerID) -> Result<&LayerNode, EditError> {
        if id == LayerID::SELECTION {
            return Err(EditError::SelectionLayer);
        }
        self.graph.get(id).ok_or(EditError::InvalidReference(id))
    }
    /// All visible image layers composited together.
    #[must_use]
    pub fn flattened(&self) -> RgbaImage {
        self.graph.flatten(self.size)
    }
    /// The flattened document, cropped to the generation area.
    #[must_use]
    pub fn generation_area_content(&self) -> RgbaImage {
        raster::copy_region(&self.flattened(), self.generation_area)
    }
    /// The selection mask, cropped to the generation area.
    #[must_use]
    pub fn selection_mask_content(&self) -> GrayImage {
        raster::copy_region(self.selection.mask(), self.generation_area)
    }
    /// Fit a requested generation area into the document and the current constraints.
    #[must_use]
    pub fn constrain_area(&self, rect: Rect) -> Rect {
        fit_generation_area(rect, self.size, self.constraints)
    }

    fn emit(&self, kind: ChangeKind, layer: Option<LayerID>, value: ChangeValue) {
        self.bus.emit(ChangeEvent { kind, layer, value });
    }
    fn resolve(&self, layer: Option<LayerID>) -> Result<LayerID, EditError> {
        let id = layer.or(self.active).ok_or(EditError::NoActiveLayer)?;
        if id == LayerID::SELECTION {
            return Err(EditError::SelectionLayer);
        }
        if id == LayerID::ROOT {
            return Err(super::graph::TargetError::Root.into());
        }
        if !self.graph.contains(id) {
            return Err(EditError::InvalidReference(id));
        }
        Ok(id)
    }
    fn image_of(&self, id: LayerID) -> Result<&RgbaImage, EditError> {
        let node = self.layer(id)?;
        node.image().ok_or(EditError::IncompatibleLayer {
            layer: id,
            expected: "image",
            found: node.kind().name(),
        })
    }

    // ======== Command builders ========

    /// Where a new layer goes: into the active group, else above the active layer, else the top of the root.
    fn insertion_point(&self, index: Option<usize>) -> (LayerID, usize) {
        let active = self
            .active
            .and_then(|id| self.graph.get(id).map(|node| (id, node)));
        let (parent, default_idx) = match active {
            Some((id, node)) if node.is_group() => (id, 0),
            Some((id, _)) => self.graph.location_of(id).unwrap_or((LayerID::ROOT, 0)),
            None => (LayerID::ROOT, 0),
        };
        let len = self.graph.children(parent).map_or(0, <[LayerID]>::len);
        (parent, index.unwrap_or(default_idx).min(len))
    }
    /// Insert `node` as a new layer, which becomes active.
    /// Allocates the id, so this takes `&mut`, but the stack is otherwise unchanged.
    pub fn create_layer_command(
        &mut self,
        node: LayerNode,
        index: Option<usize>,
    ) -> Result<(StackCommand, LayerID), EditError> {
        let (parent, index) = self.insertion_point(index);
        self.graph.check_unlocked(parent)?;
        let id = self.ids.allocate();
        let created = StackCommand::LayerCreated {
            subtree: Detached::single(id, node),
            parent,
            index,
        };
        let activate = StackCommand::ActiveChanged {
            old: self.active,
            new: Some(id),
        };
        Ok((StackCommand::atoms(vec![created, activate]), id))
    }
    /// Remove a layer (default: the active one) and everything under it.
    pub fn remove_layer_command(&self, layer: Option<LayerID>) -> Result<StackCommand, EditError> {
        let id = self.resolve(layer)?;
        self.graph.check_unlocked(id)?;
        let (parent, index) = self
            .graph
            .location_of(id)
            .ok_or(EditError::InvalidReference(id))?;
        let subtree = self
            .graph
            .snapshot(id)
            .ok_or(EditError::InvalidReference(id))?;

        let mut commands = Vec::with_capacity(2);
        let active_removed = self
            .active
            .is_some_and(|active| active == id || self.graph.ancestors(active).any(|a| a == id));
        if active_removed {
            let siblings = self.graph.children(parent).unwrap_or_default();
            let next = siblings
                .get(index + 1)
                .or_else(|| index.checked_sub(1).and_then(|above| siblings.get(above)))
                .copied()
                .or((parent != LayerID::ROOT).then_some(parent));
            commands.push(StackCommand::ActiveChanged {
                old: self.active,
                new: next,
            });
        }
        commands.push(StackCommand::LayerRemoved {
            subtree,
            parent,
            index,
        });
        Ok(StackCommand::atoms(commands))
    }
    /// Move a layer up (negative) or down (positive) among its siblings.
    /// `None` if the layer is already at that end of its group.
    pub fn move_by_offset_command(
        &self,
        offset: isize,
        layer: Option<LayerID>,
    ) -> Result<Option<StackCommand>, EditError> {
        let id = self.resolve(layer)?;
        self.graph.check_unlocked(id)?;
        let (parent, index) = self
            .graph
            .location_of(id)
            .ok_or(EditError::InvalidReference(id))?;
        let last = self.graph.children(parent).map_or(0, |c| c.len() - 1);
        let target = index.saturating_add_signed(offset).min(last);
        if target == index {
            return Ok(None);
        }
        Ok(Some(StackCommand::Reparented {
            target: id,
            old: (parent, index),
            new: (parent, target),
        }))
    }
    /// Move a layer into `new_parent` at `index` (clamped). `None` if it's already there.
    pub fn set_parent_command(
        &self,
        layer: LayerID,
        new_parent: LayerID,
        index: usize,
    ) -> Result<Option<StackCommand>, EditError> {
        let id = self.resolve(Some(layer))?;
        if new_parent == LayerID::SELECTION {
            return Err(EditError::SelectionLayer);
        }
        let parent_node = self
            .graph
            .get(new_parent)
            .ok_or(EditError::InvalidReference(new_parent))?;
        if !parent_node.is_group() {
            return Err(EditError::IncompatibleLayer {
                layer: new_parent,
                expected: "group",
                found: parent_node.kind().name(),
            });
        }
        self.graph.check_unlocked(id)?;
        self.graph.check_unlocked(new_parent)?;
        if new_parent == id || self.graph.ancestors(new_parent).any(|a| a == id) {
            return Err(EditError::Cycle(id));
        }
        let old = self
            .graph
            .location_of(id)
            .ok_or(EditError::InvalidReference(id))?;
        // Index in the parent after the layer was taken out.
        let mut len = parent_node.children().map_or(0, <[LayerID]>::len);
        if old.0 == new_parent {
            len -= 1;
        }
        let new = (new_parent, index.min(len));
        if new == old {
            return Ok(None);
        }
        Ok(Some(StackCommand::Reparented { target: id, old, new }))
    }
    /// Composite an image layer onto the image layer below it, then remove it.
    pub fn merge_down_command(&self, layer: Option<LayerID>) -> Result<StackCommand, EditError> {
        let upper = self.resolve(layer)?;
        let upper_image = self.image_of(upper)?;
        self.graph.check_unlocked(upper)?;
        let (parent, index) = self
            .graph
            .location_of(upper)
            .ok_or(EditError::InvalidReference(upper))?;
        let lower = self
            .graph
            .children(parent)
            .and_then(|siblings| siblings.get(index + 1))
            .copied()
            .ok_or(EditError::NoLayerBelow(upper))?;
        let lower_image = self.image_of(lower)?;
        let lower_node = self.layer(lower)?;
        if !lower_node.visible {
            return Err(EditError::HiddenLayer(lower));
        }
        self.graph.check_unlocked(lower)?;

        let to_lower = self
            .graph
            .document_transform(lower)
            .inverse()
            .ok_or(EditError::DegenerateTransform(lower))?;
        let upper_to_lower = self.graph.document_transform(upper).then(&to_lower);
        let mut merged = lower_image.clone();
        raster::composite_transformed(
            &mut merged,
            upper_image,
            &upper_to_lower,
            self.layer(upper)?.opacity(),
        );
        let mut commands = vec![StackCommand::ImageChanged {
            target: lower,
            old: lower_image.clone(),
            new: merged,
            old_transform: lower_node.transform,
            new_transform: lower_node.transform,
        }];
        if self.active != Some(lower) {
            commands.push(StackCommand::ActiveChanged {
                old: self.active,
                new: Some(lower),
            });
        }
        commands.push(StackCommand::LayerRemoved {
            subtree: self
                .graph
                .snapshot(upper)
                .ok_or(EditError::InvalidReference(upper))?,
            parent,
            index,
        });
        Ok(StackCommand::atoms(commands))
    }
    /// Resize a layer's content. Old content keeps its on-screen position, anchored within the new size.
    pub fn resize_layer_command(
        &self,
        layer: Option<LayerID>,
        size: Size,
        anchor: Anchor,
    ) -> Result<StackCommand, EditError> {
        let id = self.resolve(layer)?;
        if size.is_empty() {
            return Err(EditError::InvalidSize(size));
        }
        self.graph.check_unlocked(id)?;
        let node = self.layer(id)?;
        match node.kind() {
            LayerKind::Image(image) => {
                let offset = anchor.offset(raster::size_of(image), size);
                Ok(StackCommand::ImageChanged {
                    target: id,
                    old: image.clone(),
                    new: raster::resize_canvas(image, size, anchor),
                    old_transform: node.transform,
                    new_transform: Matrix::from_translation(-offset.x as f32, -offset.y as f32)
                        .then(&node.transform),
                })
            }
            LayerKind::Text(text) => Ok(StackCommand::TextChanged {
                target: id,
                old: text.clone(),
                new: TextData {
                    size,
                    ..text.clone()
                },
            }),
            LayerKind::Group(_) => Err(EditError::IncompatibleLayer {
                layer: id,
                expected: "image or text",
                found: "group",
            }),
        }
    }
    /// Shrink an image layer to its non-transparent pixels. `None` if it's already tight.
    pub fn crop_to_content_command(
        &self,
        layer: Option<LayerID>,
    ) -> Result<Option<StackCommand>, EditError> {
        let id = self.resolve(layer)?;
        let image = self.image_of(id)?;
        self.graph.check_unlocked(id)?;
        let bounds = raster::content_bounds(image).ok_or(EditError::EmptyLayer(id))?;
        if bounds == Rect::from_size(raster::size_of(image)) {
            return Ok(None);
        }
        let transform = self.layer(id)?.transform;
        Ok(Some(StackCommand::ImageChanged {
            target: id,
            old: image.clone(),
            new: raster::copy_region(image, bounds),
            old_transform: transform,
            new_transform: Matrix::from_translation(bounds.x as f32, bounds.y as f32)
                .then(&transform),
        }))
    }
    /// Change one simple attribute. `None` if it already has that value.
    ///
    /// A locked layer can still be unlocked, as long as none of its parents are locked.
    pub fn property_command(
        &self,
        layer: Option<LayerID>,
        property: LayerProperty,
    ) -> Result<Option<StackCommand>, EditError> {
        let id = self.resolve(layer)?;
        if matches!(property, LayerProperty::Locked(_)) {
            if self.graph.parent_locked(id) {
                return Err(super::graph::LockedError(id).into());
            }
        } else {
            self.graph.check_unlocked(id)?;
        }
        let node = self.layer(id)?;
        let new = match property {
            LayerProperty::Opacity(opacity) => LayerProperty::Opacity(crate::util::clamp_unit(opacity)),
            LayerProperty::Transform(transform) if transform.inverse().is_none() => {
                return Err(EditError::DegenerateTransform(id));
            }
            other => other,
        };
        let old = match &new {
            LayerProperty::Name(_) => LayerProperty::Name(node.name.clone()),
            LayerProperty::Visible(_) => LayerProperty::Visible(node.visible),
            LayerProperty::Locked(_) => LayerProperty::Locked(node.locked),
            LayerProperty::Opacity(_) => LayerProperty::Opacity(node.opacity()),
            LayerProperty::Transform(_) => LayerProperty::Transform(node.transform),
        };
        if old == new {
            return Ok(None);
        }
        Ok(Some(StackCommand::PropertyChanged { target: id, old, new }))
    }
    pub fn text_command(
        &self,
        layer: Option<LayerID>,
        text: TextData,
    ) -> Result<Option<StackCommand>, EditError> {
        let id = self.resolve(layer)?;
        let node = self.layer(id)?;
        let old = node.text_data().ok_or(EditError::IncompatibleLayer {
            layer: id,
            expected: "text",
            found: node.kind().name(),
        })?;
        self.graph.check_unlocked(id)?;
        if *old == text {
            return Ok(None);
        }
        Ok(Some(StackCommand::TextChanged {
            target: id,
            old: old.clone(),
            new: text,
        }))
    }
    /// Replace an image layer's pixels and placement outright.
    pub fn image_command(
        &self,
        layer: Option<LayerID>,
        image: RgbaImage,
        transform: Option<Matrix>,
    ) -> Result<StackCommand, EditError> {
        let id = self.resolve(layer)?;
        let old = self.image_of(id)?;
        self.graph.check_unlocked(id)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(EditError::InvalidSize(raster::size_of(&image)));
        }
        if transform.is_some_and(|t| t.inverse().is_none()) {
            return Err(EditError::DegenerateTransform(id));
        }
        let old_transform = self.layer(id)?.transform;
        Ok(StackCommand::ImageChanged {
            target: id,
            old: old.clone(),
            new: image,
            old_transform,
            new_transform: transform.unwrap_or(old_transform),
        })
    }
    /// Move or resize the generation area. `None` if it wouldn't change.
    #[must_use]
    pub fn generation_area_command(&self, rect: Rect) -> Option<StackCommand> {
        let new = self.constrain_area(rect);
        (new != self.generation_area).then_some(StackCommand::GenerationAreaChanged {
            old: self.generation_area,
            new,
        })
    }
    /// Write generated content into a layer at the generation area, scaled to fit.
    /// In inpaint mode only the selected pixels are replaced.
    pub fn generation_content_command(
        &self,
        image: &RgbaImage,
        layer: Option<LayerID>,
        mode: EditMode,
    ) -> Result<StackCommand, EditError> {
        let id = self.resolve(layer)?;
        let old = self.image_of(id)?;
        self.graph.check_unlocked(id)?;
        let area = self.generation_area;
        if mode == EditMode::Inpaint && self.selection.is_empty() {
            return Err(EditError::EmptySelection);
        }
        let mut content = raster::scale_to(image, area.size());
        let placement = self.graph.document_transform(id);
        let origin = placement.pixel_offset();
        let at = Point::new(area.x - origin.x, area.y - origin.y);
        let mut new = old.clone();
        if !placement.is_translation() {
            // Resample the area into the layer's own pixel grid.
            let layer_to_area =
                placement.then(&Matrix::from_translation(-area.x as f32, -area.y as f32));
            let covered = if mode == EditMode::Inpaint {
                raster::copy_region(self.selection.mask(), area)
            } else {
                GrayImage::from_pixel(area.width, area.height, Luma([255]))
            };
            let size = raster::size_of(&new);
            let covered = raster::warp(&covered, size, &layer_to_area);
            let mut content = raster::warp(&content, size, &layer_to_area);
            raster::apply_mask(&mut content, &covered, Point::default());
            raster::cut_mask(&mut new, &covered);
            raster::composite_at(&mut new, &content, Point::default(), 1.0);
        } else if mode == EditMode::Inpaint {
            raster::apply_mask(&mut content, self.selection.mask(), area.origin());
            // Clear the covered part first so the generated pixels replace rather than blend.
            let covered = raster::copy_region(self.selection.mask(), area);
            let mut placed = GrayImage::new(new.width(), new.height());
            raster::replace_at(&mut placed, &covered, at);
            raster::cut_mask(&mut new, &placed);
            raster::composite_at(&mut new, &content, at, 1.0);
        } else {
            raster::replace_at(&mut new, &content, at);
        }
        let transform = self.layer(id)?.transform;
        Ok(StackCommand::ImageChanged {
            target: id,
            old: old.clone(),
            new,
            old_transform: transform,
            new_transform: transform,
        })
    }
    /// Replace the selection mask. `None` if unchanged.
    pub fn selection_command(&self, mask: GrayImage) -> Result<Option<StackCommand>, EditError> {
        if raster::size_of(&mask) != self.size {
            return Err(EditError::InvalidSize(raster::size_of(&mask)));
        }
        if mask == *self.selection.mask() {
            return Ok(None);
        }
        Ok(Some(StackCommand::SelectionChanged {
            old: self.selection.mask().clone(),
            new: mask,
        }))
    }
    pub fn select_shape_command(
        &self,
        shape: Shape,
        mode: SelectionMode,
    ) -> Result<Option<StackCommand>, EditError> {
        self.selection_command(self.selection.with_shape(shape, mode))
    }
    /// Change the active layer. `None` if unchanged.
    pub fn active_command(&self, layer: Option<LayerID>) -> Result<Option<StackCommand>, EditError> {
        if let Some(layer) = layer {
            self.resolve(Some(layer))?;
        }
        Ok((layer != self.active).then_some(StackCommand::ActiveChanged {
            old: self.active,
            new: layer,
        }))
    }
    /// Resize the document.
    ///
    /// Image layers covering exactly the old document are reallocated around `anchor`, every other leaf
    /// is moved by the anchor offset. The selection is resized the same way and the generation area is
    /// shifted then re-fit.
    pub fn resize_canvas_command(
        &self,
        size: Size,
        anchor: Anchor,
    ) -> Result<Option<StackCommand>, EditError> {
        if size.is_empty() {
            return Err(EditError::InvalidSize(size));
        }
        if size == self.size {
            return Ok(None);
        }
        let offset = anchor.offset(self.size, size);
        let mut commands = vec![];
        for (id, node) in self.graph.iter_top_down() {
            if node.is_group() {
                continue;
            }
            self.graph.check_unlocked(id)?;
            let full_canvas = node.content_size() == Some(self.size)
                && self.graph.document_transform(id).is_identity();
            match node.image() {
                Some(image) if full_canvas => commands.push(StackCommand::ImageChanged {
                    target: id,
                    old: image.clone(),
                    new: raster::resize_canvas(image, size, anchor),
                    old_transform: node.transform,
                    new_transform: node.transform,
                }),
                _ if offset != Point::default() => {
                    // The shift is in document space, the transform in parent space.
                    let shift = [offset.x as f32, offset.y as f32];
                    let [dx, dy] = self
                        .graph
                        .parent_transform(id)
                        .inverse()
                        .map_or(shift, |to_parent| to_parent.map_vector(shift));
                    commands.push(StackCommand::PropertyChanged {
                        target: id,
                        old: LayerProperty::Transform(node.transform),
                        new: LayerProperty::Transform(node.transform.translated(dx, dy)),
                    });
                }
                _ => (),
            }
        }
        commands.push(StackCommand::SelectionChanged {
            old: self.selection.mask().clone(),
            new: self.selection.resized(size, anchor),
        });
        commands.push(StackCommand::DocumentResized {
            old: self.size,
            new: size,
        });
        let moved = self.generation_area.translated(offset.x, offset.y);
        let fitted = fit_generation_area(moved, size, self.constraints);
        if fitted != self.generation_area {
            commands.push(StackCommand::GenerationAreaChanged {
                old: self.generation_area,
                new: fitted,
            });
        }
        Ok(Some(StackCommand::atoms(commands)))
    }
    // ======== Command application ========

    fn insert_subtree(
        &mut self,
        subtree: &Detached,
        parent: LayerID,
        index: usize,
    ) -> Result<(), CommandError> {
        let root = subtree.root();
        let placed = self
            .graph
            .attach(subtree.clone(), Location::new(parent, index))
            .map_err(|_| CommandError::MismatchedState)?;
        if placed != index {
            let _ = self.graph.detach(root);
            return Err(CommandError::MismatchedState);
        }
        self.emit(ChangeKind::Structure, Some(parent), ChangeValue::None);
        Ok(())
    }
    fn take_subtree(&mut self, root: LayerID, parent: LayerID, index: usize) -> Result<(), CommandError> {
        if self.graph.location_of(root) != Some((parent, index)) {
            return Err(CommandError::MismatchedState);
        }
        self.graph
            .detach(root)
            .map_err(|_| CommandError::UnknownResource)?;
        self.emit(ChangeKind::Structure, Some(parent), ChangeValue::None);
        Ok(())
    }
    fn set_property(&mut self, target: LayerID, from: &LayerProperty, to: &LayerProperty) -> Result<(), CommandError> {
        let node = self
            .graph
            .get_mut(target)
            .ok_or(CommandError::UnknownResource)?;
        if !from.same_kind(to) {
            return Err(CommandError::MismatchedState);
        }
        let current = match from {
            LayerProperty::Name(_) => LayerProperty::Name(node.name.clone()),
            LayerProperty::Visible(_) => LayerProperty::Visible(node.visible),
            LayerProperty::Locked(_) => LayerProperty::Locked(node.locked),
            LayerProperty::Opacity(_) => LayerProperty::Opacity(node.opacity()),
            LayerProperty::Transform(_) => LayerProperty::Transform(node.transform),
        };
        if current != *from {
            return Err(CommandError::MismatchedState);
        }
        let (kind, value) = match to.clone() {
            LayerProperty::Name(name) => {
                node.name.clone_from(&name);
                (ChangeKind::Name, ChangeValue::Name(name))
            }
            LayerProperty::Visible(visible) => {
                node.visible = visible;
                (ChangeKind::Visibility, ChangeValue::Bool(visible))
            }
            LayerProperty::Locked(locked) => {
                node.locked = locked;
                (ChangeKind::Lock, ChangeValue::Bool(locked))
            }
            LayerProperty::Opacity(opacity) => {
                node.set_opacity(opacity);
                (ChangeKind::Opacity, ChangeValue::Opacity(node.opacity()))
            }
            LayerProperty::Transform(transform) => {
                let moved = node.transform != transform;
                node.transform = transform;
                if moved {
                    self.emit_bounds(target);
                }
                (ChangeKind::Transform, ChangeValue::Transform(transform))
            }
        };
        self.emit(kind, Some(target), value);
        Ok(())
    }
    fn emit_bounds(&self, target: LayerID) {
        if let Some(bounds) = self.graph.bounds(target) {
            self.emit(ChangeKind::Bounds, Some(target), ChangeValue::Rect(bounds));
        }
    }
    fn set_image(
        &mut self,
        target: LayerID,
        (from, from_transform): (&RgbaImage, &Matrix),
        (to, to_transform): (&RgbaImage, &Matrix),
    ) -> Result<(), CommandError> {
        let node = self
            .graph
            .get_mut(target)
            .ok_or(CommandError::UnknownResource)?;
        let transform = node.transform;
        let image = node.image_mut().ok_or(CommandError::MismatchedState)?;
        // Full pixel comparison would be too slow for large layers, size and placement must do.
        if raster::size_of(image) != raster::size_of(from) || transform != *from_transform {
            return Err(CommandError::MismatchedState);
        }
        let resized = raster::size_of(image) != raster::size_of(to);
        image.clone_from(to);
        node.transform = *to_transform;
        self.emit(ChangeKind::Content, Some(target), ChangeValue::None);
        if transform != *to_transform {
            self.emit(
                ChangeKind::Transform,
                Some(target),
                ChangeValue::Transform(*to_transform),
            );
        }
        if resized || transform != *to_transform {
            self.emit_bounds(target);
        }
        Ok(())
    }
}

/// `(from, to)`, swapped when undoing.
fn pick<T>(undo: bool, old: T, new: T) -> (T, T) {
    if undo {
        (new, old)
    } else {
        (old, new)
    }
}

/// Clamp a generation area into a document of `size`, honoring the minimum size and aspect constraint.
#[must_use]
pub fn fit_generation_area(rect: Rect, size: Size, constraints: GenerationAreaConstraints) -> Rect {
    let document = Rect::from_size(size);
    let min_w = MIN_GENERATION_AREA.min(size.width);
    let min_h = MIN_GENERATION_AREA.min(size.height);
    let mut width = rect.width.clamp(min_w, size.width);
    let mut height = rect.height.clamp(min_h, size.height);
    let target = constraints.generation_size;
    if constraints.fixed_aspect && !target.is_empty() {
        let aspect = f64::from(target.width) / f64::from(target.height);
        let (mut w, mut h) = (f64::from(width), f64::from(width) / aspect);
        if h < f64::from(min_h) {
            h = f64::from(min_h);
            w = h * aspect;
        }
        // Shrink both sides together, the aspect beats the minimum size.
        let scale = (f64::from(size.width) / w)
            .min(f64::from(size.height) / h)
            .min(1.0);
        width = ((w * scale).round() as u32).clamp(1, size.width);
        height = ((h * scale).round() as u32).clamp(1, size.height);
    }
    Rect::new(rect.x, rect.y, width, height).clamped_into(&document)
}

impl CommandConsumer<StackCommand> for ImageStack {
    fn apply(&mut self, command: DoUndo<'_, StackCommand>) -> Result<(), CommandError> {
        let undo = command.is_undo();
        let cmd = command.command();
        log::trace!(
            "{} {}",
            if undo { "Undo" } else { "Do" },
            cmd.label()
        );
        match cmd {
            StackCommand::Scope(commands) => {
                let bus = self.bus.clone();
                bus.batch(|| apply_scope(self, commands, undo))
            }
            StackCommand::LayerCreated {
                subtree,
                parent,
                index,
            } => {
                if undo {
                    self.take_subtree(subtree.root(), *parent, *index)
                } else {
                    self.insert_subtree(subtree, *parent, *index)
                }
            }
            StackCommand::LayerRemoved {
                subtree,
                parent,
                index,
            } => {
                if undo {
                    self.insert_subtree(subtree, *parent, *index)
                } else {
                    self.take_subtree(subtree.root(), *parent, *index)
                }
            }
            StackCommand::Reparented { target, old, new } => {
                let (from, to) = pick(undo, old, new);
                if self.graph.location_of(*target) != Some(*from) {
                    return Err(CommandError::MismatchedState);
                }
                self.graph
                    .reparent(*target, Location::new(to.0, to.1))
                    .map_err(|_| CommandError::MismatchedState)?;
                self.emit(ChangeKind::Structure, Some(from.0), ChangeValue::None);
                if from.0 != to.0 {
                    self.emit(ChangeKind::Structure, Some(to.0), ChangeValue::None);
                }
                Ok(())
            }
            StackCommand::PropertyChanged { target, old, new } => {
                let (from, to) = pick(undo, old, new);
                self.set_property(*target, from, to)
            }
            StackCommand::ImageChanged {
                target,
                old,
                new,
                old_transform,
                new_transform,
            } => {
                let (from, to) = pick(undo, (old, old_transform), (new, new_transform));
                self.set_image(*target, from, to)
            }
            StackCommand::TextChanged { target, old, new } => {
                let (from, to) = pick(undo, old, new);
                let node = self
                    .graph
                    .get_mut(*target)
                    .ok_or(CommandError::UnknownResource)?;
                let text = node.text_data_mut().ok_or(CommandError::MismatchedState)?;
                if text != from {
                    return Err(CommandError::MismatchedState);
                }
                let resized = text.size != to.size;
                text.clone_from(to);
                self.emit(ChangeKind::Text, Some(*target), ChangeValue::None);
                if resized {
                    self.emit_bounds(*target);
                }
                Ok(())
            }
            StackCommand::SelectionChanged { old, new } => {
                let (from, to) = pick(undo, old, new);
                if self.selection.size() != raster::size_of(from) {
                    return Err(CommandError::MismatchedState);
                }
                self.selection.replace(to.clone());
                let value = self
                    .selection
                    .bounds()
                    .map_or(ChangeValue::None, ChangeValue::Rect);
                self.emit(ChangeKind::Selection, None, value);
                Ok(())
            }
            StackCommand::GenerationAreaChanged { old, new } => {
                let (from, to) = pick(undo, old, new);
                if self.generation_area != *from {
                    return Err(CommandError::MismatchedState);
                }
                self.generation_area = *to;
                self.emit(ChangeKind::GenerationArea, None, ChangeValue::Rect(*to));
                Ok(())
            }
            StackCommand::ActiveChanged { old, new } => {
                let (from, to) = pick(undo, old, new);
                if self.active != *from {
                    return Err(CommandError::MismatchedState);
                }
                if to.is_some_and(|id| !self.graph.contains(id)) {
                    return Err(CommandError::UnknownResource);
                }
                self.active = *to;
                self.emit(ChangeKind::ActiveLayer, *to, ChangeValue::Layer(*to));
                Ok(())
            }
            StackCommand::DocumentResized { old, new } => {
                let (from, to) = pick(undo, old, new);
                if self.size != *from {
                    return Err(CommandError::MismatchedState);
                }
                self.size = *to;
                self.emit(ChangeKind::Size, None, ChangeValue::Size(*to));
                Ok(())
            }
        }
    }
}
