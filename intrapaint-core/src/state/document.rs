//! # Document
//!
//! An [`ImageStack`] paired with its undo history. Every edit goes through here, so that it is validated,
//! applied and recorded as one step.

use super::graph::{LayerNode, TextData};
use super::selection::{SelectionLayer, SelectionMode, Shape};
use super::stack::{GenerationAreaConstraints, ImageStack, LayerProperty, StackCommand};
use super::transform::Matrix;
use super::{EditError, EditMode};
use crate::commands::CommandError;
use crate::id::LayerID;
use crate::raster;
use crate::undo::{Commit, Recorded, UndoSettings, UndoStack};
use crate::util::{Anchor, Point, Rect, Size};
use image::{GrayImage, RgbaImage};
use std::sync::Arc;

pub type DocumentID = crate::id::UniqueID<Document>;

#[derive(Debug)]
pub struct Document {
    id: DocumentID,
    stack: ImageStack,
    // Shared so groups can be held open while `self` is borrowed mutably.
    undo: Arc<UndoStack<ImageStack>>,
}

impl Document {
    pub fn new(
        size: Size,
        constraints: GenerationAreaConstraints,
        undo: UndoSettings,
    ) -> Result<Self, EditError> {
        Ok(Self::from_stack(ImageStack::new(size, constraints)?, undo))
    }
    /// Wrap an existing stack, such as a loaded one, with fresh history.
    #[must_use]
    pub fn from_stack(stack: ImageStack, undo: UndoSettings) -> Self {
        Self {
            id: DocumentID::default(),
            stack,
            undo: Arc::new(UndoStack::new(undo)),
        }
    }
    /// Swap in a different stack. History no longer applies and is dropped.
    pub fn replace_stack(&mut self, stack: ImageStack) -> Result<ImageStack, EditError> {
        self.undo.clear()?;
        log::info!("Replacing document {} contents", self.id);
        Ok(std::mem::replace(&mut self.stack, stack))
    }
    #[must_use]
    pub fn id(&self) -> DocumentID {
        self.id
    }
    #[must_use]
    pub fn stack(&self) -> &ImageStack {
        &self.stack
    }
    #[must_use]
    pub fn history(&self) -> &UndoStack<ImageStack> {
        &self.undo
    }
    pub fn set_undo_settings(&self, settings: UndoSettings) {
        self.undo.set_settings(settings);
    }
    pub fn set_constraints(&mut self, constraints: GenerationAreaConstraints) {
        self.stack.set_constraints(constraints);
    }

    /// Apply and record a command.
    pub fn commit(&mut self, command: StackCommand) -> Result<(), EditError> {
        self.undo
            .commit_action(&mut self.stack, Commit::new(command.label(), Recorded(command)))?;
        Ok(())
    }
    /// Apply and record a command if there is one. Returns whether anything changed.
    pub fn commit_if_some(&mut self, command: Option<StackCommand>) -> Result<bool, EditError> {
        match command {
            Some(command) => self.commit(command).map(|()| true),
            None => Ok(false),
        }
    }
    /// Apply a command, folding it into the previous history entry if that was committed under the same
    /// `tag` and `key`. Lets repeated small edits (nudges, typing) undo as one.
    pub fn commit_or_extend<K>(
        &mut self,
        tag: &str,
        key: K,
        command: StackCommand,
    ) -> Result<(), EditError>
    where
        K: PartialEq + std::any::Any + Send,
    {
        let undo = self.undo.clone();
        let unused = undo.last_action(&mut self.stack, tag, |stack, top| {
            match top {
                Some(top) if top.type_tag() == tag && top.merge_data::<K>() == Some(&key) => {
                    top.extend(stack, Recorded(command))?;
                    Ok::<_, CommandError>(None)
                }
                _ => Ok(Some(command)),
            }
        })??;
        if let Some(command) = unused {
            self.undo.commit_action(
                &mut self.stack,
                Commit::new(tag, Recorded(command)).with_merge_data(key),
            )?;
        }
        Ok(())
    }
    /// Run `f`, recording every edit it makes as a single history entry.
    /// Change notifications are held until `f` returns.
    pub fn combining_actions<R>(
        &mut self,
        tag: &str,
        f: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, EditError> {
        let undo = self.undo.clone();
        let bus = self.stack.bus().clone();
        let _group = undo.begin_group(tag)?;
        Ok(bus.batch(|| f(self)))
    }
    /// Returns `Ok(false)` if there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool, EditError> {
        Ok(self.undo.undo(&mut self.stack)?)
    }
    pub fn redo(&mut self) -> Result<bool, EditError> {
        Ok(self.undo.redo(&mut self.stack)?)
    }

    // ======== Layers ========

    fn default_name(&self, kind: &str) -> String {
        format!("{kind} {}", self.stack.next_layer_id())
    }
    /// New image layer, document sized and transparent unless `image` is given. Becomes active.
    pub fn create_layer(
        &mut self,
        name: Option<&str>,
        image: Option<RgbaImage>,
        index: Option<usize>,
    ) -> Result<LayerID, EditError> {
        let name = name.map_or_else(|| self.default_name("layer"), str::to_owned);
        let image = image.unwrap_or_else(|| raster::transparent(self.stack.size()));
        if image.width() == 0 || image.height() == 0 {
            return Err(EditError::InvalidSize(raster::size_of(&image)));
        }
        self.create(LayerNode::new_image(name, image), index)
    }
    pub fn create_layer_group(
        &mut self,
        name: Option<&str>,
        index: Option<usize>,
    ) -> Result<LayerID, EditError> {
        let name = name.map_or_else(|| self.default_name("group"), str::to_owned);
        self.create(LayerNode::new_group(name), index)
    }
    /// New text layer with its box at `position`.
    pub fn create_text_layer(
        &mut self,
        name: Option<&str>,
        text: TextData,
        position: Point,
        index: Option<usize>,
    ) -> Result<LayerID, EditError> {
        if text.size.is_empty() {
            return Err(EditError::InvalidSize(text.size));
        }
        let name = name.map_or_else(|| self.default_name("text"), str::to_owned);
        let mut node = LayerNode::new_text(name, text);
        node.transform = Matrix::from_translation(position.x as f32, position.y as f32);
        self.create(node, index)
    }
    fn create(&mut self, node: LayerNode, index: Option<usize>) -> Result<LayerID, EditError> {
        let (command, id) = self.stack.create_layer_command(node, index)?;
        self.commit(command)?;
        Ok(id)
    }
    pub fn remove_layer(&mut self, layer: Option<LayerID>) -> Result<(), EditError> {
        let command = self.stack.remove_layer_command(layer)?;
        self.commit(command)
    }
    /// Negative moves up. Returns `Ok(false)` at the end of the group.
    pub fn move_layer_by_offset(
        &mut self,
        offset: isize,
        layer: Option<LayerID>,
    ) -> Result<bool, EditError> {
        let command = self.stack.move_by_offset_command(offset, layer)?;
        self.commit_if_some(command)
    }
    pub fn set_parent(
        &mut self,
        layer: LayerID,
        parent: LayerID,
        index: usize,
    ) -> Result<bool, EditError> {
        let command = self.stack.set_parent_command(layer, parent, index)?;
        self.commit_if_some(command)
    }
    pub fn merge_layer_down(&mut self, layer: Option<LayerID>) -> Result<(), EditError> {
        let command = self.stack.merge_down_command(layer)?;
        self.commit(command)
    }
    pub fn resize_layer(
        &mut self,
        layer: Option<LayerID>,
        size: Size,
        anchor: Anchor,
    ) -> Result<(), EditError> {
        let command = self.stack.resize_layer_command(layer, size, anchor)?;
        self.commit(command)
    }
    /// Returns `Ok(false)` if the layer was already tight.
    pub fn crop_to_content(&mut self, layer: Option<LayerID>) -> Result<bool, EditError> {
        let command = self.stack.crop_to_content_command(layer)?;
        self.commit_if_some(command)
    }
    pub fn set_layer_property(
        &mut self,
        layer: Option<LayerID>,
        property: LayerProperty,
    ) -> Result<bool, EditError> {
        let command = self.stack.property_command(layer, property)?;
        self.commit_if_some(command)
    }
    pub fn set_layer_name(&mut self, layer: Option<LayerID>, name: &str) -> Result<bool, EditError> {
        self.set_layer_property(layer, LayerProperty::Name(name.to_owned()))
    }
    pub fn set_layer_visible(&mut self, layer: Option<LayerID>, visible: bool) -> Result<bool, EditError> {
        self.set_layer_property(layer, LayerProperty::Visible(visible))
    }
    pub fn set_layer_locked(&mut self, layer: Option<LayerID>, locked: bool) -> Result<bool, EditError> {
        self.set_layer_property(layer, LayerProperty::Locked(locked))
    }
    pub fn set_layer_opacity(&mut self, layer: Option<LayerID>, opacity: f32) -> Result<bool, EditError> {
        self.set_layer_property(layer, LayerProperty::Opacity(opacity))
    }
    pub fn set_layer_transform(
        &mut self,
        layer: Option<LayerID>,
        transform: Matrix,
    ) -> Result<bool, EditError> {
        self.set_layer_property(layer, LayerProperty::Transform(transform))
    }
    pub fn set_text(&mut self, layer: Option<LayerID>, text: TextData) -> Result<bool, EditError> {
        let command = self.stack.text_command(layer, text)?;
        self.commit_if_some(command)
    }
    /// Replace an image layer's pixels, and optionally its placement.
    pub fn set_layer_image(
        &mut self,
        layer: Option<LayerID>,
        image: RgbaImage,
        transform: Option<Matrix>,
    ) -> Result<(), EditError> {
        let command = self.stack.image_command(layer, image, transform)?;
        self.commit(command)
    }
    pub fn set_active_layer(&mut self, layer: Option<LayerID>) -> Result<bool, EditError> {
        let command = self.stack.active_command(layer)?;
        self.commit_if_some(command)
    }

    // ======== Document ========

    /// Moves and resizes are clamped into the document.
    pub fn set_generation_area(&mut self, rect: Rect) -> Result<bool, EditError> {
        let command = self.stack.generation_area_command(rect);
        self.commit_if_some(command)
    }
    /// Write `image` into `layer` (default: active) at the generation area.
    pub fn set_generation_area_content(
        &mut self,
        image: &RgbaImage,
        layer: Option<LayerID>,
        mode: EditMode,
    ) -> Result<(), EditError> {
        let command = self.stack.generation_content_command(image, layer, mode)?;
        self.commit(command)
    }
    pub fn resize_canvas(&mut self, size: Size, anchor: Anchor) -> Result<bool, EditError> {
        let command = self.stack.resize_canvas_command(size, anchor)?;
        self.commit_if_some(command)
    }

    // ======== Selection ========

    pub fn set_selection_mask(&mut self, mask: GrayImage) -> Result<bool, EditError> {
        let command = self.stack.selection_command(mask)?;
        self.commit_if_some(command)
    }
    pub fn clear_selection(&mut self) -> Result<bool, EditError> {
        let size = self.stack.size();
        self.set_selection_mask(GrayImage::new(size.width, size.height))
    }
    pub fn select_all(&mut self) -> Result<bool, EditError> {
        self.set_selection_mask(SelectionLayer::all(self.stack.size()))
    }
    pub fn invert_selection(&mut self) -> Result<bool, EditError> {
        self.set_selection_mask(self.stack.selection().inverted())
    }
    pub fn select_shape(&mut self, shape: Shape, mode: SelectionMode) -> Result<bool, EditError> {
        let command = self.stack.select_shape_command(shape, mode)?;
        self.commit_if_some(command)
    }
    /// Fit the generation area around the selection.
    pub fn generation_area_from_selection(&mut self, padding: u32) -> Result<bool, EditError> {
        let area = self
            .stack
            .selection()
            .generation_area(padding)
            .ok_or(EditError::EmptySelection)?;
        self.set_generation_area(area)
    }
}
