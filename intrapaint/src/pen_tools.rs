//! # Pen Tools
//!
//! Pen tools are the way the user's pointer interacts with the document. Brush, selection, text placement,
//! generation area and layer moves are all examples of pen tools.
//!
//! Exactly one tool is active at a time. The [`ToolState`] owns one instance of every tool and routes input
//! to the active one. Tools validate before they touch the document: a rejected edit is reported on the status
//! bus and leaves the document as it was.

mod brush;
mod generation_area;
mod mover;
mod selection_brush;
mod shape_selection;
mod text;

use crate::config::{ConfigProvider, DocumentSync};
use intrapaint_core::id::LayerID;
use intrapaint_core::notify::{ChangeBus, Coalesce, Subscription};
use intrapaint_core::state::selection::Shape;
use intrapaint_core::state::stack::ImageStack;
use intrapaint_core::state::transform::Matrix;
use intrapaint_core::util::{Point, Rect};
use intrapaint_core::{Document, EditError};

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u8 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
        const MIDDLE = 1 << 2;
        /// Tablet pen flipped to its eraser end.
        const ERASER = 1 << 3;
    }
}
bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
    }
}

/// A pointer sample, in image coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointerEvent {
    pub position: (f32, f32),
    pub buttons: Buttons,
    pub modifiers: Modifiers,
    /// 0..=1. Mice report 1.
    pub pressure: f32,
}
impl PointerEvent {
    #[must_use]
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            position: (x, y),
            buttons: Buttons::PRIMARY,
            modifiers: Modifiers::empty(),
            pressure: 1.0,
        }
    }
    #[must_use]
    pub fn with_buttons(self, buttons: Buttons) -> Self {
        Self { buttons, ..self }
    }
    #[must_use]
    pub fn with_modifiers(self, modifiers: Modifiers) -> Self {
        Self { modifiers, ..self }
    }
    #[must_use]
    pub fn point(&self) -> Point {
        Point::from_f32(self.position.0, self.position.1)
    }
    /// Secondary button or the eraser end of a pen.
    #[must_use]
    pub fn is_erasing(&self) -> bool {
        self.buttons
            .intersects(Buttons::SECONDARY | Buttons::ERASER)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    Enter,
    Escape,
    Backspace,
    Char(char),
}
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub modifiers: Modifiers,
}
impl KeyEvent {
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::empty(),
        }
    }
}

/// Every input a tool can receive.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ToolInput {
    Press(PointerEvent),
    /// Pointer moved, with or without buttons held.
    Drag(PointerEvent),
    Release(PointerEvent),
    /// Pointer entered the canvas.
    Enter(PointerEvent),
    /// Pointer left the canvas.
    Exit,
    Wheel { delta: f32, modifiers: Modifiers },
    Tablet(PointerEvent),
    Key(KeyEvent),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Cursor {
    Default,
    Crosshair,
    /// Outline of the brush, radius in image pixels.
    Brush(f32),
    Text,
    Grab,
    Grabbing,
    Move,
}

/// The current value of one tool setting, along with its valid range.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlValue {
    Bool(bool),
    Float { value: f32, min: f32, max: f32 },
    Color([u8; 4]),
}
#[derive(Clone, Debug, PartialEq)]
pub struct Control {
    pub name: &'static str,
    pub value: ControlValue,
}

/// In-progress tool state, drawn over the document until committed.
#[derive(Debug, PartialEq)]
pub enum Preview<'a> {
    /// Replacement pixels for a layer.
    Layer {
        layer: LayerID,
        image: &'a image::RgbaImage,
    },
    Selection(&'a image::GrayImage),
    Shape(Shape),
    GenerationArea(Rect),
    Transform { layer: LayerID, transform: Matrix },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("{tool} has no setting {name:?}")]
    UnknownControl { tool: &'static str, name: String },
    #[error("{value:?} is not valid for {name:?}")]
    InvalidControl {
        name: &'static str,
        value: ControlValue,
    },
}

/// What tools may touch while handling input.
pub struct ToolContext<'a> {
    pub document: &'a mut Document,
    pub config: &'a ConfigProvider,
}
impl ToolContext<'_> {
    #[must_use]
    pub fn stack(&self) -> &ImageStack {
        self.document.stack()
    }
}

/// Handlers return `Ok(true)` if the input was consumed.
trait PenTool {
    fn label(&self) -> &'static str;
    fn cursor(&self) -> Cursor {
        Cursor::Default
    }
    fn control_panel(&self) -> Vec<Control> {
        Vec::new()
    }
    fn set_control(&mut self, name: &str, value: ControlValue) -> Result<(), ToolError> {
        let _ = value;
        Err(ToolError::UnknownControl {
            tool: self.label(),
            name: name.to_owned(),
        })
    }
    fn preview(&self) -> Option<Preview<'_>> {
        None
    }
    /// Called when the tool becomes active. May be called when already active.
    fn on_activate(&mut self, _cx: &mut ToolContext<'_>) {}
    /// Called when the state is transitioning away from this tool. Drops any in-progress
    /// interaction and subscriptions. May be called when already inactive.
    fn on_deactivate(&mut self) {}

    fn press(&mut self, _cx: &mut ToolContext<'_>, _event: &PointerEvent) -> Result<bool, ToolError> {
        Ok(false)
    }
    fn drag(&mut self, _cx: &mut ToolContext<'_>, _event: &PointerEvent) -> Result<bool, ToolError> {
        Ok(false)
    }
    fn release(&mut self, _cx: &mut ToolContext<'_>, _event: &PointerEvent) -> Result<bool, ToolError> {
        Ok(false)
    }
    fn enter(&mut self, _cx: &mut ToolContext<'_>, _event: &PointerEvent) -> Result<bool, ToolError> {
        Ok(false)
    }
    fn exit(&mut self, _cx: &mut ToolContext<'_>) -> Result<bool, ToolError> {
        Ok(false)
    }
    fn wheel(
        &mut self,
        _cx: &mut ToolContext<'_>,
        _delta: f32,
        _modifiers: Modifiers,
    ) -> Result<bool, ToolError> {
        Ok(false)
    }
    /// Tablet samples behave as drags unless a tool cares about the difference.
    fn tablet(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        self.drag(cx, event)
    }
    fn key(&mut self, _cx: &mut ToolContext<'_>, _event: &KeyEvent) -> Result<bool, ToolError> {
        Ok(false)
    }
}

#[derive(Copy, Clone, strum::EnumIter, strum::AsRefStr, Hash, PartialEq, Eq, Debug)]
pub enum ToolKind {
    Brush,
    SelectionBrush,
    ShapeSelection,
    Text,
    GenerationArea,
    Move,
}

/// A tool rejected some input.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolStatus {
    pub tool: ToolKind,
    pub error: ToolError,
}
impl Coalesce for ToolStatus {
    fn supersedes(&self, _: &Self) -> bool {
        false
    }
}

pub struct ToolState {
    active: ToolKind,

    brush: Box<dyn PenTool>,
    selection_brush: Box<dyn PenTool>,
    shape_selection: Box<dyn PenTool>,
    text: Box<dyn PenTool>,
    generation_area: Box<dyn PenTool>,
    mover: Box<dyn PenTool>,

    status: ChangeBus<ToolStatus>,
    settings: DocumentSync,
}
impl ToolState {
    /// Create every tool, activating the brush.
    pub fn new(cx: &mut ToolContext<'_>) -> Self {
        let mut this = Self {
            active: ToolKind::Brush,
            brush: Box::new(brush::Brush::default()),
            selection_brush: Box::new(selection_brush::SelectionBrush::default()),
            shape_selection: Box::new(shape_selection::ShapeSelection::default()),
            text: Box::new(text::Text::default()),
            generation_area: Box::new(generation_area::GenerationArea::default()),
            mover: Box::new(mover::Mover::default()),
            status: ChangeBus::new(),
            settings: cx.config.watch_documents(),
        };
        this.tool_for_kind(ToolKind::Brush).on_activate(cx);
        this
    }
    fn tool_for_kind(&mut self, kind: ToolKind) -> &mut dyn PenTool {
        match kind {
            ToolKind::Brush => self.brush.as_mut(),
            ToolKind::SelectionBrush => self.selection_brush.as_mut(),
            ToolKind::ShapeSelection => self.shape_selection.as_mut(),
            ToolKind::Text => self.text.as_mut(),
            ToolKind::GenerationArea => self.generation_area.as_mut(),
            ToolKind::Move => self.mover.as_mut(),
        }
    }
    fn active_tool(&self) -> &dyn PenTool {
        match self.active {
            ToolKind::Brush => self.brush.as_ref(),
            ToolKind::SelectionBrush => self.selection_brush.as_ref(),
            ToolKind::ShapeSelection => self.shape_selection.as_ref(),
            ToolKind::Text => self.text.as_ref(),
            ToolKind::GenerationArea => self.generation_area.as_ref(),
            ToolKind::Move => self.mover.as_ref(),
        }
    }
    #[must_use]
    pub fn active(&self) -> ToolKind {
        self.active
    }
    /// Switch tools. The old tool is deactivated before the new one activates.
    pub fn set_tool(&mut self, kind: ToolKind, cx: &mut ToolContext<'_>) {
        if kind == self.active {
            return;
        }
        log::debug!("Tool {} -> {}", self.active.as_ref(), kind.as_ref());
        self.tool_for_kind(self.active).on_deactivate();
        self.active = kind;
        self.tool_for_kind(kind).on_activate(cx);
    }
    /// Deactivate the active tool, for example when the document is closed.
    pub fn deactivate(&mut self) {
        self.tool_for_kind(self.active).on_deactivate();
    }
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.active_tool().label()
    }
    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.active_tool().cursor()
    }
    #[must_use]
    pub fn control_panel(&self) -> Vec<Control> {
        self.active_tool().control_panel()
    }
    pub fn set_control(&mut self, name: &str, value: ControlValue) -> Result<(), ToolError> {
        self.tool_for_kind(self.active).set_control(name, value)
    }
    #[must_use]
    pub fn preview(&self) -> Option<Preview<'_>> {
        self.active_tool().preview()
    }
    /// Failures of every tool are announced here.
    pub fn subscribe_status(&self) -> Subscription<ToolStatus> {
        self.status.subscribe()
    }
    /// Route input to the active tool. Returns whether it was consumed.
    pub fn handle(&mut self, cx: &mut ToolContext<'_>, input: ToolInput) -> bool {
        // Settings changed since the last input apply before this one.
        self.settings.sync(cx.config, cx.document);
        let kind = self.active;
        let tool = self.tool_for_kind(kind);
        let result = match &input {
            ToolInput::Press(event) => tool.press(cx, event),
            ToolInput::Drag(event) => tool.drag(cx, event),
            ToolInput::Release(event) => tool.release(cx, event),
            ToolInput::Enter(event) => tool.enter(cx, event),
            ToolInput::Exit => tool.exit(cx),
            ToolInput::Wheel { delta, modifiers } => tool.wheel(cx, *delta, *modifiers),
            ToolInput::Tablet(event) => tool.tablet(cx, event),
            ToolInput::Key(event) => tool.key(cx, event),
        };
        match result {
            Ok(consumed) => consumed,
            Err(error) => {
                log::warn!("{} rejected {input:?}: {error}", kind.as_ref());
                self.status.emit(ToolStatus { tool: kind, error });
                false
            }
        }
    }
}

/// Checks shared by the tools that paint into the active layer.
fn validate_image_layer(stack: &ImageStack, selection_only: bool) -> Result<LayerID, EditError> {
    let layer = stack.active_layer().ok_or(EditError::NoActiveLayer)?;
    let node = stack.layer(layer)?;
    if node.image().is_none() {
        return Err(EditError::IncompatibleLayer {
            layer,
            expected: "image",
            found: node.kind().name(),
        });
    }
    stack.graph().check_unlocked(layer)?;
    if !stack.graph().is_visible(layer) {
        return Err(EditError::HiddenLayer(layer));
    }
    if selection_only && stack.selection().is_empty() {
        return Err(EditError::EmptySelection);
    }
    Ok(layer)
}

/// Call `dab` along the segment from `from` to `to`, excluding `from`, at most `spacing` apart.
fn interpolate(from: (f32, f32), to: (f32, f32), spacing: f32, mut dab: impl FnMut((f32, f32))) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = (distance / spacing.max(0.5)).ceil().max(1.0) as u32;
    for step in 1..=steps {
        let t = step as f32 / steps as f32;
        dab((from.0 + dx * t, from.1 + dy * t));
    }
}

fn float_control(
    name: &'static str,
    value: ControlValue,
    min: f32,
    max: f32,
) -> Result<f32, ToolError> {
    match value {
        ControlValue::Float { value: v, .. } if (min..=max).contains(&v) => Ok(v),
        value => Err(ToolError::InvalidControl { name, value }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use intrapaint_core::state::stack::GenerationAreaConstraints;
    use intrapaint_core::undo::UndoSettings;
    use intrapaint_core::util::Size;

    pub(super) fn document(width: u32, height: u32) -> Document {
        Document::new(
            Size::new(width, height),
            GenerationAreaConstraints::default(),
            UndoSettings {
                merge_interval: std::time::Duration::ZERO,
                ..UndoSettings::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn switching_deactivates_first() {
        let mut document = document(32, 32);
        let config = ConfigProvider::default();
        config
            .set(
                crate::config::ConfigKey::PaintSelectionOnly,
                crate::config::ConfigValue::Bool(true),
            )
            .unwrap();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let baseline = cx.stack().bus().subscriber_count();
        let mut tools = ToolState::new(&mut cx);
        assert_eq!(tools.active(), ToolKind::Brush);
        // Brush listens for selection changes while active.
        assert_eq!(cx.stack().bus().subscriber_count(), baseline + 1);

        tools.set_tool(ToolKind::Move, &mut cx);
        assert_eq!(tools.active(), ToolKind::Move);
        assert_eq!(cx.stack().bus().subscriber_count(), baseline);
        assert_eq!(tools.label(), "Move");

        // Repeated deactivation is harmless.
        tools.deactivate();
        tools.deactivate();
        assert_eq!(cx.stack().bus().subscriber_count(), baseline);
    }
    #[test]
    fn errors_reach_status_bus() {
        let mut document = document(32, 32);
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut tools = ToolState::new(&mut cx);
        let status = tools.subscribe_status();
        // No layers at all.
        assert!(!tools.handle(&mut cx, ToolInput::Press(PointerEvent::at(4.0, 4.0))));
        let reports: Vec<_> = status.drain().collect();
        assert_eq!(
            reports,
            [ToolStatus {
                tool: ToolKind::Brush,
                error: ToolError::Edit(EditError::NoActiveLayer),
            }]
        );
        assert_eq!(cx.document.history().undo_count(), 0);
    }
    #[test]
    fn input_picks_up_changed_settings() {
        use crate::config::{ConfigKey, ConfigValue};
        let mut document = document(64, 64);
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut tools = ToolState::new(&mut cx);
        config.set(ConfigKey::MaxUndo, ConfigValue::Count(3)).unwrap();
        config
            .set(ConfigKey::GenerationSize, ConfigValue::Size(Size::new(256, 512)))
            .unwrap();
        config
            .set(ConfigKey::FixedGenerationAspect, ConfigValue::Bool(true))
            .unwrap();
        tools.handle(&mut cx, ToolInput::Exit);
        assert_eq!(cx.document.history().settings().max_history, 3);
        assert_eq!(
            cx.stack().generation_area(),
            intrapaint_core::util::Rect::new(0, 0, 32, 64)
        );
    }
    #[test]
    fn unknown_controls_rejected() {
        let mut document = document(8, 8);
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut tools = ToolState::new(&mut cx);
        assert!(matches!(
            tools.set_control("nonsense", ControlValue::Bool(true)),
            Err(ToolError::UnknownControl { .. })
        ));
        assert!(tools
            .control_panel()
            .iter()
            .any(|control| control.name == "size"));
    }
    #[test]
    fn interpolation_reaches_target() {
        let mut points = Vec::new();
        interpolate((0.0, 0.0), (10.0, 0.0), 2.0, |p| points.push(p));
        assert_eq!(points.len(), 5);
        assert_eq!(points.last(), Some(&(10.0, 0.0)));
        // Zero length still dabs once.
        points.clear();
        interpolate((3.0, 3.0), (3.0, 3.0), 2.0, |p| points.push(p));
        assert_eq!(points, [(3.0, 3.0)]);
    }
}
