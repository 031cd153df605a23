//! Paint and erase on the active image layer.
//!
//! A stroke is drawn into a copy of the layer's pixels and committed as a single image change on release.
//! If anything else changes the layer in the meantime (an undo, an applied generation) the stroke is dropped.

use super::{ControlValue, Cursor, PointerEvent, ToolContext, ToolError};
use intrapaint_core::id::LayerID;
use intrapaint_core::notify::Subscription;
use intrapaint_core::raster;
use intrapaint_core::state::stack::{ChangeEvent, ChangeKinds};
use intrapaint_core::state::transform::Matrix;
use intrapaint_core::util::Point;
use intrapaint_core::EditError;
use image::{GrayImage, Rgba, RgbaImage};

struct Stroke {
    layer: LayerID,
    buffer: RgbaImage,
    /// Document to layer pixels.
    to_layer: Matrix,
    /// Layer pixels per document pixel, for dab radius.
    scale: f32,
    /// Selection coverage resampled onto the layer.
    mask: Option<GrayImage>,
    erase: bool,
    /// Previous dab, layer space.
    last: (f32, f32),
    layer_events: Subscription<ChangeEvent>,
}

pub struct Brush {
    radius: f32,
    color: [u8; 4],
    erase: bool,
    stroke: Option<Stroke>,
    /// Present while active in paint-selection-only mode.
    selection_events: Option<Subscription<ChangeEvent>>,
    /// Selection mask, refreshed when `selection_events` reports a change.
    mask: Option<GrayImage>,
}
impl Default for Brush {
    fn default() -> Self {
        Self {
            radius: 8.0,
            color: [0, 0, 0, 255],
            erase: false,
            stroke: None,
            selection_events: None,
            mask: None,
        }
    }
}
impl Brush {
    const MAX_RADIUS: f32 = 500.0;
    fn listen_for_selection(&mut self, cx: &ToolContext<'_>) {
        if self.selection_events.is_none() {
            self.selection_events = Some(cx.stack().subscribe(ChangeKinds::SELECTION));
            self.mask = None;
        }
    }
    /// Bring the cached mask up to date. Returns whether painting is restricted to the selection.
    fn refresh_mask(&mut self, cx: &ToolContext<'_>) -> bool {
        if !cx.config.paint_selection_only() {
            self.selection_events = None;
            self.mask = None;
            return false;
        }
        self.listen_for_selection(cx);
        let changed = self
            .selection_events
            .as_ref()
            .is_some_and(|events| events.drain().count() > 0);
        if changed || self.mask.is_none() {
            self.mask = Some(cx.stack().selection().mask().clone());
        }
        true
    }
    /// Take the stroke in progress, unless its layer changed since it began.
    fn live_stroke(&mut self) -> Option<Stroke> {
        let stroke = self.stroke.take()?;
        let stale = stroke
            .layer_events
            .drain()
            .any(|event| event.layer.map_or(true, |layer| layer == stroke.layer));
        if stale {
            log::info!("{} changed during a stroke, dropping the stroke", stroke.layer);
            return None;
        }
        Some(stroke)
    }
    fn dab(&self, stroke: &mut Stroke, at: (f32, f32), pressure: f32) {
        let radius = self.radius * stroke.scale * pressure.clamp(0.05, 1.0);
        let mask = stroke.mask.as_ref().map(|mask| (mask, Point::default()));
        if stroke.erase {
            raster::erase_dab(&mut stroke.buffer, at, radius, mask);
        } else {
            raster::paint_dab(&mut stroke.buffer, at, radius, Rgba(self.color), mask);
        }
    }
}
fn layer_point(to_layer: &Matrix, (x, y): (f32, f32)) -> (f32, f32) {
    let [x, y] = to_layer.map_point([x, y]);
    (x, y)
}

impl super::PenTool for Brush {
    fn label(&self) -> &'static str {
        "Brush"
    }
    fn cursor(&self) -> Cursor {
        Cursor::Brush(self.radius)
    }
    fn control_panel(&self) -> Vec<super::Control> {
        vec![
            super::Control {
                name: "size",
                value: ControlValue::Float {
                    value: self.radius,
                    min: 0.5,
                    max: Self::MAX_RADIUS,
                },
            },
            super::Control {
                name: "color",
                value: ControlValue::Color(self.color),
            },
            super::Control {
                name: "erase",
                value: ControlValue::Bool(self.erase),
            },
        ]
    }
    fn set_control(&mut self, name: &str, value: ControlValue) -> Result<(), ToolError> {
        match (name, value) {
            ("size", value) => self.radius = super::float_control("size", value, 0.5, Self::MAX_RADIUS)?,
            ("color", ControlValue::Color(color)) => self.color = color,
            ("erase", ControlValue::Bool(erase)) => self.erase = erase,
            ("color", value) => return Err(ToolError::InvalidControl { name: "color", value }),
            ("erase", value) => return Err(ToolError::InvalidControl { name: "erase", value }),
            (name, _) => {
                return Err(ToolError::UnknownControl {
                    tool: self.label(),
                    name: name.to_owned(),
                })
            }
        }
        Ok(())
    }
    fn preview(&self) -> Option<super::Preview<'_>> {
        self.stroke.as_ref().map(|stroke| super::Preview::Layer {
            layer: stroke.layer,
            image: &stroke.buffer,
        })
    }
    fn on_activate(&mut self, cx: &mut ToolContext<'_>) {
        if cx.config.paint_selection_only() {
            self.listen_for_selection(cx);
        }
    }
    fn on_deactivate(&mut self) {
        self.stroke = None;
        self.selection_events = None;
        self.mask = None;
    }
    fn press(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let selection_only = self.refresh_mask(cx);
        let layer = super::validate_image_layer(cx.stack(), selection_only)?;
        let layer_events = cx.stack().subscribe(
            ChangeKinds::CONTENT | ChangeKinds::TRANSFORM | ChangeKinds::BOUNDS | ChangeKinds::SIZE,
        );
        let Some(buffer) = cx.stack().layer(layer)?.image().cloned() else {
            return Ok(false);
        };
        let to_document = cx.stack().graph().document_transform(layer);
        let to_layer = to_document
            .inverse()
            .ok_or(EditError::DegenerateTransform(layer))?;
        let [sx, sy] = to_layer.map_vector([1.0, 0.0]);
        let mask = self
            .mask
            .as_ref()
            .map(|mask| raster::warp(mask, raster::size_of(&buffer), &to_document));
        let at = layer_point(&to_layer, event.position);
        let mut stroke = Stroke {
            layer,
            buffer,
            to_layer,
            scale: sx.hypot(sy),
            mask,
            erase: self.erase || event.is_erasing(),
            last: at,
            layer_events,
        };
        self.dab(&mut stroke, at, event.pressure);
        self.stroke = Some(stroke);
        Ok(true)
    }
    fn drag(&mut self, _cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some(mut stroke) = self.live_stroke() else {
            return Ok(false);
        };
        let to = layer_point(&stroke.to_layer, event.position);
        let spacing = (self.radius * 0.25).max(1.0);
        super::interpolate(stroke.last, to, spacing, |at| {
            self.dab(&mut stroke, at, event.pressure);
        });
        stroke.last = to;
        self.stroke = Some(stroke);
        Ok(true)
    }
    fn release(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        if self.stroke.is_none() {
            return Ok(false);
        }
        self.drag(cx, event)?;
        let Some(stroke) = self.stroke.take() else {
            return Ok(false);
        };
        cx.document
            .set_layer_image(Some(stroke.layer), stroke.buffer, None)?;
        Ok(true)
    }
    fn exit(&mut self, _cx: &mut ToolContext<'_>) -> Result<bool, ToolError> {
        // Keep the stroke, it finishes on release even if the pointer wandered off.
        Ok(false)
    }
    fn wheel(
        &mut self,
        _cx: &mut ToolContext<'_>,
        delta: f32,
        modifiers: super::Modifiers,
    ) -> Result<bool, ToolError> {
        if !modifiers.contains(super::Modifiers::CTRL) {
            return Ok(false);
        }
        self.radius = (self.radius + delta).clamp(0.5, Self::MAX_RADIUS);
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::super::test::document;
    use super::super::{Buttons, PenTool, PointerEvent, ToolContext, ToolError};
    use super::Brush;
    use crate::config::{ConfigKey, ConfigProvider, ConfigValue};
    use intrapaint_core::state::selection::{SelectionMode, Shape};
    use intrapaint_core::state::transform::Matrix;
    use intrapaint_core::util::Rect;
    use intrapaint_core::EditError;

    #[test]
    fn stroke_commits_once() {
        let mut document = document(32, 32);
        let layer = document.create_layer(None, None, None).unwrap();
        let before = document.history().undo_count();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut brush = Brush::default();
        brush.on_activate(&mut cx);
        assert!(brush.press(&mut cx, &PointerEvent::at(2.0, 8.0)).unwrap());
        assert!(brush.drag(&mut cx, &PointerEvent::at(8.0, 8.0)).unwrap());
        assert!(brush.preview().is_some());
        // Nothing written until release.
        let untouched = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(untouched.get_pixel(5, 8)[3], 0);
        assert!(brush.release(&mut cx, &PointerEvent::at(14.0, 8.0)).unwrap());

        let image = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(image.get_pixel(8, 8)[3], 255);
        assert_eq!(image.get_pixel(8, 24)[3], 0);
        assert_eq!(cx.document.history().undo_count(), before + 1);
        assert!(brush.preview().is_none());
    }
    #[test]
    fn secondary_button_erases() {
        let mut document = document(16, 16);
        let solid = intrapaint_core::raster::filled(
            intrapaint_core::util::Size::new(16, 16),
            image::Rgba([255, 0, 0, 255]),
        );
        let layer = document.create_layer(None, Some(solid), None).unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut brush = Brush::default();
        let event = PointerEvent::at(8.0, 8.0).with_buttons(Buttons::SECONDARY);
        brush.press(&mut cx, &event).unwrap();
        brush.release(&mut cx, &event).unwrap();
        let image = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(image.get_pixel(8, 8)[3], 0);
        assert_eq!(image.get_pixel(0, 0)[3], 255);
    }
    #[test]
    fn refuses_invalid_layers() {
        let mut document = document(16, 16);
        let layer = document.create_layer(None, None, None).unwrap();
        document.set_layer_visible(Some(layer), false).unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut brush = Brush::default();
        assert_eq!(
            brush.press(&mut cx, &PointerEvent::at(1.0, 1.0)),
            Err(ToolError::Edit(EditError::HiddenLayer(layer)))
        );
        cx.document.set_layer_visible(Some(layer), true).unwrap();
        cx.document.set_layer_locked(Some(layer), true).unwrap();
        assert!(matches!(
            brush.press(&mut cx, &PointerEvent::at(1.0, 1.0)),
            Err(ToolError::Edit(EditError::Locked(_)))
        ));
        let group = cx.document.create_layer_group(None, None).unwrap();
        assert!(matches!(
            brush.press(&mut cx, &PointerEvent::at(1.0, 1.0)),
            Err(ToolError::Edit(EditError::IncompatibleLayer { layer, .. })) if layer == group
        ));
        assert!(brush.preview().is_none());
    }
    #[test]
    fn selection_only_masks_dabs() {
        let mut document = document(16, 16);
        let layer = document.create_layer(None, None, None).unwrap();
        let config = ConfigProvider::default();
        config
            .set(ConfigKey::PaintSelectionOnly, ConfigValue::Bool(true))
            .unwrap();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut brush = Brush::default();
        brush.on_activate(&mut cx);
        assert_eq!(
            brush.press(&mut cx, &PointerEvent::at(8.0, 8.0)),
            Err(ToolError::Edit(EditError::EmptySelection))
        );

        // The brush picks up selection changes made while it is active.
        cx.document
            .select_shape(
                Shape::Rectangle(Rect::new(0, 0, 8, 16)),
                SelectionMode::Replace,
            )
            .unwrap();
        brush.press(&mut cx, &PointerEvent::at(8.0, 8.0)).unwrap();
        brush.release(&mut cx, &PointerEvent::at(8.0, 8.0)).unwrap();
        let image = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(image.get_pixel(6, 8)[3], 255);
        assert_eq!(image.get_pixel(9, 8)[3], 0);

        brush.on_deactivate();
        assert!(brush.selection_events.is_none());
    }
    #[test]
    fn outside_edits_drop_the_stroke() {
        let mut document = document(16, 16);
        let layer = document.create_layer(None, None, None).unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut brush = Brush::default();
        let red = intrapaint_core::raster::filled(
            intrapaint_core::util::Size::new(16, 16),
            image::Rgba([255, 0, 0, 255]),
        );

        brush.press(&mut cx, &PointerEvent::at(4.0, 4.0)).unwrap();
        cx.document
            .set_layer_image(Some(layer), red.clone(), None)
            .unwrap();
        let history = cx.document.history().undo_count();
        assert!(!brush.drag(&mut cx, &PointerEvent::at(8.0, 8.0)).unwrap());
        assert!(!brush.release(&mut cx, &PointerEvent::at(8.0, 8.0)).unwrap());
        assert_eq!(cx.stack().layer(layer).unwrap().image(), Some(&red));
        assert_eq!(cx.document.history().undo_count(), history);

        // Undo landing mid-stroke.
        brush.press(&mut cx, &PointerEvent::at(4.0, 4.0)).unwrap();
        cx.document.undo().unwrap();
        assert!(!brush.release(&mut cx, &PointerEvent::at(4.0, 4.0)).unwrap());
        let image = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(image.get_pixel(4, 4)[3], 0);
        assert!(brush.preview().is_none());

        // Edits elsewhere leave the stroke alone.
        brush.press(&mut cx, &PointerEvent::at(4.0, 4.0)).unwrap();
        cx.document.create_layer_group(None, None).unwrap();
        assert!(brush.release(&mut cx, &PointerEvent::at(4.0, 4.0)).unwrap());
        let image = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(image.get_pixel(4, 4)[3], 255);
    }
    #[test]
    fn strokes_follow_scaled_layers() {
        let mut document = document(32, 32);
        let layer = document
            .create_layer(None, Some(image::RgbaImage::new(8, 8)), None)
            .unwrap();
        // Doubled, top left at 4,4.
        document
            .set_layer_transform(Some(layer), Matrix::from([[2.0, 0.0], [0.0, 2.0], [4.0, 4.0]]))
            .unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut brush = Brush::default();
        brush.press(&mut cx, &PointerEvent::at(9.0, 9.0)).unwrap();
        brush.release(&mut cx, &PointerEvent::at(9.0, 9.0)).unwrap();
        let image = cx.stack().layer(layer).unwrap().image().unwrap();
        assert_eq!(image.width(), 8);
        // Document radius 8 is 4 layer pixels around layer 2.5,2.5.
        assert_eq!(image.get_pixel(2, 2)[3], 255);
        assert_eq!(image.get_pixel(7, 2)[3], 0);
        assert_eq!(image.get_pixel(7, 7)[3], 0);
    }
}
