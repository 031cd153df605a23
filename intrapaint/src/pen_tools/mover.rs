//! Move the active layer. Drags commit on release, arrow keys nudge by a pixel (ten with shift).
//! The wheel turns the layer with Alt held and scales it with Ctrl, around the layer's center.

use super::{Cursor, Key, KeyEvent, Modifiers, PointerEvent, ToolContext, ToolError};
use intrapaint_core::id::LayerID;
use intrapaint_core::state::stack::{ImageStack, LayerProperty};
use intrapaint_core::state::transform::{Matrix, Similarity};
use intrapaint_core::EditError;

struct Grab {
    layer: LayerID,
    start: (f32, f32),
    /// Document to parent space.
    to_parent: Matrix,
    original: Matrix,
    current: Matrix,
}

#[derive(Default)]
pub struct Mover {
    grab: Option<Grab>,
}

fn movable_layer(stack: &ImageStack) -> Result<(LayerID, Matrix), EditError> {
    let layer = stack.active_layer().ok_or(EditError::NoActiveLayer)?;
    let transform = stack.layer(layer)?.transform;
    stack.graph().check_unlocked(layer)?;
    if !stack.graph().is_visible(layer) {
        return Err(EditError::HiddenLayer(layer));
    }
    Ok((layer, transform))
}

/// Transforms are stored relative to the parent, input arrives in document space.
fn to_parent(stack: &ImageStack, layer: LayerID) -> Matrix {
    stack
        .graph()
        .parent_transform(layer)
        .inverse()
        .unwrap_or_default()
}

impl Mover {
    /// Radians per wheel step.
    const TURN_STEP: f32 = std::f32::consts::PI / 12.0;
    /// Scale factor per wheel step.
    const SCALE_STEP: f32 = 1.1;
}

impl super::PenTool for Mover {
    fn label(&self) -> &'static str {
        "Move"
    }
    fn cursor(&self) -> Cursor {
        Cursor::Move
    }
    fn preview(&self) -> Option<super::Preview<'_>> {
        self.grab.as_ref().map(|grab| super::Preview::Transform {
            layer: grab.layer,
            transform: grab.current,
        })
    }
    fn on_deactivate(&mut self) {
        self.grab = None;
    }
    fn press(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let (layer, original) = movable_layer(cx.stack())?;
        self.grab = Some(Grab {
            layer,
            start: event.position,
            to_parent: to_parent(cx.stack(), layer),
            original,
            current: original,
        });
        Ok(true)
    }
    fn drag(&mut self, _cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some(grab) = self.grab.as_mut() else {
            return Ok(false);
        };
        let [dx, dy] = grab.to_parent.map_vector([
            (event.position.0 - grab.start.0).round(),
            (event.position.1 - grab.start.1).round(),
        ]);
        grab.current = grab.original.translated(dx, dy);
        Ok(true)
    }
    fn release(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        self.drag(cx, event)?;
        let Some(grab) = self.grab.take() else {
            return Ok(false);
        };
        cx.document
            .set_layer_transform(Some(grab.layer), grab.current)?;
        Ok(true)
    }
    fn key(&mut self, cx: &mut ToolContext<'_>, event: &KeyEvent) -> Result<bool, ToolError> {
        let step = if event.modifiers.contains(Modifiers::SHIFT) {
            10.0
        } else {
            1.0
        };
        let (dx, dy) = match event.key {
            Key::Left => (-step, 0.0),
            Key::Right => (step, 0.0),
            Key::Up => (0.0, -step),
            Key::Down => (0.0, step),
            Key::Escape if self.grab.is_some() => {
                self.grab = None;
                return Ok(true);
            }
            _ => return Ok(false),
        };
        if self.grab.is_some() {
            // Mid-drag, the drag wins.
            return Ok(true);
        }
        let (layer, transform) = movable_layer(cx.stack())?;
        let [dx, dy] = to_parent(cx.stack(), layer).map_vector([dx, dy]);
        let command = cx
            .stack()
            .property_command(Some(layer), LayerProperty::Transform(transform.translated(dx, dy)))?;
        if let Some(command) = command {
            cx.document.commit_or_extend("nudge", layer, command)?;
        }
        Ok(true)
    }
    fn wheel(
        &mut self,
        cx: &mut ToolContext<'_>,
        delta: f32,
        modifiers: Modifiers,
    ) -> Result<bool, ToolError> {
        let change = if modifiers.contains(Modifiers::ALT) {
            Similarity {
                rotation: delta * Self::TURN_STEP,
                ..Default::default()
            }
        } else if modifiers.contains(Modifiers::CTRL) {
            Similarity {
                flip_scale: Self::SCALE_STEP.powf(delta),
                ..Default::default()
            }
        } else {
            return Ok(false);
        };
        if self.grab.is_some() {
            return Ok(true);
        }
        let (layer, transform) = movable_layer(cx.stack())?;
        let Some(bounds) = cx.stack().graph().bounds(layer) else {
            return Ok(false);
        };
        let [center_x, center_y] = to_parent(cx.stack(), layer).map_point([
            bounds.x as f32 + bounds.width as f32 / 2.0,
            bounds.y as f32 + bounds.height as f32 / 2.0,
        ]);
        let changed = transform.then(&Matrix::about((center_x, center_y), change));
        let command = cx
            .stack()
            .property_command(Some(layer), LayerProperty::Transform(changed))?;
        if let Some(command) = command {
            cx.document.commit_or_extend("transform", layer, command)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::super::test::document;
    use super::super::{Key, KeyEvent, Modifiers, PenTool, PointerEvent, ToolContext, ToolError};
    use super::Mover;
    use crate::config::ConfigProvider;
    use intrapaint_core::util::{Point, Rect, Size};
    use intrapaint_core::EditError;

    #[test]
    fn drag_translates_on_release() {
        let mut document = document(64, 64);
        let layer = document
            .create_layer(None, Some(image::RgbaImage::new(8, 8)), None)
            .unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut tool = Mover::default();
        tool.press(&mut cx, &PointerEvent::at(4.0, 4.0)).unwrap();
        tool.drag(&mut cx, &PointerEvent::at(10.0, 7.0)).unwrap();
        assert_eq!(cx.stack().graph().document_transform(layer).pixel_offset(), Point::new(0, 0));
        tool.release(&mut cx, &PointerEvent::at(14.0, 9.0)).unwrap();
        assert_eq!(cx.stack().graph().document_transform(layer).pixel_offset(), Point::new(10, 5));
        assert_eq!(
            cx.stack().graph().bounds(layer).map(|b| b.size()),
            Some(Size::new(8, 8))
        );
    }
    #[test]
    fn nudges_undo_together() {
        let mut document = document(64, 64);
        let layer = document.create_layer(None, None, None).unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let before = cx.document.history().undo_count();
        let mut tool = Mover::default();
        let shift = |key| KeyEvent {
            key,
            modifiers: Modifiers::SHIFT,
        };
        tool.key(&mut cx, &KeyEvent::new(Key::Right)).unwrap();
        tool.key(&mut cx, &KeyEvent::new(Key::Right)).unwrap();
        tool.key(&mut cx, &shift(Key::Down)).unwrap();
        assert_eq!(cx.stack().graph().document_transform(layer).pixel_offset(), Point::new(2, 10));
        assert_eq!(cx.document.history().undo_count(), before + 1);

        cx.document.undo().unwrap();
        assert_eq!(cx.stack().graph().document_transform(layer).pixel_offset(), Point::new(0, 0));
        // Other keys pass through.
        assert!(!tool.key(&mut cx, &KeyEvent::new(Key::Char('a'))).unwrap());
    }
    #[test]
    fn locked_layers_stay_put() {
        let mut document = document(64, 64);
        let layer = document.create_layer(None, None, None).unwrap();
        document.set_layer_locked(Some(layer), true).unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut tool = Mover::default();
        assert!(matches!(
            tool.press(&mut cx, &PointerEvent::at(0.0, 0.0)),
            Err(ToolError::Edit(EditError::Locked(_)))
        ));
        assert!(matches!(
            tool.key(&mut cx, &KeyEvent::new(Key::Left)),
            Err(ToolError::Edit(EditError::Locked(_)))
        ));
        assert!(tool.preview().is_none());
        assert_eq!(cx.stack().graph().document_transform(layer).pixel_offset(), Point::new(0, 0));
    }
    #[test]
    fn wheel_turns_and_scales_in_place() {
        let mut document = document(64, 64);
        let layer = document
            .create_layer(None, Some(image::RgbaImage::new(8, 8)), None)
            .unwrap();
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let before = cx.document.history().undo_count();
        let mut tool = Mover::default();
        assert!(!tool.wheel(&mut cx, 1.0, Modifiers::empty()).unwrap());
        // Six steps of 15 degrees, a quarter turn around the center at 4,4.
        tool.wheel(&mut cx, 3.0, Modifiers::ALT).unwrap();
        tool.wheel(&mut cx, 3.0, Modifiers::ALT).unwrap();
        let turned = cx.stack().graph().document_transform(layer);
        let [x, y] = turned.map_point([0.0, 0.0]);
        assert!((x - 8.0).abs() < 1e-3 && y.abs() < 1e-3);
        assert_eq!(cx.stack().graph().bounds(layer), Some(Rect::new(0, 0, 8, 8)));

        tool.wheel(&mut cx, 1.0, Modifiers::CTRL).unwrap();
        assert_eq!(cx.stack().graph().bounds(layer), Some(Rect::new(-1, -1, 10, 10)));
        assert_eq!(cx.document.history().undo_count(), before + 1);
        cx.document.undo().unwrap();
        assert!(cx.stack().graph().document_transform(layer).is_identity());
    }
}
