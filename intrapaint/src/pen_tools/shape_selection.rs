//! Rectangle and ellipse selection. Shift adds to the selection, Alt subtracts from it.

use super::{ControlValue, Cursor, Modifiers, PointerEvent, ToolContext, ToolError};
use intrapaint_core::state::selection::{SelectionMode, Shape};
use intrapaint_core::util::{Point, Rect};

#[derive(Default)]
pub struct ShapeSelection {
    ellipse: bool,
    drag: Option<(Point, Point)>,
}
impl ShapeSelection {
    fn shape(&self, a: Point, b: Point) -> Shape {
        let rect = Rect::from_corners(a, b);
        if self.ellipse {
            Shape::Ellipse(rect)
        } else {
            Shape::Rectangle(rect)
        }
    }
    fn mode(modifiers: Modifiers) -> SelectionMode {
        if modifiers.contains(Modifiers::ALT) {
            SelectionMode::Subtract
        } else if modifiers.contains(Modifiers::SHIFT) {
            SelectionMode::Add
        } else {
            SelectionMode::Replace
        }
    }
}
impl super::PenTool for ShapeSelection {
    fn label(&self) -> &'static str {
        "Shape selection"
    }
    fn cursor(&self) -> Cursor {
        Cursor::Crosshair
    }
    fn control_panel(&self) -> Vec<super::Control> {
        vec![super::Control {
            name: "ellipse",
            value: ControlValue::Bool(self.ellipse),
        }]
    }
    fn set_control(&mut self, name: &str, value: ControlValue) -> Result<(), ToolError> {
        match (name, value) {
            ("ellipse", ControlValue::Bool(ellipse)) => {
                self.ellipse = ellipse;
                Ok(())
            }
            ("ellipse", value) => Err(ToolError::InvalidControl {
                name: "ellipse",
                value,
            }),
            (name, _) => Err(ToolError::UnknownControl {
                tool: self.label(),
                name: name.to_owned(),
            }),
        }
    }
    fn preview(&self) -> Option<super::Preview<'_>> {
        self.drag
            .map(|(start, end)| super::Preview::Shape(self.shape(start, end)))
    }
    fn on_deactivate(&mut self) {
        self.drag = None;
    }
    fn press(&mut self, _cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let point = event.point();
        self.drag = Some((point, point));
        Ok(true)
    }
    fn drag(&mut self, _cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some((_, end)) = self.drag.as_mut() else {
            return Ok(false);
        };
        *end = event.point();
        Ok(true)
    }
    fn release(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some((start, _)) = self.drag.take() else {
            return Ok(false);
        };
        let shape = self.shape(start, event.point());
        let mode = Self::mode(event.modifiers);
        if shape.bounds().is_empty() {
            // A click without a drag drops a replaced selection, and changes nothing otherwise.
            if mode == SelectionMode::Replace {
                cx.document.clear_selection()?;
            }
            return Ok(true);
        }
        cx.document.select_shape(shape, mode)?;
        Ok(true)
    }
    fn key(&mut self, cx: &mut ToolContext<'_>, event: &super::KeyEvent) -> Result<bool, ToolError> {
        match event.key {
            super::Key::Escape if self.drag.is_some() => {
                self.drag = None;
                Ok(true)
            }
            super::Key::Escape => Ok(cx.document.clear_selection()?),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::test::document;
    use super::super::{Key, KeyEvent, Modifiers, PenTool, PointerEvent, ToolContext};
    use super::ShapeSelection;
    use crate::config::ConfigProvider;
    use intrapaint_core::util::Rect;

    fn drag(
        tool: &mut ShapeSelection,
        cx: &mut ToolContext<'_>,
        from: (f32, f32),
        to: (f32, f32),
        modifiers: Modifiers,
    ) {
        tool.press(cx, &PointerEvent::at(from.0, from.1)).unwrap();
        tool.drag(cx, &PointerEvent::at(to.0, to.1)).unwrap();
        tool.release(cx, &PointerEvent::at(to.0, to.1).with_modifiers(modifiers))
            .unwrap();
    }

    #[test]
    fn modes_combine() {
        let mut document = document(32, 32);
        let config = ConfigProvider::default();
        let mut cx = ToolContext {
            document: &mut document,
            config: &config,
        };
        let mut tool = ShapeSelection::default();
        drag(&mut tool, &mut cx, (0.0, 0.0), (16.0, 16.0), Modifiers::empty());
        assert_eq!(
            cx.stack().selection().bounds(),
            Some(Rect::new(0, 0, 16, 16))
        );
        drag(&mut tool, &mut cx, (16.0, 16.0), (32.0, 32.0), Modifiers::SHIFT);
        assert_eq!(
            cx.stack().selection().bounds(),
            Some(Rect::new(0, 0, 32, 32))
        );
        drag(&mut tool, &mut cx, (0.0, 0.0), (32.0, 16.0), Modifiers::ALT);
        assert_eq!(
            cx.stack().selection().bounds(),
            Some(Rect::new(16, 16, 16, 16))
        );
        // Dragging backwards works the same.
        drag(&mut tool, &mut cx, (8.0, 8.0), (4.0, 2.0), Modifiers::empty());
        assert_eq!(cx.stack().selection().bounds(), Some(Rect::new(4, 2, 4, 6)));

        assert!(tool.key(&mut cx, &KeyEvent::new(Key::Escape)).unwrap());
        assert!(cx.stack().selection().is_empty());
        assert_eq!(cx.document.history().undo_count(), 5);
    }
}
