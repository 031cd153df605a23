//! Place and edit text layers.
//!
//! Clicking selects the top-most text layer under the pointer for editing. Dragging over empty space creates a
//! new text layer spanning the dragged box. Typing edits the selected layer, consecutive keystrokes undo as one.

use super::{ControlValue, Cursor, Key, KeyEvent, PointerEvent, ToolContext, ToolError};
use intrapaint_core::id::LayerID;
use intrapaint_core::state::graph::TextData;
use intrapaint_core::util::{Point, Rect};

/// Dragged boxes smaller than this on either side are treated as clicks.
const MIN_BOX: u32 = 4;

pub struct Text {
    font_size: f32,
    color: [u8; 4],
    /// Layer receiving keystrokes.
    editing: Option<LayerID>,
    /// Corners of a box being dragged out.
    creating: Option<(Point, Point)>,
}
impl Default for Text {
    fn default() -> Self {
        let defaults = TextData::default();
        Self {
            font_size: defaults.font_size,
            color: defaults.color,
            editing: None,
            creating: None,
        }
    }
}
impl Text {
    fn edit(
        &mut self,
        cx: &mut ToolContext<'_>,
        edit: impl FnOnce(&mut String) -> bool,
    ) -> Result<bool, ToolError> {
        let Some(layer) = self.editing else {
            return Ok(false);
        };
        let Some(mut text) = cx.stack().layer(layer)?.text_data().cloned() else {
            // Layer was converted or replaced under us.
            self.editing = None;
            return Ok(false);
        };
        if !edit(&mut text.text) {
            return Ok(true);
        }
        if let Some(command) = cx.stack().text_command(Some(layer), text)? {
            cx.document.commit_or_extend("typing", layer, command)?;
        }
        Ok(true)
    }
}
impl super::PenTool for Text {
    fn label(&self) -> &'static str {
        "Text"
    }
    fn cursor(&self) -> Cursor {
        Cursor::Text
    }
    fn control_panel(&self) -> Vec<super::Control> {
        vec![
            super::Control {
                name: "font size",
                value: ControlValue::Float {
                    value: self.font_size,
                    min: 1.0,
                    max: 1000.0,
                },
            },
            super::Control {
                name: "color",
                value: ControlValue::Color(self.color),
            },
        ]
    }
    fn set_control(&mut self, name: &str, value: ControlValue) -> Result<(), ToolError> {
        match (name, value) {
            ("font size", value) => {
                self.font_size = super::float_control("font size", value, 1.0, 1000.0)?;
            }
            ("color", ControlValue::Color(color)) => self.color = color,
            ("color", value) => return Err(ToolError::InvalidControl { name: "color", value }),
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
        self.creating.map(|(start, end)| {
            super::Preview::Shape(intrapaint_core::state::selection::Shape::Rectangle(
                Rect::from_corners(start, end),
            ))
        })
    }
    fn on_deactivate(&mut self) {
        self.editing = None;
        self.creating = None;
    }
    fn press(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let point = event.point();
        let hit = cx
            .stack()
            .graph()
            .top_layer_at(point, |node| node.text_data().is_some());
        match hit {
            Some(layer) => {
                cx.document.set_active_layer(Some(layer))?;
                self.editing = Some(layer);
                self.creating = None;
            }
            None => {
                self.editing = None;
                self.creating = Some((point, point));
            }
        }
        Ok(true)
    }
    fn drag(&mut self, _cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some((_, end)) = self.creating.as_mut() else {
            return Ok(false);
        };
        *end = event.point();
        Ok(true)
    }
    fn release(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some((start, _)) = self.creating.take() else {
            return Ok(false);
        };
        let area = Rect::from_corners(start, event.point());
        if area.width < MIN_BOX || area.height < MIN_BOX {
            return Ok(true);
        }
        let text = TextData {
            text: String::new(),
            font_size: self.font_size,
            color: self.color,
            size: area.size(),
        };
        let layer = cx
            .document
            .create_text_layer(None, text, area.origin(), None)?;
        self.editing = Some(layer);
        Ok(true)
    }
    fn key(&mut self, cx: &mut ToolContext<'_>, event: &KeyEvent) -> Result<bool, ToolError> {
        match event.key {
            Key::Char(c) if !c.is_control() => self.edit(cx, |text| {
                text.push(c);
                true
            }),
            Key::Enter => self.edit(cx, |text| {
                text.push('\n');
                true
            }),
            Key::Backspace => self.edit(cx, |text| text.pop().is_some()),
            Key::Escape if self.editing.is_some() => {
                self.editing = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
