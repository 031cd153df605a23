//! Paint the selection mask directly. Primary button adds, secondary (or the pen's eraser) removes.

use super::{ControlValue, Cursor, PointerEvent, ToolContext, ToolError};
use image::GrayImage;
use intrapaint_core::raster;

struct Stroke {
    mask: GrayImage,
    value: u8,
    last: (f32, f32),
}

pub struct SelectionBrush {
    radius: f32,
    stroke: Option<Stroke>,
}
impl Default for SelectionBrush {
    fn default() -> Self {
        Self {
            radius: 16.0,
            stroke: None,
        }
    }
}
impl SelectionBrush {
    const MAX_RADIUS: f32 = 500.0;
}
impl super::PenTool for SelectionBrush {
    fn label(&self) -> &'static str {
        "Selection brush"
    }
    fn cursor(&self) -> Cursor {
        Cursor::Brush(self.radius)
    }
    fn control_panel(&self) -> Vec<super::Control> {
        vec![super::Control {
            name: "size",
            value: ControlValue::Float {
                value: self.radius,
                min: 0.5,
                max: Self::MAX_RADIUS,
            },
        }]
    }
    fn set_control(&mut self, name: &str, value: ControlValue) -> Result<(), ToolError> {
        if name != "size" {
            return Err(ToolError::UnknownControl {
                tool: self.label(),
                name: name.to_owned(),
            });
        }
        self.radius = super::float_control("size", value, 0.5, Self::MAX_RADIUS)?;
        Ok(())
    }
    fn preview(&self) -> Option<super::Preview<'_>> {
        self.stroke
            .as_ref()
            .map(|stroke| super::Preview::Selection(&stroke.mask))
    }
    fn on_deactivate(&mut self) {
        self.stroke = None;
    }
    fn press(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let mut mask = cx.stack().selection().mask().clone();
        let value = if event.is_erasing() { 0 } else { u8::MAX };
        raster::mask_dab(&mut mask, event.position, self.radius, value);
        self.stroke = Some(Stroke {
            mask,
            value,
            last: event.position,
        });
        Ok(true)
    }
    fn drag(&mut self, _cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some(stroke) = self.stroke.as_mut() else {
            return Ok(false);
        };
        let radius = self.radius;
        super::interpolate(stroke.last, event.position, (radius * 0.25).max(1.0), |at| {
            raster::mask_dab(&mut stroke.mask, at, radius, stroke.value);
        });
        stroke.last = event.position;
        Ok(true)
    }
    fn release(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        self.drag(cx, event)?;
        let Some(stroke) = self.stroke.take() else {
            return Ok(false);
        };
        cx.document.set_selection_mask(stroke.mask)?;
        Ok(true)
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
