//! Move the generation area by dragging it, resize it with the wheel.

use super::{Cursor, Modifiers, PointerEvent, ToolContext, ToolError};
use intrapaint_core::util::{Point, Rect};

/// Pixels added to each side per wheel step.
const WHEEL_STEP: f32 = 8.0;

#[derive(Default)]
pub struct GenerationArea {
    /// Pointer offset from the area's corner, and the area as it would be if released now.
    grabbed: Option<(Point, Rect)>,
}
impl super::PenTool for GenerationArea {
    fn label(&self) -> &'static str {
        "Generation area"
    }
    fn cursor(&self) -> Cursor {
        if self.grabbed.is_some() {
            Cursor::Grabbing
        } else {
            Cursor::Grab
        }
    }
    fn preview(&self) -> Option<super::Preview<'_>> {
        self.grabbed
            .map(|(_, area)| super::Preview::GenerationArea(area))
    }
    fn on_deactivate(&mut self) {
        self.grabbed = None;
    }
    fn press(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let area = cx.stack().generation_area();
        let point = event.point();
        // Pressing outside the area centers it on the pointer.
        let grab = if area.contains(point) {
            Point::new(point.x - area.x, point.y - area.y)
        } else {
            Point::new(area.width as i32 / 2, area.height as i32 / 2)
        };
        self.grabbed = Some((grab, area));
        self.drag(cx, event)
    }
    fn drag(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        let Some((grab, area)) = self.grabbed.as_mut() else {
            return Ok(false);
        };
        let point = event.point();
        let moved = Rect::new(point.x - grab.x, point.y - grab.y, area.width, area.height);
        *area = cx.stack().constrain_area(moved);
        Ok(true)
    }
    fn release(&mut self, cx: &mut ToolContext<'_>, event: &PointerEvent) -> Result<bool, ToolError> {
        self.drag(cx, event)?;
        let Some((_, area)) = self.grabbed.take() else {
            return Ok(false);
        };
        cx.document.set_generation_area(area)?;
        Ok(true)
    }
    fn wheel(
        &mut self,
        cx: &mut ToolContext<'_>,
        delta: f32,
        _modifiers: Modifiers,
    ) -> Result<bool, ToolError> {
        if self.grabbed.is_some() {
            return Ok(true);
        }
        let amount = (delta * WHEEL_STEP).round() as i32;
        let area = cx.stack().generation_area().padded(amount);
        if let Some(command) = cx.stack().generation_area_command(area) {
            // A run of wheel steps undoes as one resize.
            cx.document
                .commit_or_extend("resize generation area", (), command)?;
        }
        Ok(true)
    }
}
