use super::*;
use crate::config::{ConfigKey, ConfigValue};
use intrapaint_core::state::selection::{SelectionMode, Shape};
use intrapaint_core::state::stack::GenerationAreaConstraints;
use intrapaint_core::undo::UndoSettings;
use intrapaint_core::util::Rect;
use image::Rgba;
use std::time::{Duration, Instant};

/// Fills every candidate with one colour.
struct Solid {
    color: [u8; 4],
}
impl GenerationBackend for Solid {
    fn generate(&self, request: &GenerationRequest, sink: &mut ResultSink) -> anyhow::Result<()> {
        sink.status("seed", "1234")?;
        for index in 0..request.params.batch_size {
            sink.checkpoint()?;
            sink.image(
                index,
                raster::filled(request.size, Rgba(self.color)),
            )?;
            sink.status("progress", format!("{}/{}", index + 1, request.params.batch_size))?;
        }
        Ok(())
    }
}

/// Blocks until the gate opens, then reports whatever it can.
struct Gated {
    gate: crossbeam::channel::Receiver<()>,
}
impl GenerationBackend for Gated {
    fn generate(&self, request: &GenerationRequest, sink: &mut ResultSink) -> anyhow::Result<()> {
        let _ = self.gate.recv();
        sink.checkpoint()?;
        sink.image(0, raster::transparent(request.size))?;
        Ok(())
    }
}

struct Panics;
impl GenerationBackend for Panics {
    fn generate(&self, _: &GenerationRequest, _: &mut ResultSink) -> anyhow::Result<()> {
        panic!("sampler exploded");
    }
}

fn document() -> Document {
    let mut document = Document::new(
        Size::new(64, 64),
        GenerationAreaConstraints::default(),
        UndoSettings {
            merge_interval: Duration::ZERO,
            ..UndoSettings::default()
        },
    )
    .unwrap();
    let white = raster::filled(Size::new(64, 64), Rgba([255, 255, 255, 255]));
    document.create_layer(None, Some(white), None).unwrap();
    document
}
fn config(mode: EditMode) -> ConfigProvider {
    let config = ConfigProvider::default();
    config
        .set(ConfigKey::EditMode, ConfigValue::EditMode(mode))
        .unwrap();
    config
        .set(ConfigKey::GenerationSize, ConfigValue::Size(Size::new(32, 32)))
        .unwrap();
    config
}
/// Poll until the bridge settles or a generous timeout passes.
fn poll_until_done(bridge: &mut GenerationBridge) -> Vec<GenerationEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        events.extend(bridge.poll());
        if !bridge.is_listening() {
            return events;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("generation didn't finish, got {events:?}");
}

#[test]
fn cancel_before_results() {
    let (open, gate) = crossbeam::channel::bounded(1);
    let mut bridge = GenerationBridge::new(Arc::new(Gated { gate }));
    let mut document = document();
    document.select_all().unwrap();
    let before = document.stack().flattened();
    let history = document.history().undo_count();

    bridge
        .start(&document, &config(EditMode::Inpaint), GenerationParams::default())
        .unwrap();
    assert!(matches!(
        bridge.state(),
        GenerationState::Requested | GenerationState::Running
    ));
    bridge.cancel();
    assert_eq!(bridge.state(), &GenerationState::Cancelled);
    assert!(!bridge.is_listening());

    // Let the worker run into the flag.
    open.send(()).unwrap();
    bridge.shutdown();
    assert!(!bridge.worker_alive());
    assert!(bridge.poll().is_empty());
    assert_eq!(bridge.candidate_count(), 0);
    assert_eq!(document.stack().flattened(), before);
    assert_eq!(document.history().undo_count(), history);

    // Nothing completed, so nothing to pick.
    assert!(matches!(
        bridge.select_candidate(0, &mut document),
        Err(GenerationError::WrongState { .. })
    ));
    bridge.reset();
    assert_eq!(bridge.state(), &GenerationState::Idle);
}

#[test]
fn completed_candidate_is_undoable() {
    let mut bridge = GenerationBridge::new(Arc::new(Solid {
        color: [255, 0, 0, 255],
    }));
    let mut document = document();
    document.set_generation_area(Rect::new(0, 0, 64, 64)).unwrap();
    let before = document.stack().flattened();
    let params = GenerationParams {
        batch_size: 3,
        ..GenerationParams::default()
    };
    bridge
        .start(&document, &config(EditMode::Img2Img), params)
        .unwrap();
    let events = poll_until_done(&mut bridge);
    assert_eq!(events.first(), Some(&GenerationEvent::Running));
    assert!(events.contains(&GenerationEvent::Status {
        key: "seed".to_owned(),
        value: "1234".to_owned(),
    }));
    assert_eq!(
        events.last(),
        Some(&GenerationEvent::Completed { candidates: 3 })
    );
    assert_eq!(bridge.state(), &GenerationState::Completed);
    assert!(!bridge.worker_alive());

    bridge.select_candidate(1, &mut document).unwrap();
    assert_eq!(bridge.state(), &GenerationState::Idle);
    // Scaled from generation size back up to the whole area.
    assert_eq!(
        document.stack().flattened().get_pixel(40, 40),
        &Rgba([255, 0, 0, 255])
    );
    document.undo().unwrap();
    assert_eq!(document.stack().flattened(), before);
}

#[test]
fn inpainting_keeps_unselected_pixels() {
    let mut bridge = GenerationBridge::new(Arc::new(Solid {
        color: [0, 0, 255, 255],
    }));
    let mut document = document();
    document.set_generation_area(Rect::new(0, 0, 64, 64)).unwrap();
    document
        .select_shape(Shape::Rectangle(Rect::new(0, 0, 32, 64)), SelectionMode::Replace)
        .unwrap();
    bridge
        .start(&document, &config(EditMode::Inpaint), GenerationParams::default())
        .unwrap();
    poll_until_done(&mut bridge);

    // The candidate preview already shows the original outside of the selection.
    let candidate = bridge.candidate(0).unwrap();
    assert_eq!(candidate.get_pixel(8, 16), &Rgba([0, 0, 255, 255]));
    assert_eq!(candidate.get_pixel(30, 16), &Rgba([255, 255, 255, 255]));

    bridge.select_candidate(0, &mut document).unwrap();
    let flattened = document.stack().flattened();
    assert_eq!(flattened.get_pixel(16, 32), &Rgba([0, 0, 255, 255]));
    assert_eq!(flattened.get_pixel(60, 10), &Rgba([255, 255, 255, 255]));
}

#[test]
fn panics_become_failures() {
    let mut bridge = GenerationBridge::new(Arc::new(Panics));
    let document = document();
    bridge
        .start(&document, &config(EditMode::Txt2Img), GenerationParams::default())
        .unwrap();
    let events = poll_until_done(&mut bridge);
    let Some(GenerationEvent::Failed(message)) = events.last() else {
        panic!("expected failure, got {events:?}");
    };
    assert!(message.contains("sampler exploded"));
    assert!(matches!(bridge.state(), GenerationState::Failed(_)));
    bridge.discard();
    assert_eq!(bridge.state(), &GenerationState::Idle);
}

#[test]
fn one_worker_at_a_time() {
    let (open, gate) = crossbeam::channel::bounded(1);
    let mut bridge = GenerationBridge::new(Arc::new(Gated { gate }));
    let document = document();
    let settings = config(EditMode::Img2Img);
    bridge
        .start(&document, &settings, GenerationParams::default())
        .unwrap();
    assert!(matches!(
        bridge.start(&document, &settings, GenerationParams::default()),
        Err(GenerationError::AlreadyRunning)
    ));
    // A cancelled worker that hasn't exited yet still blocks a new start.
    bridge.cancel();
    assert!(matches!(
        bridge.start(&document, &settings, GenerationParams::default()),
        Err(GenerationError::AlreadyRunning)
    ));
    open.send(()).unwrap();
    bridge.shutdown();
    let (_open, gate) = crossbeam::channel::bounded(1);
    let mut bridge = GenerationBridge::new(Arc::new(Gated { gate }));
    assert!(matches!(
        bridge.start(&document, &config(EditMode::Inpaint), GenerationParams::default()),
        Err(GenerationError::Edit(EditError::EmptySelection))
    ));
    assert_eq!(bridge.state(), &GenerationState::Idle);
}
