//! # Generation
//!
//! Runs a [`GenerationBackend`] on a worker thread and brings its results back to the thread that owns the
//! document. The worker never sees the document: it gets an owned snapshot of the generation area, and reports
//! over a channel that the owner drains with [`GenerationBridge::poll`].
//!
//! `Idle -> Requested -> Running -> (Completed | Failed | Cancelled) -> Idle`

use crate::config::ConfigProvider;
use image::{GrayImage, RgbaImage};
use intrapaint_core::raster;
use intrapaint_core::util::{Point, Size};
use intrapaint_core::{Document, EditError, EditMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Feathering applied to the inpainting mask before the original is composited back over results.
const MASK_BLUR_SIGMA: f32 = 2.0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    /// Candidates requested.
    pub batch_size: usize,
}
impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            batch_size: 1,
        }
    }
}

/// Everything a backend gets to see.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub mode: EditMode,
    pub params: GenerationParams,
    /// Generation area content, scaled to `size`.
    pub source: RgbaImage,
    /// Selection within the generation area, scaled to `size`. Inpainting only.
    pub mask: Option<GrayImage>,
    pub size: Size,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("generation was cancelled")]
pub struct Cancelled;

pub trait GenerationBackend: Send + Sync {
    /// Produce candidates for the request, reporting them through `sink` as they become available.
    /// Should call [`ResultSink::checkpoint`] between stages, and return promptly once it fails.
    fn generate(&self, request: &GenerationRequest, sink: &mut ResultSink) -> anyhow::Result<()>;
}

enum WorkerMessage {
    Started,
    Status { key: String, value: String },
    Image { index: usize, image: RgbaImage },
    Failed(String),
    Finished,
}

/// The backend's line back to the bridge.
pub struct ResultSink {
    sender: crossbeam::channel::Sender<WorkerMessage>,
    cancel: Arc<AtomicBool>,
}
impl ResultSink {
    /// Report a status update, such as `seed` or `progress`.
    pub fn status(&mut self, key: &str, value: impl Into<String>) -> Result<(), Cancelled> {
        self.send(WorkerMessage::Status {
            key: key.to_owned(),
            value: value.into(),
        })
    }
    /// Deliver one candidate. Later images with the same index replace earlier ones.
    pub fn image(&mut self, index: usize, image: RgbaImage) -> Result<(), Cancelled> {
        self.send(WorkerMessage::Image { index, image })
    }
    /// `Err` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
    fn send(&self, message: WorkerMessage) -> Result<(), Cancelled> {
        self.checkpoint()?;
        // Receiver gone means nobody wants the result anymore.
        self.sender.send(message).map_err(|_| Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    /// Snapshot taken, worker not yet reporting.
    Requested,
    Running,
    /// Candidates are ready to pick from.
    Completed,
    Failed(String),
    Cancelled,
}

/// What [`GenerationBridge::poll`] observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    Running,
    Status { key: String, value: String },
    /// A candidate arrived or was replaced. Fetch it with [`GenerationBridge::candidate`].
    Candidate(usize),
    Completed { candidates: usize },
    Failed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("a generation is already running")]
    AlreadyRunning,
    #[error("can't {action} while {state:?}")]
    WrongState {
        action: &'static str,
        state: GenerationState,
    },
    #[error("no candidate {0}")]
    NoCandidate(usize),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("failed to start generation worker")]
    Spawn(#[source] std::io::Error),
}

pub struct GenerationBridge {
    backend: Arc<dyn GenerationBackend>,
    state: GenerationState,
    /// Edit mode of the current request.
    mode: EditMode,
    receiver: Option<crossbeam::channel::Receiver<WorkerMessage>>,
    cancel: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    /// Original generation area content with the blurred selection cut out.
    /// Drawn back over inpainting results so only the selection changes.
    composite_base: Option<RgbaImage>,
    candidates: Vec<Option<RgbaImage>>,
}
impl std::fmt::Debug for GenerationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationBridge")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("candidates", &self.candidates.len())
            .finish_non_exhaustive()
    }
}
impl GenerationBridge {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            state: GenerationState::Idle,
            mode: EditMode::default(),
            receiver: None,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            composite_base: None,
            candidates: Vec::new(),
        }
    }
    #[must_use]
    pub fn state(&self) -> &GenerationState {
        &self.state
    }
    /// Whether results are still being listened for.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.receiver.is_some()
    }
    /// Whether a worker thread still exists, possibly winding down after a cancel.
    #[must_use]
    pub fn worker_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }
    #[must_use]
    pub fn candidate(&self, index: usize) -> Option<&RgbaImage> {
        self.candidates.get(index)?.as_ref()
    }
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.candidates.iter().flatten().count()
    }

    /// Snapshot the document's generation area and start the backend on it.
    pub fn start(
        &mut self,
        document: &Document,
        config: &ConfigProvider,
        params: GenerationParams,
    ) -> Result<(), GenerationError> {
        if self.worker_alive() {
            return Err(GenerationError::AlreadyRunning);
        }
        if matches!(
            self.state,
            GenerationState::Requested | GenerationState::Running
        ) {
            return Err(GenerationError::AlreadyRunning);
        }
        let stack = document.stack();
        let mode = config.edit_mode();
        let size = config.generation_size();
        if mode == EditMode::Inpaint && stack.selection().is_empty() {
            return Err(EditError::EmptySelection.into());
        }

        let source = raster::scale_to(&stack.generation_area_content(), size);
        let (mask, composite_base) = if mode == EditMode::Inpaint {
            let mask = raster::scale_to(&stack.selection_mask_content(), size);
            let blurred = raster::blurred_mask(&mask, MASK_BLUR_SIGMA);
            let mut base = source.clone();
            raster::cut_mask(&mut base, &blurred);
            (Some(mask), Some(base))
        } else {
            (None, None)
        };
        let request = GenerationRequest {
            mode,
            params,
            source,
            mask,
            size,
        };

        // Reap the previous (finished) worker.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        let (sender, receiver) = crossbeam::channel::unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let sink = ResultSink {
            sender,
            cancel: cancel.clone(),
        };
        let backend = self.backend.clone();
        let worker = std::thread::Builder::new()
            .name("Generation worker".to_owned())
            .spawn(move || run_worker(backend.as_ref(), &request, sink))
            .map_err(GenerationError::Spawn)?;

        log::info!("Generation started ({}, {}x{})", mode.as_ref(), size.width, size.height);
        self.worker = Some(worker);
        self.receiver = Some(receiver);
        self.cancel = cancel;
        self.mode = mode;
        self.composite_base = composite_base;
        self.candidates.clear();
        self.state = GenerationState::Requested;
        Ok(())
    }

    /// Drain everything the worker reported so far. Never blocks.
    pub fn poll(&mut self) -> Vec<GenerationEvent> {
        let Some(receiver) = self.receiver.clone() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        loop {
            let message = match receiver.try_recv() {
                Ok(message) => message,
                Err(crossbeam::channel::TryRecvError::Empty) => break,
                Err(crossbeam::channel::TryRecvError::Disconnected) => {
                    // Worker vanished without a word.
                    WorkerMessage::Failed("generation worker exited unexpectedly".to_owned())
                }
            };
            match message {
                WorkerMessage::Started => {
                    self.state = GenerationState::Running;
                    events.push(GenerationEvent::Running);
                }
                WorkerMessage::Status { key, value } => {
                    log::debug!("Generation status {key}: {value}");
                    events.push(GenerationEvent::Status { key, value });
                }
                WorkerMessage::Image { index, image } => {
                    self.store_candidate(index, image);
                    events.push(GenerationEvent::Candidate(index));
                }
                WorkerMessage::Failed(message) => {
                    log::warn!("Generation failed: {message}");
                    self.finish_worker();
                    self.candidates.clear();
                    self.state = GenerationState::Failed(message.clone());
                    events.push(GenerationEvent::Failed(message));
                    break;
                }
                WorkerMessage::Finished => {
                    self.finish_worker();
                    let candidates = self.candidate_count();
                    log::info!("Generation finished with {candidates} candidates");
                    self.state = GenerationState::Completed;
                    events.push(GenerationEvent::Completed { candidates });
                    break;
                }
            }
        }
        events
    }
    fn store_candidate(&mut self, index: usize, image: RgbaImage) {
        let mut image = match &self.composite_base {
            Some(base) => raster::scale_to(&image, raster::size_of(base)),
            None => image,
        };
        if let Some(base) = &self.composite_base {
            raster::composite_at(&mut image, base, Point::default(), 1.0);
        }
        if self.candidates.len() <= index {
            self.candidates.resize(index + 1, None);
        }
        self.candidates[index] = Some(image);
    }
    /// Stop listening and reap the worker, which has sent its last message.
    fn finish_worker(&mut self) {
        self.receiver = None;
        self.composite_base = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Generation worker panicked outside the backend");
            }
        }
    }

    /// Ask the worker to stop and forget everything it produced. The document is not touched.
    /// The worker winds down on its own time; until it does, [`Self::start`] fails.
    pub fn cancel(&mut self) {
        if !matches!(
            self.state,
            GenerationState::Requested | GenerationState::Running
        ) {
            return;
        }
        log::info!("Generation cancelled");
        self.cancel.store(true, Ordering::Relaxed);
        self.receiver = None;
        self.composite_base = None;
        self.candidates.clear();
        self.state = GenerationState::Cancelled;
    }
    /// Apply a completed candidate to the generation area of the active layer, as one undoable edit.
    pub fn select_candidate(
        &mut self,
        index: usize,
        document: &mut Document,
    ) -> Result<(), GenerationError> {
        if self.state != GenerationState::Completed {
            return Err(GenerationError::WrongState {
                action: "select a candidate",
                state: self.state.clone(),
            });
        }
        let image = self
            .candidate(index)
            .ok_or(GenerationError::NoCandidate(index))?;
        document.set_generation_area_content(image, None, self.mode)?;
        self.candidates.clear();
        self.state = GenerationState::Idle;
        Ok(())
    }
    /// Drop finished results without applying any.
    pub fn discard(&mut self) {
        if matches!(
            self.state,
            GenerationState::Requested | GenerationState::Running
        ) {
            return;
        }
        self.candidates.clear();
        self.state = GenerationState::Idle;
    }
    /// Back to idle from any state, cancelling if needed.
    pub fn reset(&mut self) {
        self.cancel();
        self.candidates.clear();
        self.state = GenerationState::Idle;
    }
    /// Cancel, then wait for the worker to exit.
    pub fn shutdown(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
impl Drop for GenerationBridge {
    fn drop(&mut self) {
        // Don't wait on a backend stuck in a long stage, it'll notice the flag when it can.
        self.cancel.store(true, Ordering::Relaxed);
    }
}

fn run_worker(backend: &dyn GenerationBackend, request: &GenerationRequest, mut sink: ResultSink) {
    if sink.send(WorkerMessage::Started).is_err() {
        return;
    }
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        backend.generate(request, &mut sink)
    }));
    if sink.is_cancelled() {
        return;
    }
    let message = match result {
        Ok(Ok(())) => WorkerMessage::Finished,
        Ok(Err(e)) => WorkerMessage::Failed(format!("{e:#}")),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            WorkerMessage::Failed(format!("generation backend panicked: {reason}"))
        }
    };
    let _ = sink.sender.send(message);
}

#[cfg(test)]
mod test;
