use crate::error::{CoreError, Result};
use crate::generation::GenerationPipeline;
use crate::models::{DocumentRef, GeneratedDocument, Run, RunInput, RunType};
use crate::runs::RunEngine;
use crate::scroll_sync::{ScrollMetrics, ScrollSurface, ScrollSynchronizer};
use crate::selection::{
    ActiveSelection, CaptureMode, PageSurface, PixelRect, Point, SelectionCapture, TextSelection,
};

/// View state of one reading session on a collection: the documents open
/// side by side, their scroll coupling, and the selection waiting for a
/// prompt.
pub struct ReaderSession<S: ScrollSurface> {
    repo_id: String,
    viewed: Vec<DocumentRef>,
    sync: ScrollSynchronizer<S>,
    capture: SelectionCapture,
    active: Option<ActiveSelection>,
}

fn pane_id(doc: &DocumentRef) -> String {
    format!("{}/{}", doc.repo_id, doc.document_id)
}

impl<S: ScrollSurface> ReaderSession<S> {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            viewed: Vec::new(),
            sync: ScrollSynchronizer::new(),
            capture: SelectionCapture::new(),
            active: None,
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn viewed(&self) -> &[DocumentRef] {
        &self.viewed
    }

    /// Open a document in a new pane. Returns false if it is already open.
    pub fn open(&mut self, doc: DocumentRef, surface: S) -> bool {
        if self.viewed.contains(&doc) {
            return false;
        }
        self.sync.register(pane_id(&doc), surface);
        self.viewed.push(doc);
        true
    }

    pub fn close(&mut self, doc: &DocumentRef) -> bool {
        let before = self.viewed.len();
        self.viewed.retain(|d| d != doc);
        self.sync.unregister(&pane_id(doc));
        self.viewed.len() != before
    }

    pub fn pane(&self, doc: &DocumentRef) -> Option<&S> {
        self.sync.pane(&pane_id(doc))
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync.is_enabled()
    }

    pub fn toggle_sync(&mut self) -> bool {
        let enabled = !self.sync.is_enabled();
        self.sync.set_enabled(enabled);
        enabled
    }

    /// A pane reported a scroll; returns how many other panes followed
    pub fn on_scroll(&mut self, doc: &DocumentRef, metrics: ScrollMetrics) -> usize {
        self.sync.on_scroll(&pane_id(doc), metrics).len()
    }

    pub fn scroll_to(&mut self, doc: &DocumentRef, scroll_top: f64) -> usize {
        self.sync.scroll_to(&pane_id(doc), scroll_top).len()
    }

    pub fn mode(&self) -> CaptureMode {
        self.capture.mode()
    }

    pub fn toggle_mode(&mut self) -> CaptureMode {
        let next = match self.capture.mode() {
            CaptureMode::Text => CaptureMode::Region,
            CaptureMode::Region => CaptureMode::Text,
        };
        self.capture.set_mode(next);
        next
    }

    pub fn active_selection(&self) -> Option<&ActiveSelection> {
        self.active.as_ref()
    }

    pub fn clear_selection(&mut self) {
        self.active = None;
    }

    /// A text selection was released. Dropped selections leave the previous
    /// active selection in place.
    pub fn on_text_release(&mut self, selection: &TextSelection) -> Option<&ActiveSelection> {
        let event = self.capture.on_text_release(selection)?;
        self.active = Some(ActiveSelection::Text(event));
        self.active.as_ref()
    }

    pub fn on_press(&mut self, surface: PageSurface, pointer: Point) {
        self.capture.on_press(surface, pointer);
    }

    pub fn on_move(&mut self, pointer: Point) -> Option<PixelRect> {
        self.capture.on_move(pointer)
    }

    pub fn on_release(&mut self) -> Option<&ActiveSelection> {
        let event = self.capture.on_release()?;
        self.active = Some(ActiveSelection::Region(event));
        self.active.as_ref()
    }

    /// Create a run for the active selection, or a chat run when nothing is
    /// selected. The selection is consumed only if the run was accepted.
    pub fn submit(&mut self, engine: &RunEngine, prompt: &str) -> Result<Run> {
        let (run_type, input) = match &self.active {
            Some(selection) => selection.to_run_request(prompt),
            None => (RunType::Chat, RunInput::prompt(prompt)),
        };
        let run = engine.create_run(&self.repo_id, run_type, input)?;
        self.active = None;
        Ok(run)
    }

    /// Compare every open document; the result lands in this session's
    /// collection
    pub async fn compare_viewed(&self, pipeline: &GenerationPipeline) -> Result<GeneratedDocument> {
        if self.viewed.len() < 2 {
            return Err(CoreError::InvalidComparison(format!(
                "{} document(s) open, need at least 2",
                self.viewed.len()
            )));
        }
        pipeline.compare(&self.repo_id, &self.viewed).await
    }
}
