use crate::error::{CoreError, Result};
use crate::models::{RegionEvent, RunInput, RunType, SelectionEvent};

/// Text and region capture are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    #[default]
    Text,
    Region,
}

/// Pointer position in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A rendered page and its pixel box in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSurface {
    pub page: u32,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PageSurface {
    /// Pointer position relative to this page, clamped to its box
    fn local(&self, pointer: Point) -> Point {
        Point {
            x: (pointer.x - self.left).clamp(0.0, self.width.max(0.0)),
            y: (pointer.y - self.top).clamp(0.0, self.height.max(0.0)),
        }
    }
}

/// Axis-aligned rectangle in page-local pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    /// Rectangle spanned by two corners, whichever way the drag went
    pub fn between(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Divide a page-local rectangle by the page's pixel size
pub fn normalize(rect: PixelRect, surface: &PageSurface) -> Result<RegionEvent> {
    if surface.width <= 0.0 || surface.height <= 0.0 {
        return Err(CoreError::InvalidSelection("page surface has no size".to_string()));
    }
    if rect.is_empty() {
        return Err(CoreError::InvalidSelection("zero-area region".to_string()));
    }

    let x = (rect.x / surface.width).clamp(0.0, 1.0);
    let y = (rect.y / surface.height).clamp(0.0, 1.0);
    Ok(RegionEvent {
        x,
        y,
        width: (rect.width / surface.width).clamp(0.0, 1.0 - x),
        height: (rect.height / surface.height).clamp(0.0, 1.0 - y),
        page: surface.page,
    })
}

impl RegionEvent {
    /// Map back to pixels of the consuming surface, which may be rendered at
    /// a different zoom than the one the region was captured on
    pub fn to_pixels(&self, width: f64, height: f64) -> PixelRect {
        PixelRect {
            x: self.x * width,
            y: self.y * height,
            width: self.width * width,
            height: self.height * height,
        }
    }
}

/// One ancestor of the selection anchor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Container {
    /// Raw page-number marker, if this container carries one
    pub page_marker: Option<String>,
    pub visible_text: Option<String>,
}

/// Snapshot of the active text selection at release time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSelection {
    pub text: String,
    pub collapsed: bool,
    /// Innermost first, stopping before the capture boundary
    pub ancestors: Vec<Container>,
}

/// Build a `SelectionEvent` from a released text selection
pub fn capture_text(selection: &TextSelection) -> Result<SelectionEvent> {
    if selection.collapsed {
        return Err(CoreError::InvalidSelection("collapsed selection".to_string()));
    }
    let text = selection.text.trim();
    if text.is_empty() {
        return Err(CoreError::InvalidSelection("empty selection".to_string()));
    }

    let page = selection
        .ancestors
        .iter()
        .filter_map(|c| c.page_marker.as_deref())
        .filter_map(|marker| marker.trim().parse::<u32>().ok())
        .find(|page| *page >= 1)
        .unwrap_or(1);

    let context = selection
        .ancestors
        .first()
        .and_then(|c| c.visible_text.as_deref())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(text);

    Ok(SelectionEvent {
        text: text.to_string(),
        context: context.to_string(),
        page,
    })
}

struct Drag {
    surface: PageSurface,
    origin: Point,
    current: Option<PixelRect>,
}

/// Turns raw pointer and selection signals from one document pane into
/// normalized selection events
#[derive(Default)]
pub struct SelectionCapture {
    mode: CaptureMode,
    drag: Option<Drag>,
}

impl SelectionCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Switching modes abandons any drag in progress
    pub fn set_mode(&mut self, mode: CaptureMode) {
        self.mode = mode;
        self.drag = None;
    }

    pub fn on_text_release(&self, selection: &TextSelection) -> Option<SelectionEvent> {
        if self.mode != CaptureMode::Text {
            return None;
        }
        match capture_text(selection) {
            Ok(event) => Some(event),
            Err(e) => {
                log::debug!("Dropped text selection: {}", e);
                None
            }
        }
    }

    pub fn on_press(&mut self, surface: PageSurface, pointer: Point) {
        if self.mode != CaptureMode::Region {
            return;
        }
        self.drag = Some(Drag {
            surface,
            origin: surface.local(pointer),
            current: None,
        });
    }

    /// Update the drag and return the rectangle to preview
    pub fn on_move(&mut self, pointer: Point) -> Option<PixelRect> {
        let drag = self.drag.as_mut()?;
        let rect = PixelRect::between(drag.origin, drag.surface.local(pointer));
        drag.current = Some(rect);
        Some(rect)
    }

    pub fn preview(&self) -> Option<PixelRect> {
        self.drag.as_ref().and_then(|d| d.current)
    }

    pub fn on_release(&mut self) -> Option<RegionEvent> {
        let drag = self.drag.take()?;
        let rect = drag.current?;
        match normalize(rect, &drag.surface) {
            Ok(event) => Some(event),
            Err(e) => {
                log::debug!("Dropped region selection: {}", e);
                None
            }
        }
    }
}

/// The selection currently held by the reader, waiting for a prompt
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveSelection {
    Text(SelectionEvent),
    Region(RegionEvent),
}

impl ActiveSelection {
    pub fn preview(&self) -> String {
        match self {
            ActiveSelection::Text(event) => event.text.clone(),
            ActiveSelection::Region(event) => format!(
                "Page {} region (x:{:.2}, y:{:.2})",
                event.page, event.x, event.y
            ),
        }
    }

    pub fn to_run_request(&self, prompt: &str) -> (RunType, RunInput) {
        match self {
            ActiveSelection::Text(event) => (
                RunType::TextSelection,
                RunInput {
                    text: Some(event.text.clone()),
                    context: Some(event.context.clone()),
                    page: Some(event.page),
                    prompt: prompt.to_string(),
                    ..RunInput::default()
                },
            ),
            ActiveSelection::Region(event) => (
                RunType::RegionSelection,
                RunInput {
                    bbox: Some([event.x, event.y, event.width, event.height]),
                    page: Some(event.page),
                    prompt: prompt.to_string(),
                    ..RunInput::default()
                },
            ),
        }
    }
}
