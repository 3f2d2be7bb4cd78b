use std::collections::HashMap;

/// Programmatic scrolls closer than this are treated as already in place
const SCROLL_EPSILON: f64 = 0.5;

/// Vertical scroll geometry of one pane at the time of a scroll event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Largest reachable scroll offset
    pub fn range(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    /// Position as a fraction of the scrollable range, in `[0, 1]`.
    /// A pane that cannot scroll reports 0.
    pub fn fraction(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            return 0.0;
        }
        (self.scroll_top / range).clamp(0.0, 1.0)
    }
}

/// A scrollable document pane
pub trait ScrollSurface {
    fn metrics(&self) -> ScrollMetrics;
    fn set_scroll_top(&mut self, scroll_top: f64);
}

/// In-memory pane, used for headless readers and tests
#[derive(Debug, Clone, PartialEq)]
pub struct PaneSurface {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl PaneSurface {
    pub fn new(scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top: 0.0,
            scroll_height,
            client_height,
        }
    }
}

impl ScrollSurface for PaneSurface {
    fn metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            scroll_top: self.scroll_top,
            scroll_height: self.scroll_height,
            client_height: self.client_height,
        }
    }

    fn set_scroll_top(&mut self, scroll_top: f64) {
        let range = (self.scroll_height - self.client_height).max(0.0);
        self.scroll_top = scroll_top.clamp(0.0, range);
    }
}

/// Keeps registered panes at the same proportional scroll position.
///
/// Panes are looked up by id. `S` is whatever handle reaches the real pane:
/// for a rendered view it wraps a reference to the view, for `PaneSurface`
/// it is the pane state itself, which `on_scroll` keeps in step with the
/// reported source position.
///
/// A pane scrolled by the synchronizer reports that scroll back through
/// `on_scroll` like any other; since it already sits at the target fraction
/// the echo moves nothing and the feedback loop settles after one hop.
pub struct ScrollSynchronizer<S: ScrollSurface> {
    panes: HashMap<String, S>,
    enabled: bool,
}

impl<S: ScrollSurface> Default for ScrollSynchronizer<S> {
    fn default() -> Self {
        Self {
            panes: HashMap::new(),
            enabled: true,
        }
    }
}

impl<S: ScrollSurface> ScrollSynchronizer<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pane_id: impl Into<String>, surface: S) {
        self.panes.insert(pane_id.into(), surface);
    }

    pub fn unregister(&mut self, pane_id: &str) -> Option<S> {
        self.panes.remove(pane_id)
    }

    pub fn pane(&self, pane_id: &str) -> Option<&S> {
        self.panes.get(pane_id)
    }

    pub fn pane_mut(&mut self, pane_id: &str) -> Option<&mut S> {
        self.panes.get_mut(pane_id)
    }

    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Record a scroll of `source_id` and propagate it to every other pane.
    /// Returns the ids of the panes that actually moved.
    pub fn on_scroll(&mut self, source_id: &str, metrics: ScrollMetrics) -> Vec<String> {
        let Some(source) = self.panes.get_mut(source_id) else {
            return Vec::new();
        };
        if source.metrics().scroll_top != metrics.scroll_top {
            source.set_scroll_top(metrics.scroll_top);
        }
        if !self.enabled {
            return Vec::new();
        }

        let fraction = metrics.fraction();
        let mut moved = Vec::new();
        for (id, pane) in self.panes.iter_mut() {
            if id == source_id {
                continue;
            }
            let current = pane.metrics();
            let target = fraction * current.range();
            if (current.scroll_top - target).abs() < SCROLL_EPSILON {
                continue;
            }
            pane.set_scroll_top(target);
            moved.push(id.clone());
        }

        if !moved.is_empty() {
            log::trace!("Scroll from {} moved {} pane(s) to {:.3}", source_id, moved.len(), fraction);
        }
        moved
    }

    /// Scroll one pane directly and propagate the result
    pub fn scroll_to(&mut self, pane_id: &str, scroll_top: f64) -> Vec<String> {
        let Some(pane) = self.panes.get_mut(pane_id) else {
            return Vec::new();
        };
        pane.set_scroll_top(scroll_top);
        let metrics = pane.metrics();
        self.on_scroll(pane_id, metrics)
    }
}
