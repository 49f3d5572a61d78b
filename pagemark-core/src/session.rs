//! Per-document editing session: the single owner of the canonical markup
//! sequence and of everything that describes how it is being edited.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ZoomConfig;
use crate::history::History;
use crate::markup::Markup;
use crate::save::SaveTracker;
use crate::scope::{LinkedContext, ScopeResolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    #[default]
    None,
    Highlight,
    Draw,
    Text,
    Comment,
}

/// Zoom scale bounded to `[min, max]` and moved in fixed steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Zoom {
    scale: f64,
    config: ZoomConfig,
}

impl Zoom {
    pub fn new(config: ZoomConfig) -> Self {
        Self {
            scale: config.default,
            config,
        }
    }

    /// Starts at `restored` if it is a usable scale, else at the default.
    pub fn restored(config: ZoomConfig, restored: Option<f64>) -> Self {
        let mut zoom = Self::new(config);
        if let Some(scale) = restored.filter(|s| zoom.in_bounds(*s)) {
            zoom.scale = scale;
        }
        zoom
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn in_bounds(&self, scale: f64) -> bool {
        scale.is_finite() && scale >= self.config.min && scale <= self.config.max
    }

    pub fn clamp(&self, scale: f64) -> f64 {
        if scale.is_finite() {
            scale.clamp(self.config.min, self.config.max)
        } else {
            self.config.default
        }
    }

    /// The clamped scale `scale` would move to, or `None` when that is the
    /// current scale.
    pub fn target(&self, scale: f64) -> Option<f64> {
        let next = self.clamp(scale);
        ((next - self.scale).abs() > f64::EPSILON).then_some(next)
    }

    /// Sets the scale, returning whether it changed.
    pub fn set(&mut self, scale: f64) -> bool {
        match self.target(scale) {
            Some(next) => {
                self.scale = next;
                true
            }
            None => false,
        }
    }

    pub fn step_in(&self) -> Option<f64> {
        self.target(self.scale + self.config.step)
    }

    pub fn step_out(&self) -> Option<f64> {
        self.target(self.scale - self.config.step)
    }
}

pub struct Session {
    document_id: u64,
    zoom: Zoom,
    edit_mode: bool,
    tool: ToolMode,
    scope: Option<LinkedContext>,
    markups: Vec<Markup>,
    pub history: History,
    pub save: SaveTracker,
}

impl Session {
    pub fn new(document_id: u64, zoom: Zoom) -> Self {
        Self {
            document_id,
            zoom,
            edit_mode: false,
            tool: ToolMode::None,
            scope: None,
            markups: Vec::new(),
            history: History::new(),
            save: SaveTracker::new(),
        }
    }

    pub fn document_id(&self) -> u64 {
        self.document_id
    }

    pub fn zoom(&self) -> &Zoom {
        &self.zoom
    }

    pub fn zoom_mut(&mut self) -> &mut Zoom {
        &mut self.zoom
    }

    pub fn scale(&self) -> f64 {
        self.zoom.scale()
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn set_edit_mode(&mut self, edit_mode: bool) {
        self.edit_mode = edit_mode;
        if !edit_mode {
            self.tool = ToolMode::None;
        }
    }

    pub fn tool(&self) -> ToolMode {
        self.tool
    }

    pub fn set_tool(&mut self, tool: ToolMode) {
        self.tool = tool;
    }

    pub fn scope(&self) -> Option<LinkedContext> {
        self.scope
    }

    /// Adopts a resolved scope. Undo history is bound to the scope it was
    /// recorded in, so it is dropped whenever the requested scope was refused.
    pub fn apply_scope(&mut self, resolution: &ScopeResolution) {
        if resolution.discards_history() {
            info!(?resolution, "scope reset to document level");
            self.history.clear();
        }
        self.scope = resolution.effective();
    }

    pub fn markups(&self) -> &[Markup] {
        &self.markups
    }

    /// Direct access for backends that write gestures straight into the
    /// canonical sequence. Callers are responsible for snapshots and
    /// dirty-marking.
    pub fn markups_mut(&mut self) -> &mut Vec<Markup> {
        &mut self.markups
    }

    pub fn replace_markups(&mut self, markups: Vec<Markup>) -> Vec<Markup> {
        std::mem::replace(&mut self.markups, markups)
    }

    pub fn find(&self, id: &str) -> Option<&Markup> {
        self.markups.iter().find(|m| m.id == id)
    }
}
