//! Source listing cursor.

use crate::interpreter::command::ListMove;
use crate::shared::StopLocation;

/// Lines per listing window.
pub const LIST_WINDOW: u32 = 10;

/// A window to show: `(file, center, mark)`.
pub type Window = (String, u32, u32);

/// Where `list` shows source next.
#[derive(Debug, Clone, Default)]
pub struct ListCursor {
    file: Option<String>,
    line: u32,
    stop: Option<StopLocation>,
    fresh: bool,
}

impl ListCursor {
    /// A cursor with no location.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to a stop location reported by the target.
    pub fn reset_to(&mut self, stop: StopLocation) {
        self.file = Some(stop.file.clone());
        self.line = stop.line;
        self.stop = Some(stop);
        self.fresh = true;
    }

    /// Current file and line.
    pub fn position(&self) -> Option<(&str, u32)> {
        self.file.as_deref().map(|f| (f, self.line))
    }

    /// Apply a move; `None` when there is nowhere to list.
    pub fn apply(&mut self, mv: &ListMove) -> Option<Window> {
        match mv {
            ListMove::Forward => {
                self.file.as_ref()?;
                if !self.fresh {
                    self.line = self.line.saturating_add(LIST_WINDOW);
                }
            }
            ListMove::Back => {
                self.file.as_ref()?;
                self.line = self.line.saturating_sub(LIST_WINDOW).max(1);
            }
            ListMove::Stop => {
                let stop = self.stop.clone()?;
                self.file = Some(stop.file);
                self.line = stop.line;
            }
            ListMove::At { file, line } => {
                self.file = Some(file.clone());
                self.line = *line;
            }
        }
        self.fresh = false;
        let file = self.file.clone()?;
        Some((file.clone(), self.line, self.mark_for(&file)))
    }

    /// The stop line when listing the stopped file; 0 otherwise.
    fn mark_for(&self, file: &str) -> u32 {
        match &self.stop {
            Some(stop) if stop.file == file => stop.line,
            _ => 0,
        }
    }
}
