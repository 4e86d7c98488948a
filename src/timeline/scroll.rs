use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrollAnchor {
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrollTarget {
    Bottom,
    Item { id: String, anchor: ScrollAnchor },
}

/// A request for the render layer. Ids increase, so an observer can tell a
/// new request from a repeated read of the same one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrollRequest {
    pub id: u64,
    pub target: ScrollTarget,
    pub animated: bool,
    pub force: bool,
}

/// Decides when the view should follow new content.
#[derive(Debug)]
pub struct AutoScroll {
    delay: Duration,
    near_bottom: bool,
    /// The single in-flight deferred scroll.
    pending: Option<Instant>,
    next_id: u64,
    suppress_next: bool,
    /// Near-bottom state from before the current resize.
    resize_saved: Option<bool>,
}

impl AutoScroll {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            near_bottom: true,
            pending: None,
            next_id: 0,
            suppress_next: false,
            resize_saved: None,
        }
    }

    pub fn is_near_bottom(&self) -> bool {
        self.near_bottom
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn set_near_bottom(&mut self, near_bottom: bool) {
        self.near_bottom = near_bottom;
        if !near_bottom && self.pending.take().is_some() {
            debug!("Reader left the bottom; cancelled deferred scroll");
        }
    }

    pub fn begin_resize(&mut self) {
        if self.resize_saved.is_none() {
            self.resize_saved = Some(self.near_bottom);
        }
        self.suppress_next = true;
    }

    pub fn end_resize(&mut self) {
        if let Some(saved) = self.resize_saved.take() {
            self.near_bottom = saved;
        }
    }

    /// Returns true when this addition scheduled a new deferred scroll.
    pub fn on_structural_addition(&mut self, now: Instant) -> bool {
        if self.suppress_next {
            self.suppress_next = false;
            debug!("Auto-scroll suppressed after resize");
            return false;
        }
        if !self.near_bottom || self.pending.is_some() {
            return false;
        }
        self.pending = Some(now + self.delay);
        true
    }

    pub fn jump_to_bottom(&mut self) -> ScrollRequest {
        self.pending = None;
        self.near_bottom = true;
        self.request(ScrollTarget::Bottom, true, true)
    }

    pub fn scroll_to_item(&mut self, id: String, anchor: ScrollAnchor) -> ScrollRequest {
        self.pending = None;
        self.request(ScrollTarget::Item { id, anchor }, true, true)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn poll(&mut self, now: Instant) -> Option<ScrollRequest> {
        let due = self.pending.is_some_and(|d| d <= now);
        if !due {
            return None;
        }
        self.pending = None;
        if !self.near_bottom {
            return None;
        }
        Some(self.request(ScrollTarget::Bottom, false, false))
    }

    fn request(&mut self, target: ScrollTarget, animated: bool, force: bool) -> ScrollRequest {
        self.next_id += 1;
        ScrollRequest {
            id: self.next_id,
            target,
            animated,
            force,
        }
    }
}
