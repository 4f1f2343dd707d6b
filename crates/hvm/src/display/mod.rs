//! The HVM display subsystem
//!
//! Owns the double-buffered text model, consumes display messages from the
//! router and, once per frame, flushes the visible buffer to a [`Surface`].

pub mod ansi;
pub mod surface;
pub mod textmode;

pub use ansi::{ansi_to_html, html_escape};
pub use surface::{page_html, BufferSurface, Surface};
pub use textmode::TextModeBuffer;

use crate::systems::{Operation, System, SystemMessage};
use parking_lot::Mutex;

/// Shown instead of any content while in framebuffer mode
pub const FRAMEBUFFER_NOTICE: &str = "Framebuffer mode not implemented";

/// Distance from the bottom that still counts as "scrolled to the end"
const SCROLL_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Escape-sequence aware text rendering
    #[default]
    Text,
    /// Declared only; renders a fixed notice
    FrameBuffer,
}

#[derive(Debug, Default)]
struct DisplayState {
    mode: DisplayMode,
    text: TextModeBuffer,
    notice_pending: bool,
}

#[derive(Debug, Default)]
pub struct Display {
    state: Mutex<DisplayState>,
}

impl Display {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> DisplayMode {
        self.state.lock().mode
    }

    pub fn set_mode(&self, mode: DisplayMode) {
        let mut state = self.state.lock();
        if state.mode == mode {
            return;
        }
        log::info!("Display mode: {:?}", mode);
        state.mode = mode;
        match mode {
            DisplayMode::Text => state.text.mark_refresh(),
            DisplayMode::FrameBuffer => state.notice_pending = true,
        }
    }

    /// Show host diagnostics in-band, after whatever is currently visible.
    pub fn report(&self, text: &str) {
        let mut state = self.state.lock();
        if state.mode != DisplayMode::Text {
            log::warn!("Display not in text mode, diagnostic not shown: {}", text);
            return;
        }
        state.text.append_visible(text);
    }

    /// Inspect the text model.
    pub fn with_text<R>(&self, f: impl FnOnce(&TextModeBuffer) -> R) -> R {
        f(&self.state.lock().text)
    }

    /// One frame of the render loop. Returns whether the surface changed.
    pub fn render(&self, surface: &mut dyn Surface) -> bool {
        let markup = {
            let mut state = self.state.lock();
            match state.mode {
                DisplayMode::Text => state.text.take_refresh(),
                DisplayMode::FrameBuffer => std::mem::take(&mut state.notice_pending)
                    .then(|| FRAMEBUFFER_NOTICE.to_string()),
            }
        };
        let Some(markup) = markup else {
            return false;
        };

        let follow = surface.max_scroll_top() - surface.scroll_top() <= SCROLL_TOLERANCE;
        surface.set_markup(markup);
        if follow {
            let bottom = surface.max_scroll_top();
            surface.set_scroll_top(bottom);
        }
        true
    }
}

impl System for Display {
    fn process_message(&self, message: &SystemMessage) {
        let mut state = self.state.lock();
        if state.mode != DisplayMode::Text {
            log::debug!("Ignoring {} outside text mode", message.operation.tag());
            return;
        }

        match &message.operation {
            Operation::TextModeClear => state.text.clear(),
            Operation::TextModePushChars(bytes) => state.text.push_bytes(bytes),
            Operation::TextModeSwap => state.text.swap(),
        }
    }
}
