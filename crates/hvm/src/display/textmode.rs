//! Double-buffered text model
//!
//! Guest output is appended to the buffer selected by `active_index`; the
//! renderer only ever reads the other one. A swap flips the two and asks
//! for a refresh, so a half-written frame is never visible.

use super::ansi::ansi_to_html;

#[derive(Debug, Default)]
pub struct TextModeBuffer {
    buffers: [String; 2],
    active_index: usize,
    needs_refresh: bool,
}

impl TextModeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the buffer receiving writes.
    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Index of the buffer the renderer shows.
    pub fn visible_index(&self) -> usize {
        1 - self.active_index
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn buffer(&self, index: usize) -> &str {
        &self.buffers[index]
    }

    pub fn active(&self) -> &str {
        &self.buffers[self.active_index]
    }

    pub fn visible(&self) -> &str {
        &self.buffers[self.visible_index()]
    }

    pub fn clear(&mut self) {
        self.buffers[self.active_index].clear();
    }

    pub fn push_chars(&mut self, text: &str) {
        self.buffers[self.active_index].push_str(text);
    }

    /// Append raw guest bytes.
    ///
    /// Trailing NUL padding is dropped and invalid UTF-8 is replaced with
    /// U+FFFD. Escape sequences are kept verbatim until render time, so a
    /// sequence split across two pushes still renders.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = String::from_utf8_lossy(&bytes[..end]);
        self.push_chars(&text);
    }

    pub fn swap(&mut self) {
        self.active_index = 1 - self.active_index;
        self.needs_refresh = true;
    }

    /// Append host text to the visible buffer on its own line.
    pub fn append_visible(&mut self, text: &str) {
        let visible = self.visible_index();
        let buffer = &mut self.buffers[visible];
        if !buffer.is_empty() && !buffer.ends_with('\n') {
            buffer.push('\n');
        }
        buffer.push_str(text);
        if !text.ends_with('\n') {
            buffer.push('\n');
        }
        self.needs_refresh = true;
    }

    pub fn mark_refresh(&mut self) {
        self.needs_refresh = true;
    }

    /// Markup for the visible buffer if a refresh is pending.
    pub fn take_refresh(&mut self) -> Option<String> {
        if !self.needs_refresh {
            return None;
        }
        self.needs_refresh = false;
        Some(ansi_to_html(self.visible()))
    }
}
