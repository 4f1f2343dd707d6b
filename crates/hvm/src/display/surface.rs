//! Render targets for the display

/// A DOM-like element the display renders into.
pub trait Surface {
    /// Replace the whole content with `markup`.
    fn set_markup(&mut self, markup: String);

    fn scroll_top(&self) -> f64;

    fn set_scroll_top(&mut self, value: f64);

    /// Height of the full content
    fn scroll_height(&self) -> f64;

    /// Height of the viewport
    fn client_height(&self) -> f64;

    fn max_scroll_top(&self) -> f64 {
        (self.scroll_height() - self.client_height()).max(0.0)
    }
}

/// In-memory surface that lays markup out as fixed-height text rows.
#[derive(Debug, Clone)]
pub struct BufferSurface {
    markup: String,
    scroll_top: f64,
    line_height: f64,
    client_height: f64,
}

impl BufferSurface {
    pub fn new(line_height: f64, client_height: f64) -> Self {
        Self {
            markup: String::new(),
            scroll_top: 0.0,
            line_height,
            client_height,
        }
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    fn line_count(&self) -> usize {
        self.markup.split('\n').count()
    }
}

impl Surface for BufferSurface {
    fn set_markup(&mut self, markup: String) {
        self.markup = markup;
        // Shrinking content pulls the scroll offset back like a browser would.
        self.scroll_top = self.scroll_top.min(self.max_scroll_top());
    }

    fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    fn set_scroll_top(&mut self, value: f64) {
        self.scroll_top = value.clamp(0.0, self.max_scroll_top());
    }

    fn scroll_height(&self) -> f64 {
        (self.line_count() as f64 * self.line_height).max(self.client_height)
    }

    fn client_height(&self) -> f64 {
        self.client_height
    }
}

const PAGE_STYLE: &str = "\
#hvm-display {
    display: block;
    font-family: monospace;
    white-space: pre-wrap;
    word-wrap: break-word;
    word-break: break-all;
    padding: 0;
    margin: 0;
    width: 100vw;
    height: 100vh;
    overflow-y: auto;
    background: #000;
    color: #fff;
    font-size: 16px;
}
";

/// Wrap display markup in a standalone HTML page.
pub fn page_html(markup: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>HoneyOS</title>\n\
         <style>\n{PAGE_STYLE}</style>\n</head>\n<body style=\"margin:0\">\n\
         <div id=\"hvm-display\">{markup}</div>\n</body>\n</html>\n"
    )
}
