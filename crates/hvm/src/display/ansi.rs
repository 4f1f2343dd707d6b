//! ANSI escape sequences to HTML markup
//!
//! Text is HTML-escaped first, then every SGR sequence (`ESC [ params m`) is
//! replaced by an inline styling tag. Unknown sequences are removed. A span
//! stays open until an explicit reset, like on a legacy terminal.

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// The 16-colour IBM/DOS palette: 8 standard colours followed by their
/// bright variants.
pub const PALETTE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (170, 0, 0),
    (0, 170, 0),
    (170, 85, 0),
    (0, 0, 170),
    (170, 0, 170),
    (0, 170, 170),
    (170, 170, 170),
    (85, 85, 85),
    (255, 85, 85),
    (85, 255, 85),
    (255, 255, 85),
    (85, 85, 255),
    (255, 85, 255),
    (85, 255, 255),
    (255, 255, 255),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sgr {
    Reset,
    Open(String),
}

fn sgr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\x1b\[([0-9;]*)m").expect("SGR pattern is valid"))
}

/// Escape the five HTML-significant characters, every occurrence.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn sgr(params: &str) -> Option<Sgr> {
    let code: u8 = params.parse().ok()?;
    // Only the canonical spelling is recognised ("31", not "031").
    if code.to_string() != params {
        return None;
    }

    let color = |index: usize| {
        let (r, g, b) = PALETTE[index];
        format!("rgb({r},{g},{b})")
    };

    let style = match code {
        0 => return Some(Sgr::Reset),
        1 => "font-weight:bold".to_string(),
        4 => "text-decoration:underline".to_string(),
        30..=37 => format!("color:{}", color(usize::from(code - 30))),
        90..=97 => format!("color:{}", color(usize::from(code - 90) + 8)),
        40..=47 => format!("background-color:{}", color(usize::from(code - 40))),
        100..=107 => format!("background-color:{}", color(usize::from(code - 100) + 8)),
        _ => return None,
    };
    Some(Sgr::Open(style))
}

/// Convert terminal text into display markup.
pub fn ansi_to_html(input: &str) -> String {
    let escaped = html_escape(input);
    let mut open_spans = 0usize;

    sgr_pattern()
        .replace_all(&escaped, |caps: &Captures| match sgr(&caps[1]) {
            Some(Sgr::Open(style)) => {
                open_spans += 1;
                format!("<span style=\"{style}\">")
            }
            Some(Sgr::Reset) if open_spans > 0 => {
                open_spans -= 1;
                "</span>".to_string()
            }
            Some(Sgr::Reset) | None => String::new(),
        })
        .into_owned()
}
