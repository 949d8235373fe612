//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use crate::style::{to_ansi_escape, ColorMode, Style};

/// A half-open byte range `[start, end)` over a plain text, carrying a
/// [`Style`]. Spans may overlap; overlap resolution happens at render time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    start: usize,
    end: usize,
    style: Style,
}

impl Span {
    /// Create a span over `[start, end)`.
    pub fn new(start: usize, end: usize, style: Style) -> Span {
        Span { start, end, style }
    }

    /// First byte offset covered.
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last byte offset covered.
    pub fn end(&self) -> usize {
        self.end
    }

    /// The style this span applies.
    pub fn style(&self) -> &Style {
        &self.style
    }
}

/// A maximal run of bytes sharing one effective style.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    text: String,
    style: Option<Style>,
}

impl Segment {
    /// Create a segment.
    pub fn new(text: String, style: Option<Style>) -> Segment {
        Segment { text, style }
    }

    /// The segment text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The segment style, if any span covered it.
    pub fn style(&self) -> Option<&Style> {
        self.style.as_ref()
    }
}

/// Anything that can flatten itself into styled [`Segment`]s.
pub trait Renderable {
    /// Produce one segment per maximal run of equal effective style.
    fn render_segments(&self, mode: ColorMode) -> Vec<Segment>;
}

/// A plain text with overlapping style [`Span`]s.
///
/// At each byte position the effective style is the fold (`+`) of all spans
/// covering it, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Text {
    plain: String,
    spans: Vec<Span>,
}

impl Text {
    /// An empty text.
    pub fn new() -> Text {
        Text::default()
    }

    /// A text with initial plain content and no spans.
    pub fn from_plain(text: impl Into<String>) -> Text {
        Text {
            plain: text.into(),
            spans: Vec::new(),
        }
    }

    /// The unstyled text.
    pub fn plain(&self) -> &str {
        &self.plain
    }

    /// The spans in insertion order.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Append text, optionally covered by a style span.
    pub fn append(&mut self, text: impl AsRef<str>, style: Option<Style>) {
        let start = self.plain.len();
        self.plain.push_str(text.as_ref());
        if let Some(style) = style {
            self.spans.push(Span::new(start, self.plain.len(), style));
        }
    }

    /// Add a pre-built span.
    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Add a style over `[start, end)`. Empty or inverted ranges are ignored.
    pub fn add_style(&mut self, style: Style, start: usize, end: usize) {
        if start >= end {
            return;
        }
        self.spans.push(Span::new(start, end, style));
    }
}

impl Renderable for Text {
    fn render_segments(&self, _mode: ColorMode) -> Vec<Segment> {
        let mut segments = Vec::new();
        if self.plain.is_empty() {
            return segments;
        }

        let bytes = self.plain.as_bytes();
        let mut per_byte: Vec<Option<Style>> = vec![None; bytes.len()];
        for span in &self.spans {
            let start = span.start().min(bytes.len());
            let end = span.end().min(bytes.len());
            for slot in &mut per_byte[start..end] {
                *slot = Some(match slot.take() {
                    Some(existing) => existing + *span.style(),
                    None => *span.style(),
                });
            }
        }

        let mut buffer = Vec::with_capacity(bytes.len());
        let mut current = per_byte[0];
        buffer.push(bytes[0]);

        for (byte, style) in bytes.iter().zip(per_byte.iter()).skip(1) {
            if *style != current {
                segments.push(Segment::new(
                    String::from_utf8_lossy(&buffer).into_owned(),
                    current,
                ));
                buffer.clear();
                current = *style;
            }
            buffer.push(*byte);
        }

        segments.push(Segment::new(
            String::from_utf8_lossy(&buffer).into_owned(),
            current,
        ));
        segments
    }
}

/// Render a [`Renderable`] at the given color mode.
///
/// Each styled segment is emitted as escape prefix, text, then `ESC[0m`
/// (the reset is skipped entirely when the mode is [`ColorMode::None`]).
pub fn render(renderable: &impl Renderable, mode: ColorMode) -> String {
    const RESET: &str = "\x1b[0m";

    let segments = renderable.render_segments(mode);
    let mut out = String::new();

    for segment in &segments {
        match segment.style() {
            Some(style) => {
                out.push_str(&to_ansi_escape(style, mode));
                out.push_str(segment.text());
                if mode != ColorMode::None {
                    out.push_str(RESET);
                }
            }
            None => out.push_str(segment.text()),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::style::Attributes;

    #[test]
    fn render_xterm256_span() {
        let mut text = Text::from_plain("hi");
        text.add_style(Style::fg(Color::xterm256(196)), 0, 2);
        assert_eq!(render(&text, ColorMode::Xterm256), "\x1b[38;5;196mhi\x1b[0m");
    }

    #[test]
    fn render_mode_none_strips_escapes() {
        let mut text = Text::from_plain("hi");
        text.add_style(Style::fg(Color::xterm256(196)), 0, 2);
        assert_eq!(render(&text, ColorMode::None), "hi");
    }

    #[test]
    fn unstyled_tail_renders_without_reset() {
        let mut text = Text::from_plain("hi there");
        text.add_style(
            Style::fg(Color::ansi16(1)).with_attributes(Attributes::BOLD),
            0,
            2,
        );
        assert_eq!(
            render(&text, ColorMode::Ansi16),
            "\x1b[1;31mhi\x1b[0m there"
        );
    }

    #[test]
    fn overlapping_spans_fold_in_insertion_order() {
        let mut text = Text::from_plain("abcd");
        text.add_style(Style::fg(Color::ansi16(1)), 0, 4);
        text.add_style(Style::fg(Color::ansi16(4)), 2, 4);
        let segments = text.render_segments(ColorMode::Ansi16);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text(), "ab");
        assert_eq!(segments[0].style().unwrap().foreground(), Some(Color::ansi16(1)));
        assert_eq!(segments[1].text(), "cd");
        assert_eq!(segments[1].style().unwrap().foreground(), Some(Color::ansi16(4)));
    }

    #[test]
    fn adjacent_equal_styles_coalesce() {
        let mut text = Text::from_plain("abcd");
        text.add_style(Style::fg(Color::ansi16(2)), 0, 2);
        text.add_style(Style::fg(Color::ansi16(2)), 2, 4);
        let segments = text.render_segments(ColorMode::Ansi16);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text(), "abcd");
    }

    #[test]
    fn spans_past_the_end_are_clamped() {
        let mut text = Text::from_plain("ab");
        text.add_style(Style::fg(Color::ansi16(3)), 1, 99);
        let segments = text.render_segments(ColorMode::Ansi16);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].text(), "b");
    }

    #[test]
    fn append_records_span_only_when_styled() {
        let mut text = Text::new();
        text.append("plain ", None);
        text.append("red", Some(Style::fg(Color::ansi16(1))));
        assert_eq!(text.plain(), "plain red");
        assert_eq!(text.spans().len(), 1);
        assert_eq!(text.spans()[0].start(), 6);
        assert_eq!(text.spans()[0].end(), 9);
    }

    #[test]
    fn empty_text_renders_empty() {
        assert_eq!(render(&Text::new(), ColorMode::TrueColor), "");
    }
}
