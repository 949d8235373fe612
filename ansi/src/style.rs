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

use crate::color::{to_ansi16, to_truecolor, to_xterm256, Color};
use std::fmt::Write;
use std::ops::{Add, AddAssign};

/// A set of text rendition attributes, stored as a bitset.
///
/// | Attribute | SGR code |
/// |-----------|----------|
/// | Bold | 1 |
/// | Dim | 2 |
/// | Italic | 3 |
/// | Underline | 4 |
/// | Blink | 5 |
/// | Blink2 | 6 |
/// | Reverse | 7 |
/// | Conceal | 8 |
/// | Strike | 9 |
/// | Underline2 | 21 |
/// | Frame | 51 |
/// | Encircle | 52 |
/// | Overline | 53 |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Attributes(u16);

impl Attributes {
    /// No attributes set.
    pub const NONE: Attributes = Attributes(0);
    /// Bold / increased intensity.
    pub const BOLD: Attributes = Attributes(1);
    /// Dim / decreased intensity.
    pub const DIM: Attributes = Attributes(1 << 1);
    /// Italic.
    pub const ITALIC: Attributes = Attributes(1 << 2);
    /// Single underline.
    pub const UNDERLINE: Attributes = Attributes(1 << 3);
    /// Slow blink.
    pub const BLINK: Attributes = Attributes(1 << 4);
    /// Rapid blink.
    pub const BLINK2: Attributes = Attributes(1 << 5);
    /// Reverse video.
    pub const REVERSE: Attributes = Attributes(1 << 6);
    /// Concealed text.
    pub const CONCEAL: Attributes = Attributes(1 << 7);
    /// Strikethrough.
    pub const STRIKE: Attributes = Attributes(1 << 8);
    /// Double underline.
    pub const UNDERLINE2: Attributes = Attributes(1 << 9);
    /// Framed.
    pub const FRAME: Attributes = Attributes(1 << 10);
    /// Encircled.
    pub const ENCIRCLE: Attributes = Attributes(1 << 11);
    /// Overline.
    pub const OVERLINE: Attributes = Attributes(1 << 12);

    /// True if no attribute bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set in `self`.
    pub fn contains(self, other: Attributes) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of the two sets.
    pub fn union(self, other: Attributes) -> Attributes {
        Attributes(self.0 | other.0)
    }

    /// `self` with every bit of `other` cleared.
    pub fn difference(self, other: Attributes) -> Attributes {
        Attributes(self.0 & !other.0)
    }
}

/// Output color depth selector for escape emission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// No escapes at all.
    #[default]
    None,
    /// 16-color SGR codes (30-37/90-97, 40-47/100-107).
    Ansi16,
    /// `38;5;N` / `48;5;N` palette codes.
    Xterm256,
    /// `38;2;R;G;B` / `48;2;R;G;B` direct color.
    TrueColor,
}

impl ColorMode {
    /// Map the numeric capability level carried in client data
    /// (0=none, 1=ansi16, 2=xterm256, 3=truecolor).
    pub fn from_level(level: u8) -> ColorMode {
        match level {
            0 => ColorMode::None,
            1 => ColorMode::Ansi16,
            2 => ColorMode::Xterm256,
            _ => ColorMode::TrueColor,
        }
    }
}

/// A composable text style: optional foreground, optional background and a
/// set of [`Attributes`].
///
/// Styles form a monoid under `+`. The right-hand side wins for any color it
/// sets; attribute sets union:
///
/// ```rust
/// use volcano_ansi::{Attributes, Color, Style};
///
/// let a = Style::fg(Color::ansi16(1)).with_attributes(Attributes::BOLD);
/// let b = Style::fg(Color::ansi16(4));
/// let c = a + b;
/// assert_eq!(c.foreground(), Some(Color::ansi16(4)));
/// assert!(c.attributes().contains(Attributes::BOLD));
/// assert_eq!(Style::default() + a, a);
/// assert_eq!(a + Style::default(), a);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Style {
    foreground: Option<Color>,
    background: Option<Color>,
    attributes: Attributes,
}

impl Style {
    /// The empty style: no colors, no attributes.
    pub fn new() -> Style {
        Style::default()
    }

    /// A style with only a foreground color.
    pub fn fg(color: Color) -> Style {
        Style {
            foreground: Some(color),
            ..Style::default()
        }
    }

    /// A style with only a background color.
    pub fn bg(color: Color) -> Style {
        Style {
            background: Some(color),
            ..Style::default()
        }
    }

    /// The foreground color, if set.
    pub fn foreground(&self) -> Option<Color> {
        self.foreground
    }

    /// The background color, if set.
    pub fn background(&self) -> Option<Color> {
        self.background
    }

    /// The attribute set.
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// True when the given attribute bits are all present.
    pub fn has_attribute(&self, attr: Attributes) -> bool {
        self.attributes.contains(attr)
    }

    /// Set the foreground color.
    pub fn set_foreground(&mut self, color: Color) -> &mut Style {
        self.foreground = Some(color);
        self
    }

    /// Set the background color.
    pub fn set_background(&mut self, color: Color) -> &mut Style {
        self.background = Some(color);
        self
    }

    /// Clear the foreground color.
    pub fn clear_foreground(&mut self) -> &mut Style {
        self.foreground = None;
        self
    }

    /// Clear the background color.
    pub fn clear_background(&mut self) -> &mut Style {
        self.background = None;
        self
    }

    /// Add attribute bits.
    pub fn add_attributes(&mut self, attrs: Attributes) -> &mut Style {
        self.attributes = self.attributes.union(attrs);
        self
    }

    /// Remove attribute bits.
    pub fn remove_attributes(&mut self, attrs: Attributes) -> &mut Style {
        self.attributes = self.attributes.difference(attrs);
        self
    }

    /// Builder form of [`Style::add_attributes`].
    pub fn with_attributes(mut self, attrs: Attributes) -> Style {
        self.attributes = self.attributes.union(attrs);
        self
    }
}

impl Add for Style {
    type Output = Style;

    fn add(self, rhs: Style) -> Style {
        Style {
            foreground: rhs.foreground.or(self.foreground),
            background: rhs.background.or(self.background),
            attributes: self.attributes.union(rhs.attributes),
        }
    }
}

impl AddAssign for Style {
    fn add_assign(&mut self, rhs: Style) {
        *self = *self + rhs;
    }
}

/// Attribute bits paired with their SGR codes, in emission order.
const ATTRIBUTE_CODES: [(Attributes, u8); 13] = [
    (Attributes::BOLD, 1),
    (Attributes::DIM, 2),
    (Attributes::ITALIC, 3),
    (Attributes::UNDERLINE, 4),
    (Attributes::BLINK, 5),
    (Attributes::BLINK2, 6),
    (Attributes::REVERSE, 7),
    (Attributes::CONCEAL, 8),
    (Attributes::STRIKE, 9),
    (Attributes::UNDERLINE2, 21),
    (Attributes::FRAME, 51),
    (Attributes::ENCIRCLE, 52),
    (Attributes::OVERLINE, 53),
];

/// Render a style as an SGR escape sequence for the given color mode.
///
/// Attribute codes come first in the fixed table order, then the foreground,
/// then the background. Returns the empty string when the mode is
/// [`ColorMode::None`] or the style produces no codes.
///
/// ```rust
/// use volcano_ansi::{to_ansi_escape, Attributes, Color, ColorMode, Style};
///
/// let style = Style::fg(Color::ansi16(4)).with_attributes(Attributes::BOLD);
/// assert_eq!(to_ansi_escape(&style, ColorMode::Ansi16), "\x1b[1;34m");
/// assert_eq!(to_ansi_escape(&style, ColorMode::None), "");
/// ```
pub fn to_ansi_escape(style: &Style, mode: ColorMode) -> String {
    if mode == ColorMode::None {
        return String::new();
    }

    let mut codes: Vec<u8> = Vec::new();

    for (attr, code) in ATTRIBUTE_CODES {
        if style.has_attribute(attr) {
            codes.push(code);
        }
    }

    let mut add_color = |color: Color, background: bool| match mode {
        ColorMode::Ansi16 => {
            let ansi = to_ansi16(color);
            let bright = ansi.index() >= 8;
            let base = match (background, bright) {
                (true, true) => 100,
                (true, false) => 40,
                (false, true) => 90,
                (false, false) => 30,
            };
            codes.push(base + (ansi.index() % 8));
        }
        ColorMode::Xterm256 => {
            let xterm = to_xterm256(color);
            codes.push(if background { 48 } else { 38 });
            codes.push(5);
            codes.push(xterm.index());
        }
        ColorMode::TrueColor => {
            let rgb = to_truecolor(color);
            codes.push(if background { 48 } else { 38 });
            codes.push(2);
            codes.push(rgb.r);
            codes.push(rgb.g);
            codes.push(rgb.b);
        }
        ColorMode::None => {}
    };

    if let Some(fg) = style.foreground() {
        add_color(fg, false);
    }
    if let Some(bg) = style.background() {
        add_color(bg, true);
    }

    if codes.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(4 + codes.len() * 4);
    out.push_str("\x1b[");
    for (i, code) in codes.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let _ = write!(out, "{code}");
    }
    out.push('m');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_prefers_rhs_colors_and_unions_attributes() {
        let a = Style::fg(Color::ansi16(1))
            .with_attributes(Attributes::BOLD)
            .with_attributes(Attributes::UNDERLINE);
        let b = Style::fg(Color::ansi16(2)).with_attributes(Attributes::ITALIC);
        let c = a + b;
        assert_eq!(c.foreground(), Some(Color::ansi16(2)));
        assert!(c.has_attribute(Attributes::BOLD));
        assert!(c.has_attribute(Attributes::UNDERLINE));
        assert!(c.has_attribute(Attributes::ITALIC));
    }

    #[test]
    fn composition_identity_and_associativity() {
        let a = Style::fg(Color::truecolor(1, 2, 3)).with_attributes(Attributes::DIM);
        let b = Style::bg(Color::xterm256(20));
        let c = Style::fg(Color::ansi16(7)).with_attributes(Attributes::REVERSE);
        assert_eq!(Style::default() + a, a);
        assert_eq!(a + Style::default(), a);
        assert_eq!((a + b) + c, a + (b + c));
    }

    #[test]
    fn escape_mode_none_is_empty() {
        let style = Style::fg(Color::ansi16(1)).with_attributes(Attributes::BOLD);
        assert_eq!(to_ansi_escape(&style, ColorMode::None), "");
    }

    #[test]
    fn escape_empty_style_is_empty() {
        assert_eq!(to_ansi_escape(&Style::default(), ColorMode::TrueColor), "");
    }

    #[test]
    fn escape_ansi16_bright_uses_90_and_100_bases() {
        let fg = Style::fg(Color::ansi16(9));
        assert_eq!(to_ansi_escape(&fg, ColorMode::Ansi16), "\x1b[91m");
        let bg = Style::bg(Color::ansi16(12));
        assert_eq!(to_ansi_escape(&bg, ColorMode::Ansi16), "\x1b[104m");
    }

    #[test]
    fn escape_bold_blue_foreground() {
        let style = Style::fg(Color::ansi16(4)).with_attributes(Attributes::BOLD);
        assert_eq!(to_ansi_escape(&style, ColorMode::Ansi16), "\x1b[1;34m");
    }

    #[test]
    fn escape_xterm256_and_truecolor_forms() {
        let style = Style::fg(Color::xterm256(196));
        assert_eq!(to_ansi_escape(&style, ColorMode::Xterm256), "\x1b[38;5;196m");
        let style = Style::bg(Color::truecolor(10, 20, 30));
        assert_eq!(
            to_ansi_escape(&style, ColorMode::TrueColor),
            "\x1b[48;2;10;20;30m"
        );
    }

    #[test]
    fn escape_attribute_order_is_fixed() {
        let style = Style::default()
            .with_attributes(Attributes::OVERLINE)
            .with_attributes(Attributes::BOLD)
            .with_attributes(Attributes::STRIKE);
        assert_eq!(to_ansi_escape(&style, ColorMode::Ansi16), "\x1b[1;9;53m");
    }

    #[test]
    fn escape_downsamples_for_narrow_modes() {
        let style = Style::fg(Color::truecolor(255, 0, 0));
        assert_eq!(to_ansi_escape(&style, ColorMode::Ansi16), "\x1b[91m");
        assert_eq!(to_ansi_escape(&style, ColorMode::Xterm256), "\x1b[38;5;196m");
    }
}
