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

//! # Volcano Circle Color Codes
//!
//! Transliterates the legacy `@`-prefixed color markup used by circle-style
//! game text into [`volcano_ansi::Text`] spans. The pass is single-sweep,
//! left to right; every code transition flushes accumulated plain bytes as a
//! segment carrying the previous style.
//!
//! | Sequence | Effect |
//! |----------|--------|
//! | `@@` | literal `@` |
//! | `@n` | reset current style |
//! | `@d @b @g @c @r @m @y @w` | foreground black/blue/green/cyan/red/magenta/yellow/white |
//! | `@D @B @G @C @R @M @Y @W` | same foreground plus bold |
//! | `@0`..`@7` | background, same color map |
//! | `@l @o @u @e` | blink / bold / underline / reverse |
//! | `@x` | a random foreground |
//! | `@[N` | user-defined color N from the caller-supplied map |
//! | `@<spec>` | expanded color: name, palette index, or `r,g,b` |
//!
//! Unresolvable color specs fall back to black; a bare trailing `@` is
//! emitted literally.

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

use rand::Rng;
use std::collections::HashMap;
use volcano_ansi::{named_colors, render, Attributes, Color, ColorMode, Style, Text};

const RANDOM_COLORS: &[u8] = b"bgcrmywBGCRMWY";

/// The transliterator's running state: the plain-byte accumulator and the
/// style in force since the last code.
struct Builder {
    text: Text,
    buffer: Vec<u8>,
    current: Option<Style>,
}

impl Builder {
    fn new() -> Builder {
        Builder {
            text: Text::new(),
            buffer: Vec::new(),
            current: None,
        }
    }

    /// Flush accumulated bytes as a segment carrying the previous style.
    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let chunk = String::from_utf8_lossy(&self.buffer).into_owned();
            self.text.append(chunk, self.current);
            self.buffer.clear();
        }
    }

    fn style_mut(&mut self) -> &mut Style {
        self.current.get_or_insert_with(Style::default)
    }

    fn enable_attribute(&mut self, attribute: Attributes) {
        self.flush();
        self.style_mut().add_attributes(attribute);
    }

    fn enable_ansi_color(&mut self, code: u8, bold: bool, background: bool) {
        self.flush();
        let name = match code {
            b'd' | b'0' => "black",
            b'b' | b'1' => "blue",
            b'g' | b'2' => "green",
            b'c' | b'3' => "cyan",
            b'r' | b'4' => "red",
            b'm' | b'5' => "magenta",
            b'y' | b'6' => "yellow",
            b'w' | b'7' => "white",
            _ => return,
        };
        let color = named_colors()[name];
        let style = self.style_mut();
        if background {
            style.set_background(color);
        } else {
            style.set_foreground(color);
        }
        if bold {
            style.add_attributes(Attributes::BOLD);
        }
    }

    fn set_user_color(&mut self, index: u8, custom_colors: &HashMap<u8, String>) {
        self.flush();
        let color = custom_colors
            .get(&index)
            .and_then(|name| named_colors().get(name.as_str()).copied())
            .unwrap_or_else(|| named_colors()["black"]);
        self.style_mut().set_foreground(color);
    }

    fn set_expanded_color(&mut self, spec: &str) {
        self.flush();
        let color = resolve_expanded_color(spec);
        self.style_mut().set_foreground(color);
    }

    fn reset(&mut self) {
        self.flush();
        self.current = None;
    }

    fn finish(mut self) -> Text {
        self.flush();
        self.text
    }
}

/// Resolve an expanded `@<...>` color spec: a name, a palette index, or an
/// `r,g,b` triple. Anything unresolvable is black.
fn resolve_expanded_color(spec: &str) -> Color {
    let black = named_colors()["black"];
    let spec = spec.trim();
    if spec.is_empty() {
        return black;
    }

    if spec.contains(',') {
        let parts: Vec<&str> = spec.split(',').collect();
        if parts.len() != 3 {
            return black;
        }
        let mut channels = [0u8; 3];
        for (slot, part) in channels.iter_mut().zip(&parts) {
            match part.trim().parse::<u8>() {
                Ok(value) => *slot = value,
                Err(_) => return black,
            }
        }
        return Color::truecolor(channels[0], channels[1], channels[2]);
    }

    if let Ok(index) = spec.parse::<u8>() {
        return if index < 16 {
            Color::ansi16(index)
        } else {
            Color::xterm256(index)
        };
    }

    let name: String = spec
        .chars()
        .map(|c| if c == ' ' { '_' } else { c.to_ascii_lowercase() })
        .collect();
    named_colors().get(name.as_str()).copied().unwrap_or(black)
}

/// Transliterate `@`-markup into spanned text.
///
/// `custom_colors` maps user-defined `@[N` indices onto named colors;
/// unknown indices and unknown names fall back to black.
pub fn to_text(txt: &str, custom_colors: &HashMap<u8, String>) -> Text {
    let bytes = txt.as_bytes();
    let mut builder = Builder::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        if bytes[pos] != b'@' {
            builder.buffer.push(bytes[pos]);
            pos += 1;
            continue;
        }
        pos += 1;

        if pos >= bytes.len() {
            // trailing @ is literal
            builder.buffer.push(b'@');
            break;
        }

        let code = bytes[pos];
        match code {
            b'@' => {
                builder.buffer.push(b'@');
                pos += 1;
            }
            b'n' => {
                builder.reset();
                pos += 1;
            }
            b'd' | b'b' | b'g' | b'c' | b'r' | b'm' | b'y' | b'w' => {
                builder.enable_ansi_color(code, false, false);
                pos += 1;
            }
            b'D' | b'B' | b'G' | b'C' | b'R' | b'M' | b'Y' | b'W' => {
                builder.enable_ansi_color(code.to_ascii_lowercase(), true, false);
                pos += 1;
            }
            b'0'..=b'7' => {
                builder.enable_ansi_color(code, false, true);
                pos += 1;
            }
            b'l' => {
                builder.enable_attribute(Attributes::BLINK);
                pos += 1;
            }
            b'o' => {
                builder.enable_attribute(Attributes::BOLD);
                pos += 1;
            }
            b'u' => {
                builder.enable_attribute(Attributes::UNDERLINE);
                pos += 1;
            }
            b'e' => {
                builder.enable_attribute(Attributes::REVERSE);
                pos += 1;
            }
            b'x' => {
                let pick = RANDOM_COLORS[rand::thread_rng().gen_range(0..RANDOM_COLORS.len())];
                builder.enable_ansi_color(pick.to_ascii_lowercase(), pick.is_ascii_uppercase(), false);
                pos += 1;
            }
            b'[' => {
                let start = pos + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if start == end {
                    // no digits: emit nothing, skip the bracket
                    pos += 1;
                    continue;
                }
                let index = txt[start..end].parse::<u32>().unwrap_or(0);
                builder.set_user_color(index.min(255) as u8, custom_colors);
                pos = end;
            }
            b'<' => {
                let start = pos + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != b'>' {
                    end += 1;
                }
                if end >= bytes.len() {
                    // unterminated spec: drop the @ and carry on
                    pos += 1;
                    continue;
                }
                builder.set_expanded_color(&txt[start..end]);
                pos = end + 1;
            }
            _ => {
                // unknown code: the @ is dropped, the code char is literal
            }
        }
    }

    builder.finish()
}

/// Transliterate and render in one step.
pub fn process_colors(txt: &str, mode: ColorMode, custom_colors: &HashMap<u8, String>) -> String {
    render(&to_text(txt, custom_colors), mode)
}

/// How many bytes of `txt` are markup rather than visible text.
pub fn count_colors(txt: &str) -> usize {
    let text = to_text(txt, &HashMap::new());
    txt.len() - text.plain().len()
}

/// Whether `c` is one of the single-letter color codes.
pub fn is_color_char(c: char) -> bool {
    matches!(
        c,
        'n' | 'b'
            | 'B'
            | 'g'
            | 'G'
            | 'm'
            | 'M'
            | 'r'
            | 'R'
            | 'y'
            | 'Y'
            | 'w'
            | 'W'
            | 'k'
            | 'K'
            | '0'
            | '2'
            | '3'
            | '4'
            | '5'
            | '6'
            | '7'
            | 'l'
            | 'u'
            | 'o'
            | 'e'
    )
}
