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

/// A plain RGB triple, used as the working representation for palette math.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
}

/// The standard xterm rendition of the 16-color palette: mid-intensity
/// bases, full-intensity brights.
const ANSI16_PALETTE: [Rgb; 16] = [
    Rgb { r: 0, g: 0, b: 0 },         // black
    Rgb { r: 205, g: 0, b: 0 },       // red
    Rgb { r: 0, g: 205, b: 0 },       // green
    Rgb { r: 205, g: 205, b: 0 },     // yellow
    Rgb { r: 0, g: 0, b: 238 },       // blue
    Rgb { r: 205, g: 0, b: 205 },     // magenta
    Rgb { r: 0, g: 205, b: 205 },     // cyan
    Rgb { r: 229, g: 229, b: 229 },   // white (light gray)
    Rgb { r: 127, g: 127, b: 127 },   // bright black (dark gray)
    Rgb { r: 255, g: 0, b: 0 },       // bright red
    Rgb { r: 0, g: 255, b: 0 },       // bright green
    Rgb { r: 255, g: 255, b: 0 },     // bright yellow
    Rgb { r: 92, g: 92, b: 255 },     // bright blue
    Rgb { r: 255, g: 0, b: 255 },     // bright magenta
    Rgb { r: 0, g: 255, b: 255 },     // bright cyan
    Rgb { r: 255, g: 255, b: 255 },   // bright white
];

/// Levels of the 6x6x6 color cube occupying xterm indices 16..=231.
const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

/// A color in the 16-color palette.
///
/// The index is guaranteed to be in `0..=15`; out-of-range input is masked
/// at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnsiColor {
    index: u8,
}

impl AnsiColor {
    /// Create a 16-color palette entry. Indices above 15 wrap.
    pub fn new(index: u8) -> AnsiColor {
        AnsiColor { index: index % 16 }
    }

    /// The palette index, always in `0..=15`.
    pub fn index(self) -> u8 {
        self.index
    }
}

/// A color in the xterm 256-color palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct XtermColor {
    index: u8,
}

impl XtermColor {
    /// Create a 256-color palette entry.
    pub fn new(index: u8) -> XtermColor {
        XtermColor { index }
    }

    /// The palette index.
    pub fn index(self) -> u8 {
        self.index
    }
}

/// A 24-bit RGB color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrueColor {
    /// Red channel
    pub r: u8,
    /// Green channel
    pub g: u8,
    /// Blue channel
    pub b: u8,
}

/// A terminal color in one of the three color systems.
///
/// ```rust
/// use volcano_ansi::Color;
///
/// let red = Color::ansi16(1);
/// let bright = Color::xterm256(196);
/// let exact = Color::truecolor(205, 0, 0);
/// assert_ne!(red, bright);
/// assert_eq!(exact, Color::truecolor(205, 0, 0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    /// Classic 16-color palette entry.
    Ansi16(AnsiColor),
    /// Xterm 256-color palette entry.
    Xterm256(XtermColor),
    /// 24-bit RGB.
    TrueColor(TrueColor),
}

impl Color {
    /// A 16-color palette entry. Indices above 15 wrap.
    pub fn ansi16(index: u8) -> Color {
        Color::Ansi16(AnsiColor::new(index))
    }

    /// A 256-color palette entry.
    pub fn xterm256(index: u8) -> Color {
        Color::Xterm256(XtermColor::new(index))
    }

    /// A 24-bit RGB color.
    pub fn truecolor(r: u8, g: u8, b: u8) -> Color {
        Color::TrueColor(TrueColor { r, g, b })
    }
}

/// Expand an xterm-256 palette index to its canonical RGB value.
///
/// Indices below 16 use the fixed 16-entry palette, 232..=255 map onto the
/// 24-step grey ramp (`8 + (index - 232) * 10` per channel), and everything
/// between decomposes into 6x6x6 cube coordinates over the
/// `{0, 95, 135, 175, 215, 255}` level table.
pub fn xterm_to_truecolor(index: u8) -> TrueColor {
    if index < 16 {
        let c = ANSI16_PALETTE[index as usize];
        return TrueColor { r: c.r, g: c.g, b: c.b };
    }
    if index >= 232 {
        let grey = 8 + (index - 232) * 10;
        return TrueColor { r: grey, g: grey, b: grey };
    }
    let idx = index - 16;
    let r = idx / 36;
    let g = (idx / 6) % 6;
    let b = idx % 6;
    TrueColor {
        r: CUBE_LEVELS[r as usize],
        g: CUBE_LEVELS[g as usize],
        b: CUBE_LEVELS[b as usize],
    }
}

/// Widen any color to 24-bit RGB.
pub fn to_truecolor(color: Color) -> TrueColor {
    match color {
        Color::TrueColor(c) => c,
        Color::Ansi16(c) => {
            let p = ANSI16_PALETTE[c.index() as usize];
            TrueColor { r: p.r, g: p.g, b: p.b }
        }
        Color::Xterm256(c) => xterm_to_truecolor(c.index()),
    }
}

fn distance2(a: TrueColor, b: TrueColor) -> u32 {
    let dr = i32::from(a.r) - i32::from(b.r);
    let dg = i32::from(a.g) - i32::from(b.g);
    let db = i32::from(a.b) - i32::from(b.b);
    (dr * dr + dg * dg + db * db) as u32
}

/// Index of the nearest 16-color palette entry by squared RGB distance.
pub fn nearest_ansi16_index(color: TrueColor) -> u8 {
    let mut best = u32::MAX;
    let mut best_idx = 0u8;
    for (i, p) in ANSI16_PALETTE.iter().enumerate() {
        let dist = distance2(color, TrueColor { r: p.r, g: p.g, b: p.b });
        if dist < best {
            best = dist;
            best_idx = i as u8;
        }
    }
    best_idx
}

/// Downsample an RGB color to the nearest xterm-256 index.
///
/// Candidates are the enclosing 6x6x6 cube cell and the nearest entry of the
/// 24-step grey ramp; the closer of the two (squared distance to the
/// candidate's canonical RGB) wins, with ties going to the cube.
pub fn truecolor_to_xterm(color: TrueColor) -> u8 {
    fn to_cube(v: u8) -> u8 {
        if v < 48 {
            0
        } else if v < 114 {
            1
        } else {
            (v - 35) / 40
        }
    }

    let r = to_cube(color.r);
    let g = to_cube(color.g);
    let b = to_cube(color.b);
    let cube_index = 16 + (36 * r) + (6 * g) + b;
    let cube_color = TrueColor {
        r: CUBE_LEVELS[r as usize],
        g: CUBE_LEVELS[g as usize],
        b: CUBE_LEVELS[b as usize],
    };

    let grey_avg = ((u16::from(color.r) + u16::from(color.g) + u16::from(color.b)) / 3) as u8;
    let grey_index = (i32::from(grey_avg) - 8).clamp(0, 230) as u8 / 10;
    let grey_index = grey_index.min(23);
    let grey_level = 8 + grey_index * 10;
    let grey_color = TrueColor { r: grey_level, g: grey_level, b: grey_level };
    let grey_xterm = 232 + grey_index;

    if distance2(color, cube_color) <= distance2(color, grey_color) {
        cube_index
    } else {
        grey_xterm
    }
}

/// Narrow any color to the 16-color palette.
pub fn to_ansi16(color: Color) -> AnsiColor {
    match color {
        Color::Ansi16(c) => c,
        Color::Xterm256(c) if c.index() < 16 => AnsiColor::new(c.index()),
        Color::Xterm256(c) => AnsiColor::new(nearest_ansi16_index(xterm_to_truecolor(c.index()))),
        Color::TrueColor(c) => AnsiColor::new(nearest_ansi16_index(c)),
    }
}

/// Narrow any color to the xterm 256-color palette.
pub fn to_xterm256(color: Color) -> XtermColor {
    match color {
        Color::Xterm256(c) => c,
        Color::Ansi16(c) => XtermColor::new(c.index()),
        Color::TrueColor(c) => XtermColor::new(truecolor_to_xterm(c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi16_index_masks() {
        assert_eq!(AnsiColor::new(15).index(), 15);
        assert_eq!(AnsiColor::new(16).index(), 0);
        assert_eq!(AnsiColor::new(37).index(), 5);
    }

    #[test]
    fn xterm_expansion_low_indices_use_palette() {
        assert_eq!(xterm_to_truecolor(1), TrueColor { r: 205, g: 0, b: 0 });
        assert_eq!(xterm_to_truecolor(9), TrueColor { r: 255, g: 0, b: 0 });
    }

    #[test]
    fn xterm_expansion_grey_ramp() {
        assert_eq!(xterm_to_truecolor(232), TrueColor { r: 8, g: 8, b: 8 });
        assert_eq!(xterm_to_truecolor(255), TrueColor { r: 238, g: 238, b: 238 });
    }

    #[test]
    fn xterm_expansion_cube() {
        // 196 = 16 + 36*5 -> (5, 0, 0) -> (255, 0, 0)
        assert_eq!(xterm_to_truecolor(196), TrueColor { r: 255, g: 0, b: 0 });
        // 16 = cube origin
        assert_eq!(xterm_to_truecolor(16), TrueColor { r: 0, g: 0, b: 0 });
        // 231 = cube max
        assert_eq!(xterm_to_truecolor(231), TrueColor { r: 255, g: 255, b: 255 });
    }

    #[test]
    fn cube_round_trips_exactly() {
        for index in 16..=231u8 {
            let rgb = xterm_to_truecolor(index);
            assert_eq!(truecolor_to_xterm(rgb), index, "index {index}");
        }
    }

    #[test]
    fn grey_ramp_round_trips_exactly() {
        for index in 232..=255u8 {
            let rgb = xterm_to_truecolor(index);
            assert_eq!(truecolor_to_xterm(rgb), index, "index {index}");
        }
    }

    #[test]
    fn downsample_stays_within_discretisation_bound() {
        // The palette's max per-channel gap puts every RGB value within 75
        // units of its chosen cell.
        for r in (0..=255u16).step_by(17) {
            for g in (0..=255u16).step_by(17) {
                for b in (0..=255u16).step_by(17) {
                    let rgb = TrueColor { r: r as u8, g: g as u8, b: b as u8 };
                    let back = xterm_to_truecolor(truecolor_to_xterm(rgb));
                    let max_delta = [
                        (i32::from(rgb.r) - i32::from(back.r)).abs(),
                        (i32::from(rgb.g) - i32::from(back.g)).abs(),
                        (i32::from(rgb.b) - i32::from(back.b)).abs(),
                    ]
                    .into_iter()
                    .max()
                    .unwrap();
                    assert!(max_delta <= 75, "{rgb:?} -> {back:?}");
                }
            }
        }
    }

    #[test]
    fn nearest_ansi16_picks_exact_palette_hits() {
        assert_eq!(nearest_ansi16_index(TrueColor { r: 205, g: 0, b: 0 }), 1);
        assert_eq!(nearest_ansi16_index(TrueColor { r: 255, g: 255, b: 255 }), 15);
        assert_eq!(nearest_ansi16_index(TrueColor { r: 0, g: 0, b: 0 }), 0);
    }

    #[test]
    fn narrowing_conversions() {
        assert_eq!(to_ansi16(Color::xterm256(9)).index(), 9);
        assert_eq!(to_xterm256(Color::ansi16(7)).index(), 7);
        assert_eq!(to_ansi16(Color::truecolor(250, 10, 10)).index(), 9);
    }
}
