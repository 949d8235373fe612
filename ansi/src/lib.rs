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

//! # Volcano ANSI Style Engine
//!
//! This crate provides the styled-text model used for everything the portal
//! renders towards a terminal: color values across the three terminal color
//! systems, composable styles, span-tagged text, and SGR escape emission.
//!
//! ## Core Components
//!
//! ### [`Color`]
//!
//! A color in one of three systems:
//!
//! - [`Color::Ansi16`] - the classic 16-color palette (index 0..=15)
//! - [`Color::Xterm256`] - the xterm 256-color palette (index 0..=255)
//! - [`Color::TrueColor`] - 24-bit RGB
//!
//! Conversions between the systems ([`to_truecolor`], [`to_ansi16`],
//! [`to_xterm256`]) are total: downsampling picks the nearest palette entry
//! by squared RGB distance.
//!
//! ### [`Style`]
//!
//! An optional foreground, an optional background and a set of
//! [`Attributes`]. Styles compose with `+`: the right-hand side wins for
//! colors it sets, attribute sets union.
//!
//! ### [`Text`]
//!
//! A plain byte string plus overlapping [`Span`]s. Rendering folds the spans
//! covering each byte in insertion order, coalesces maximal runs of equal
//! effective style into [`Segment`]s, and emits one escape prefix per
//! segment.
//!
//! ## Color Modes
//!
//! Every rendering entry point takes a [`ColorMode`] describing what the
//! terminal on the other end can display. `ColorMode::None` suppresses all
//! escapes; the other modes downsample colors as needed.
//!
//! ## Usage Example
//!
//! ```rust
//! use volcano_ansi::{render, Color, ColorMode, Style, Text};
//!
//! let mut text = Text::new();
//! text.append("hi", Some(Style::fg(Color::xterm256(196))));
//! assert_eq!(render(&text, ColorMode::Xterm256), "\x1b[38;5;196mhi\x1b[0m");
//! assert_eq!(render(&text, ColorMode::None), "hi");
//! ```
//!
//! ## Failure Behavior
//!
//! The engine never fails. Out-of-range palette indices are masked at
//! construction, unknown color names fall back to black at the lookup sites
//! that consume the [`named_colors`] table.

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

mod color;
mod named;
mod style;
mod text;

pub use self::color::{
    nearest_ansi16_index, to_ansi16, to_truecolor, to_xterm256, truecolor_to_xterm,
    xterm_to_truecolor, AnsiColor, Color, Rgb, TrueColor, XtermColor,
};
pub use self::named::named_colors;
pub use self::style::{to_ansi_escape, Attributes, ColorMode, Style};
pub use self::text::{render, Renderable, Segment, Span, Text};
