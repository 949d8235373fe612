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

//! # Volcano Compression Streams
//!
//! Incremental zlib wrappers used by the telnet layer for MCCP2/MCCP3
//! stream compression. Unlike whole-stream adapters, these operate on
//! arbitrary chunk boundaries and hand every produced span to a
//! caller-supplied sink, which is what MCCP's byte-precise activation
//! points require: compression starts mid-connection, at an exact byte.
//!
//! ## Components
//!
//! - [`DeflateStream`]: compresses chunks at a chosen level. [`FlushMode`]
//!   selects how much pending state each call drains; the telnet writer uses
//!   [`FlushMode::Sync`] so every message becomes decodable immediately.
//! - [`InflateStream`]: the mirror image for inbound data.
//!
//! Both keep a 16 KiB scratch buffer and an `ended` latch; writing after
//! [`DeflateStream::finish`] is an error.
//!
//! ## Usage Example
//!
//! ```rust
//! use volcano_compress::{DeflateStream, FlushMode, InflateStream};
//!
//! let mut deflate = DeflateStream::new(9);
//! let mut compressed = Vec::new();
//! deflate
//!     .write(b"hello hello hello", |chunk| compressed.extend_from_slice(chunk), FlushMode::Sync)
//!     .unwrap();
//!
//! let mut inflate = InflateStream::new();
//! let mut restored = Vec::new();
//! inflate
//!     .write(&compressed, |chunk| restored.extend_from_slice(chunk))
//!     .unwrap();
//! assert_eq!(restored, b"hello hello hello");
//! ```
//!
//! ## Failure Behavior
//!
//! Codec errors surface as [`CompressError::Codec`]; the connection layer's
//! convention is to treat any such error as fatal and close the connection.

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

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use thiserror::Error;

/// Scratch buffer size shared by both stream directions.
const SCRATCH_SIZE: usize = 16 * 1024;

/// Result type for compression operations.
pub type CompressResult<T> = Result<T, CompressError>;

/// Errors raised by the compression streams.
#[derive(Debug, Error)]
pub enum CompressError {
    /// The underlying zlib codec failed; the stream is unusable.
    #[error("zlib codec failed: {0}")]
    Codec(String),

    /// Data was written after [`DeflateStream::finish`].
    #[error("stream already finished")]
    Finished,
}

/// How much pending codec state a [`DeflateStream::write`] call drains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Let the codec buffer freely.
    None,
    /// Emit everything written so far on a byte boundary (Z_SYNC_FLUSH).
    Sync,
    /// Like `Sync`, additionally resetting the compression state (Z_FULL_FLUSH).
    Full,
    /// Terminate the stream (Z_FINISH); no further writes are accepted.
    Finish,
}

impl FlushMode {
    fn as_compress(self) -> FlushCompress {
        match self {
            FlushMode::None => FlushCompress::None,
            FlushMode::Sync => FlushCompress::Sync,
            FlushMode::Full => FlushCompress::Full,
            FlushMode::Finish => FlushCompress::Finish,
        }
    }
}

/// An incremental zlib compressor.
///
/// Input may be split at arbitrary boundaries; every produced span is handed
/// to the sink closure. The stream stays usable until [`finish`] is called
/// or [`reset`] reinitializes it.
///
/// [`finish`]: DeflateStream::finish
/// [`reset`]: DeflateStream::reset
pub struct DeflateStream {
    codec: Compress,
    scratch: Vec<u8>,
    level: u32,
    ended: bool,
}

impl DeflateStream {
    /// Create a compressor at the given zlib level (0..=9).
    pub fn new(level: u32) -> DeflateStream {
        DeflateStream {
            codec: Compress::new(Compression::new(level), true),
            scratch: vec![0u8; SCRATCH_SIZE],
            level,
            ended: false,
        }
    }

    /// Push `input` through the codec, calling `sink` for each produced
    /// span. Returns the total number of compressed bytes produced.
    pub fn write(
        &mut self,
        input: &[u8],
        mut sink: impl FnMut(&[u8]),
        flush: FlushMode,
    ) -> CompressResult<usize> {
        if self.ended {
            return Err(CompressError::Finished);
        }

        let flush = flush.as_compress();
        let mut consumed = 0usize;
        let mut produced = 0usize;

        loop {
            let before_in = self.codec.total_in();
            let before_out = self.codec.total_out();
            let status = self
                .codec
                .compress(&input[consumed..], &mut self.scratch, flush)
                .map_err(|e| CompressError::Codec(e.to_string()))?;
            let read = (self.codec.total_in() - before_in) as usize;
            let wrote = (self.codec.total_out() - before_out) as usize;
            consumed += read;
            produced += wrote;
            if wrote > 0 {
                sink(&self.scratch[..wrote]);
            }

            match status {
                Status::StreamEnd => {
                    self.ended = true;
                    break;
                }
                // Done once all input is in and the scratch buffer was not
                // filled to the brim.
                _ => {
                    if consumed == input.len() && wrote < self.scratch.len() {
                        break;
                    }
                }
            }
        }

        Ok(produced)
    }

    /// Flush with finish semantics and seal the stream. Subsequent writes
    /// fail with [`CompressError::Finished`].
    pub fn finish(&mut self, sink: impl FnMut(&[u8])) -> CompressResult<usize> {
        let produced = self.write(&[], sink, FlushMode::Finish)?;
        self.ended = true;
        Ok(produced)
    }

    /// Discard all codec state and reinitialize, optionally at a new level.
    pub fn reset(&mut self, level: Option<u32>) {
        if let Some(level) = level {
            self.level = level;
        }
        self.codec = Compress::new(Compression::new(self.level), true);
        self.ended = false;
    }
}

/// An incremental zlib decompressor; the mirror image of [`DeflateStream`].
pub struct InflateStream {
    codec: Decompress,
    scratch: Vec<u8>,
    ended: bool,
}

impl Default for InflateStream {
    fn default() -> Self {
        InflateStream::new()
    }
}

impl InflateStream {
    /// Create a decompressor expecting a zlib-wrapped stream.
    pub fn new() -> InflateStream {
        InflateStream {
            codec: Decompress::new(true),
            scratch: vec![0u8; SCRATCH_SIZE],
            ended: false,
        }
    }

    /// Push compressed `input` through the codec, calling `sink` for each
    /// produced span. Returns the total number of decompressed bytes.
    pub fn write(&mut self, input: &[u8], mut sink: impl FnMut(&[u8])) -> CompressResult<usize> {
        if self.ended {
            return Err(CompressError::Finished);
        }

        let mut consumed = 0usize;
        let mut produced = 0usize;

        loop {
            let before_in = self.codec.total_in();
            let before_out = self.codec.total_out();
            let status = self
                .codec
                .decompress(&input[consumed..], &mut self.scratch, FlushDecompress::None)
                .map_err(|e| CompressError::Codec(e.to_string()))?;
            let read = (self.codec.total_in() - before_in) as usize;
            let wrote = (self.codec.total_out() - before_out) as usize;
            consumed += read;
            produced += wrote;
            if wrote > 0 {
                sink(&self.scratch[..wrote]);
            }

            match status {
                Status::StreamEnd => {
                    self.ended = true;
                    break;
                }
                _ => {
                    if consumed == input.len() && wrote < self.scratch.len() {
                        break;
                    }
                }
            }
        }

        Ok(produced)
    }

    /// Discard all codec state and reinitialize.
    pub fn reset(&mut self) {
        self.codec = Decompress::new(true);
        self.ended = false;
    }
}
