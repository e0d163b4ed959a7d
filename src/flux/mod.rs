/*
    FluxFox
    https://github.com/dbalsom/fluxfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Flux timing input and clock recovery.
//!
//! A capture device reports the time between flux transitions in ticks of its
//! sample clock. A [Revolution] holds the transitions of one rotation of the
//! disk, and the [pll::Pll] turns those intervals into a stream of bit cells.

pub mod flux_revolution;
pub mod histogram;
pub mod pll;

pub use flux_revolution::{split_revolutions, Revolution, RevolutionStats};
pub use histogram::FluxHistogram;
pub use pll::{BitCell, CellRun, CellStream, Pll, PllDecodeResult, PllLockState, PllParams, PllPreset, PllStats};

#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.4}μs", $value * 1_000_000.0)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! format_ms {
    ($value:expr) => {
        format!("{:.4}ms", $value * 1_000.0)
    };
}

/// A single flux transition as reported by a capture device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxSample {
    /// Sample clock ticks since the previous transition.
    pub ticks: u32,
    /// An index pulse was seen during this interval.
    pub index: bool,
}

impl FluxSample {
    pub fn new(ticks: u32) -> Self {
        Self { ticks, index: false }
    }
    /// Create a sample during which an index pulse was seen.
    pub fn with_index(ticks: u32) -> Self {
        Self { ticks, index: true }
    }
}

impl From<u32> for FluxSample {
    fn from(ticks: u32) -> Self {
        Self::new(ticks)
    }
}
