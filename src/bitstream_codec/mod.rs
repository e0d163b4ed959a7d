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

//! Demodulation of bit cell streams into bytes.
//!
//! A [Demodulator] knows the address marks of one data encoding and how to
//! turn the cells following a mark into bytes. Each demodulator also tracks
//! violations of its encoding's clocking rules, which feed track diagnostics.

pub mod fm;
pub mod gcr;
pub mod mfm;

use crate::{
    flux::CellStream,
    types::{DataEncoding, GcrScheme},
};
use bit_vec::BitVec;
use std::fmt::{Display, Formatter};

pub use fm::FmDemodulator;
pub use gcr::{AppleGcrDemodulator, CommodoreGcrDemodulator};
pub use mfm::MfmDemodulator;

/// The kind of address mark found on a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MarkKind {
    /// Index address mark, at the start of a System34 track.
    Index,
    /// Sector ID (header) mark.
    Id,
    Data,
    DeletedData,
}

impl Display for MarkKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkKind::Index => write!(f, "IAM"),
            MarkKind::Id => write!(f, "IDAM"),
            MarkKind::Data => write!(f, "DAM"),
            MarkKind::DeletedData => write!(f, "DDAM"),
        }
    }
}

impl MarkKind {
    pub fn is_data(&self) -> bool {
        matches!(self, MarkKind::Data | MarkKind::DeletedData)
    }
}

/// Defines the cell pattern and mask of an address mark.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MarkerEncoding {
    pub kind: MarkKind,
    pub bits: u64,
    pub mask: u64,
    /// Length of the pattern in cells.
    pub len:  usize,
}

/// An address mark located in a cell stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MarkHit {
    pub kind: MarkKind,
    /// Index of the first cell of the mark pattern.
    pub bit_offset: usize,
    /// Index of the first cell after the mark, where the mark's field begins.
    pub data_offset: usize,
}

/// Counts of encoding rule violations seen while demodulating.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DemodStats {
    /// A clock transition was expected but absent, or a zero run exceeded the encoding's limit.
    pub missing_clocks: u32,
    /// A clock transition was present where none was expected.
    pub extra_clocks: u32,
    /// GCR groups with no entry in the decode table.
    pub invalid_groups: u32,
}

impl DemodStats {
    pub fn merge(&mut self, other: &DemodStats) {
        self.missing_clocks += other.missing_clocks;
        self.extra_clocks += other.extra_clocks;
        self.invalid_groups += other.invalid_groups;
    }

    pub fn total(&self) -> u32 {
        self.missing_clocks + self.extra_clocks + self.invalid_groups
    }
}

/// Bytes read from a cell stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedBytes {
    pub bytes: Vec<u8>,
    /// Indexes into `bytes` of bytes containing at least one weak cell.
    pub weak_offsets: Vec<usize>,
    /// Index of the cell following the last byte read.
    pub end_offset: usize,
    pub stats: DemodStats,
}

impl DecodedBytes {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A demodulator for one data encoding.
pub trait Demodulator: Send + Sync {
    /// Return the [DataEncoding] this demodulator reads.
    fn encoding(&self) -> DataEncoding;
    /// The address marks of this encoding.
    fn markers(&self) -> &[MarkerEncoding];
    /// Read `count` bytes starting at cell `offset`. Fewer bytes are returned if the stream ends.
    fn read_bytes(&self, cells: &CellStream, offset: usize, count: usize) -> DecodedBytes;
    /// The decoded bytes of a mark that are covered by the CRC of the mark's field.
    fn mark_crc_prefix(&self, kind: MarkKind) -> &[u8];
    /// Encode a buffer of data into cells. `prev_bit` is the last data bit written before the buffer.
    fn encode(&self, data: &[u8], prev_bit: bool) -> BitVec;

    /// Cells per encoded byte.
    fn cells_per_byte(&self) -> usize {
        self.encoding().cells_per_byte()
    }

    /// Find the next address mark at or after cell `start`.
    fn find_mark(&self, cells: &CellStream, start: usize) -> Option<MarkHit> {
        let markers = self.markers();
        if cells.len() <= start || markers.is_empty() {
            return None;
        }

        let mut shift_reg: u64 = 0;
        let mut shift_ct: usize = 0;
        for bi in start..cells.len() {
            shift_reg = (shift_reg << 1) | cells.bit(bi) as u64;
            shift_ct += 1;
            for marker in markers {
                if shift_ct >= marker.len && (shift_reg & marker.mask) == marker.bits {
                    return Some(MarkHit {
                        kind: marker.kind,
                        bit_offset: bi + 1 - marker.len,
                        data_offset: bi + 1,
                    });
                }
            }
        }
        log::trace!("Demodulator::find_mark(): No marker after cell {}", start);
        None
    }

    /// Return the cells of an address mark pattern.
    fn encode_mark(&self, kind: MarkKind) -> Option<BitVec> {
        let marker = self.markers().iter().find(|m| m.kind == kind)?;
        Some((0..marker.len).rev().map(|i| (marker.bits >> i) & 1 == 1).collect())
    }
}

pub type BoxedDemodulator = Box<dyn Demodulator>;

/// Create the demodulator for a data encoding.
pub fn demodulator_for(encoding: DataEncoding) -> BoxedDemodulator {
    match encoding {
        DataEncoding::Fm => Box::new(FmDemodulator::new()),
        DataEncoding::Mfm => Box::new(MfmDemodulator::new()),
        DataEncoding::Gcr(GcrScheme::Commodore) => Box::new(CommodoreGcrDemodulator::new()),
        DataEncoding::Gcr(GcrScheme::Apple62) => Box::new(AppleGcrDemodulator::new()),
    }
}

/// Return true if any of the `len` cells starting at `start` is weak.
pub(crate) fn weak_byte(cells: &CellStream, start: usize, len: usize) -> bool {
    (start..start + len).any(|i| cells.is_weak(i))
}
