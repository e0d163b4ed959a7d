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

//! FM demodulation.
//!
//! Every data bit is preceded by a clock cell that always holds a transition.
//! Address marks are written with some of those clock transitions removed,
//! giving a clock pattern of 0xC7 (or 0xD7 for the index mark) instead of 0xFF.

use crate::{
    bitstream_codec::{weak_byte, DecodedBytes, Demodulator, MarkKind, MarkerEncoding},
    flux::CellStream,
    types::DataEncoding,
};
use bit_vec::BitVec;

pub const FM_BYTE_LEN: usize = 16;
pub const FM_MARKER_LEN: usize = 32;

pub const FM_DATA_CLOCK: u8 = 0xFF;
pub const FM_MARK_CLOCK: u8 = 0xC7;
pub const FM_INDEX_CLOCK: u8 = 0xD7;

/// Interleave a clock byte and a data byte into 16 cells, clock first.
pub const fn interleave_fm(clock: u8, data: u8) -> u16 {
    let mut accum: u16 = 0;
    let mut i = 8;
    while i > 0 {
        i -= 1;
        let c = ((clock >> i) & 1) as u16;
        let d = ((data >> i) & 1) as u16;
        accum = (accum << 2) | (c << 1) | d;
    }
    accum
}

const fn fm_marker(kind: MarkKind, clock: u8, mark: u8) -> MarkerEncoding {
    // Marks follow a gap of zero bytes, which read as 0xAAAA.
    let gap = interleave_fm(FM_DATA_CLOCK, 0x00) as u64;
    MarkerEncoding {
        kind,
        bits: (gap << 16) | interleave_fm(clock, mark) as u64,
        mask: 0xFFFF_FFFF,
        len: FM_MARKER_LEN,
    }
}

pub const FM_IDAM_MARKER: MarkerEncoding = fm_marker(MarkKind::Id, FM_MARK_CLOCK, 0xFE);
pub const FM_DAM_MARKER: MarkerEncoding = fm_marker(MarkKind::Data, FM_MARK_CLOCK, 0xFB);
pub const FM_DDAM_MARKER: MarkerEncoding = fm_marker(MarkKind::DeletedData, FM_MARK_CLOCK, 0xF8);
pub const FM_IAM_MARKER: MarkerEncoding = fm_marker(MarkKind::Index, FM_INDEX_CLOCK, 0xFC);

static FM_MARKERS: [MarkerEncoding; 4] = [FM_IDAM_MARKER, FM_DAM_MARKER, FM_DDAM_MARKER, FM_IAM_MARKER];

#[derive(Copy, Clone, Debug, Default)]
pub struct FmDemodulator;

impl FmDemodulator {
    pub fn new() -> Self {
        FmDemodulator
    }
}

impl Demodulator for FmDemodulator {
    fn encoding(&self) -> DataEncoding {
        DataEncoding::Fm
    }

    fn markers(&self) -> &[MarkerEncoding] {
        &FM_MARKERS
    }

    fn read_bytes(&self, cells: &CellStream, offset: usize, count: usize) -> DecodedBytes {
        let mut decoded = DecodedBytes {
            bytes: Vec::with_capacity(count),
            end_offset: offset,
            ..DecodedBytes::default()
        };

        let mut cursor = offset;
        for byte_idx in 0..count {
            if cursor + FM_BYTE_LEN > cells.len() {
                log::trace!(
                    "FmDemodulator::read_bytes(): Stream ended after {} of {} bytes",
                    byte_idx,
                    count
                );
                break;
            }

            let mut byte = 0u8;
            for bit in 0..8 {
                if !cells.bit(cursor + bit * 2) {
                    decoded.stats.missing_clocks += 1;
                }
                byte = (byte << 1) | cells.bit(cursor + bit * 2 + 1) as u8;
            }

            if weak_byte(cells, cursor, FM_BYTE_LEN) {
                decoded.weak_offsets.push(byte_idx);
            }
            decoded.bytes.push(byte);
            cursor += FM_BYTE_LEN;
        }

        decoded.end_offset = cursor;
        decoded
    }

    fn mark_crc_prefix(&self, kind: MarkKind) -> &[u8] {
        match kind {
            MarkKind::Index => &[0xFC],
            MarkKind::Id => &[0xFE],
            MarkKind::Data => &[0xFB],
            MarkKind::DeletedData => &[0xF8],
        }
    }

    fn encode(&self, data: &[u8], _prev_bit: bool) -> BitVec {
        let mut bitvec = BitVec::with_capacity(data.len() * FM_BYTE_LEN);
        for &byte in data {
            let encoded = interleave_fm(FM_DATA_CLOCK, byte);
            for i in (0..16).rev() {
                bitvec.push((encoded >> i) & 1 != 0);
            }
        }
        bitvec
    }
}
