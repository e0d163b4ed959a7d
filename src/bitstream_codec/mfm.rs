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

//! MFM demodulation.
//!
//! Each data bit occupies two cells, a clock cell followed by a data cell. A
//! clock transition is written only between two zero data bits. Address marks
//! are preceded by three sync bytes written with one clock transition
//! suppressed, which cannot occur in normal data.

use crate::{
    bitstream_codec::{weak_byte, DecodedBytes, Demodulator, MarkKind, MarkerEncoding},
    flux::CellStream,
    types::DataEncoding,
};
use bit_vec::BitVec;

pub const MFM_BYTE_LEN: usize = 16;
pub const MFM_MARKER_LEN: usize = 64;

/// 0xA1 with the clock between bits 4 and 5 missing.
pub const MFM_SYNC_A1: u16 = 0x4489;
/// 0xC2 with the clock between bits 3 and 4 missing.
pub const MFM_SYNC_C2: u16 = 0x5224;

pub const IAM_MARKER_BYTES: [u8; 4] = [0xC2, 0xC2, 0xC2, 0xFC];
pub const IDAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFE];
pub const DAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xFB];
pub const DDAM_MARKER_BYTES: [u8; 4] = [0xA1, 0xA1, 0xA1, 0xF8];

/// MFM encode a byte, given the last data bit written before it.
pub const fn encode_mfm_byte(byte: u8, mut prev_bit: bool) -> u16 {
    let mut accum: u16 = 0;
    let mut i = 8;
    while i > 0 {
        i -= 1;
        let bit = (byte >> i) & 1 != 0;
        let clock = !prev_bit && !bit;
        accum = (accum << 2) | ((clock as u16) << 1) | bit as u16;
        prev_bit = bit;
    }
    accum
}

const fn mfm_marker(kind: MarkKind, sync: u16, mark: u8) -> MarkerEncoding {
    // Both sync bytes end in a data bit that determines the mark byte's first clock.
    let prev_bit = sync & 1 != 0;
    let sync = sync as u64;
    MarkerEncoding {
        kind,
        bits: (sync << 48) | (sync << 32) | (sync << 16) | encode_mfm_byte(mark, prev_bit) as u64,
        mask: !0,
        len: MFM_MARKER_LEN,
    }
}

pub const MFM_IDAM_MARKER: MarkerEncoding = mfm_marker(MarkKind::Id, MFM_SYNC_A1, 0xFE);
pub const MFM_DAM_MARKER: MarkerEncoding = mfm_marker(MarkKind::Data, MFM_SYNC_A1, 0xFB);
pub const MFM_DDAM_MARKER: MarkerEncoding = mfm_marker(MarkKind::DeletedData, MFM_SYNC_A1, 0xF8);
pub const MFM_IAM_MARKER: MarkerEncoding = mfm_marker(MarkKind::Index, MFM_SYNC_C2, 0xFC);

static MFM_MARKERS: [MarkerEncoding; 4] = [MFM_IDAM_MARKER, MFM_DAM_MARKER, MFM_DDAM_MARKER, MFM_IAM_MARKER];

#[derive(Copy, Clone, Debug, Default)]
pub struct MfmDemodulator;

impl MfmDemodulator {
    pub fn new() -> Self {
        MfmDemodulator
    }
}

impl Demodulator for MfmDemodulator {
    fn encoding(&self) -> DataEncoding {
        DataEncoding::Mfm
    }

    fn markers(&self) -> &[MarkerEncoding] {
        &MFM_MARKERS
    }

    fn read_bytes(&self, cells: &CellStream, offset: usize, count: usize) -> DecodedBytes {
        let mut decoded = DecodedBytes {
            bytes: Vec::with_capacity(count),
            end_offset: offset,
            ..DecodedBytes::default()
        };

        // The cell before a byte boundary is the previous byte's last data bit.
        let mut prev_bit = offset > 0 && cells.bit(offset - 1);
        let mut cursor = offset;

        for byte_idx in 0..count {
            if cursor + MFM_BYTE_LEN > cells.len() {
                log::trace!(
                    "MfmDemodulator::read_bytes(): Stream ended after {} of {} bytes",
                    byte_idx,
                    count
                );
                break;
            }

            let mut byte = 0u8;
            for bit in 0..8 {
                let clock = cells.bit(cursor + bit * 2);
                let data = cells.bit(cursor + bit * 2 + 1);
                let expected_clock = !prev_bit && !data;
                if clock && !expected_clock {
                    decoded.stats.extra_clocks += 1;
                }
                else if !clock && expected_clock {
                    decoded.stats.missing_clocks += 1;
                }
                byte = (byte << 1) | data as u8;
                prev_bit = data;
            }

            if weak_byte(cells, cursor, MFM_BYTE_LEN) {
                decoded.weak_offsets.push(byte_idx);
            }
            decoded.bytes.push(byte);
            cursor += MFM_BYTE_LEN;
        }

        decoded.end_offset = cursor;
        decoded
    }

    fn mark_crc_prefix(&self, kind: MarkKind) -> &[u8] {
        match kind {
            MarkKind::Index => &IAM_MARKER_BYTES,
            MarkKind::Id => &IDAM_MARKER_BYTES,
            MarkKind::Data => &DAM_MARKER_BYTES,
            MarkKind::DeletedData => &DDAM_MARKER_BYTES,
        }
    }

    fn encode(&self, data: &[u8], prev_bit: bool) -> BitVec {
        let mut bitvec = BitVec::with_capacity(data.len() * MFM_BYTE_LEN);
        let mut prev_bit = prev_bit;
        for &byte in data {
            let encoded = encode_mfm_byte(byte, prev_bit);
            for i in (0..16).rev() {
                bitvec.push((encoded >> i) & 1 != 0);
            }
            prev_bit = byte & 1 != 0;
        }
        bitvec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_patterns() {
        assert_eq!(MFM_IDAM_MARKER.bits, 0x4489_4489_4489_5554);
        assert_eq!(MFM_DAM_MARKER.bits, 0x4489_4489_4489_5545);
        assert_eq!(MFM_DDAM_MARKER.bits, 0x4489_4489_4489_554A);
        assert_eq!(MFM_IAM_MARKER.bits, 0x5224_5224_5224_5552);
        // 0xA1 with all clocks present
        assert_eq!(encode_mfm_byte(0xA1, false), 0x44A9);
    }

    #[test]
    fn test_read_encoded_bytes() {
        let demod = MfmDemodulator::new();
        let data = [0x00, 0xFF, 0x4E, 0xA1, 0x55, 0x80, 0x01];
        let cells = CellStream::from_bits(demod.encode(&data, false));

        let decoded = demod.read_bytes(&cells, 0, data.len());
        assert_eq!(decoded.bytes, data);
        assert_eq!(decoded.end_offset, data.len() * MFM_BYTE_LEN);
        assert_eq!(decoded.stats.total(), 0);
        assert!(decoded.weak_offsets.is_empty());
    }

    #[test]
    fn test_clock_violations_and_weak_bytes() {
        let demod = MfmDemodulator::new();
        let mut cells = CellStream::from_bits(demod.encode(&[0x00, 0xFF], false));
        // Drop the first clock of the zero byte, and add a clock inside the 0xFF byte.
        let mut bits = cells.bits().clone();
        bits.set(0, false);
        bits.set(18, true);
        cells = CellStream::from_bits(bits);
        cells.mark_weak(20..21);

        let decoded = demod.read_bytes(&cells, 0, 2);
        assert_eq!(decoded.bytes, vec![0x00, 0xFF]);
        assert_eq!(decoded.stats.missing_clocks, 1);
        assert_eq!(decoded.stats.extra_clocks, 1);
        assert_eq!(decoded.weak_offsets, vec![1]);
    }

    #[test]
    fn test_truncated_read() {
        let demod = MfmDemodulator::new();
        let cells = CellStream::from_bits(demod.encode(&[1, 2, 3], false));
        let decoded = demod.read_bytes(&cells, 0, 10);
        assert_eq!(decoded.bytes, vec![1, 2, 3]);
        assert_eq!(decoded.end_offset, 48);
    }
}
