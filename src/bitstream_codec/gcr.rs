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

//! GCR demodulation.
//!
//! Group Coded Recording tracks carry no separate clock cells. Instead data is
//! mapped to code groups that never contain long runs of zeros, so every group
//! is self-clocking. Two schemes are supported:
//!
//! * Commodore 5-to-4: each nibble is written as a 5 cell code, so one byte
//!   takes 10 cells. Blocks begin with a sync of at least 10 one cells followed
//!   by a block ID byte.
//! * Apple 6-and-2: the track is written as 8 cell disk nibbles with the high
//!   bit always set. Fields begin with a three nibble prologue. Only the nibble
//!   level is decoded here.

use crate::{
    bitstream_codec::{weak_byte, DecodedBytes, Demodulator, MarkKind, MarkerEncoding},
    flux::CellStream,
    types::{DataEncoding, GcrScheme},
};
use bit_vec::BitVec;

pub const C64_GCR_BYTE_LEN: usize = 10;
pub const APPLE_NIBBLE_LEN: usize = 8;

/// Commodore 1541 nibble to 5 cell code group.
pub const C64_GCR_ENCODE: [u8; 16] = [
    0x0A, 0x0B, 0x12, 0x13, 0x0E, 0x0F, 0x16, 0x17, 0x09, 0x19, 0x1A, 0x1B, 0x0D, 0x1D, 0x1E, 0x15,
];

/// Code group to nibble. 0xFF marks an invalid group.
pub const C64_GCR_DECODE: [u8; 32] = {
    let mut table = [0xFF; 32];
    let mut i = 0;
    while i < 16 {
        table[C64_GCR_ENCODE[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Commodore block ID of a sector header.
pub const C64_HEADER_BLOCK_ID: u8 = 0x08;
/// Commodore block ID of a data block.
pub const C64_DATA_BLOCK_ID: u8 = 0x07;
/// Length of a Commodore sync run, in cells.
pub const C64_SYNC_LEN: usize = 10;

/// Apple 6-and-2 value to disk nibble.
pub const APPLE_62_ENCODE: [u8; 64] = [
    0x96, 0x97, 0x9A, 0x9B, 0x9D, 0x9E, 0x9F, 0xA6, 0xA7, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6,
    0xB7, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, 0xCB, 0xCD, 0xCE, 0xCF, 0xD3, 0xD6, 0xD7, 0xD9, 0xDA, 0xDB, 0xDC,
    0xDD, 0xDE, 0xDF, 0xE5, 0xE6, 0xE7, 0xE9, 0xEA, 0xEB, 0xEC, 0xED, 0xEE, 0xEF, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7,
    0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF,
];

/// Disk nibble to 6-and-2 value. 0xFF marks a nibble outside the table.
pub const APPLE_62_DECODE: [u8; 256] = {
    let mut table = [0xFF; 256];
    let mut i = 0;
    while i < 64 {
        table[APPLE_62_ENCODE[i] as usize] = i as u8;
        i += 1;
    }
    table
};

pub const APPLE_ADDRESS_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0x96];
pub const APPLE_DATA_PROLOGUE: [u8; 3] = [0xD5, 0xAA, 0xAD];

/// Encode a byte as two Commodore code groups, high nibble first.
pub const fn encode_c64_byte(byte: u8) -> u16 {
    ((C64_GCR_ENCODE[(byte >> 4) as usize] as u16) << 5) | C64_GCR_ENCODE[(byte & 0x0F) as usize] as u16
}

/// Decode a 6-and-2 disk nibble to its 6 bit value.
pub fn decode_apple_62(nibble: u8) -> Option<u8> {
    match APPLE_62_DECODE[nibble as usize] {
        0xFF => None,
        value => Some(value),
    }
}

/// Decode a 4-and-4 encoded pair of nibbles, as used in Apple address fields.
pub fn decode_apple_44(odd: u8, even: u8) -> u8 {
    ((odd << 1) | 1) & even
}

/// Encode a byte as a 4-and-4 pair of nibbles.
pub fn encode_apple_44(byte: u8) -> [u8; 2] {
    [(byte >> 1) | 0xAA, byte | 0xAA]
}

const fn c64_marker(kind: MarkKind, block_id: u8) -> MarkerEncoding {
    let sync = (1u64 << C64_SYNC_LEN) - 1;
    MarkerEncoding {
        kind,
        bits: (sync << C64_GCR_BYTE_LEN) | encode_c64_byte(block_id) as u64,
        mask: (1u64 << (C64_SYNC_LEN + C64_GCR_BYTE_LEN)) - 1,
        len: C64_SYNC_LEN + C64_GCR_BYTE_LEN,
    }
}

const fn apple_marker(kind: MarkKind, prologue: [u8; 3]) -> MarkerEncoding {
    MarkerEncoding {
        kind,
        bits: ((prologue[0] as u64) << 16) | ((prologue[1] as u64) << 8) | prologue[2] as u64,
        mask: 0xFF_FFFF,
        len: 3 * APPLE_NIBBLE_LEN,
    }
}

pub const C64_HEADER_MARKER: MarkerEncoding = c64_marker(MarkKind::Id, C64_HEADER_BLOCK_ID);
pub const C64_DATA_MARKER: MarkerEncoding = c64_marker(MarkKind::Data, C64_DATA_BLOCK_ID);
static C64_MARKERS: [MarkerEncoding; 2] = [C64_HEADER_MARKER, C64_DATA_MARKER];

pub const APPLE_ADDRESS_MARKER: MarkerEncoding = apple_marker(MarkKind::Id, APPLE_ADDRESS_PROLOGUE);
pub const APPLE_DATA_MARKER: MarkerEncoding = apple_marker(MarkKind::Data, APPLE_DATA_PROLOGUE);
static APPLE_MARKERS: [MarkerEncoding; 2] = [APPLE_ADDRESS_MARKER, APPLE_DATA_MARKER];

/// Tracks runs of empty cells longer than an encoding allows.
struct ZeroRunCounter {
    max: usize,
    run: usize,
    violations: u32,
}

impl ZeroRunCounter {
    fn new(max: usize) -> Self {
        ZeroRunCounter {
            max,
            run: 0,
            violations: 0,
        }
    }

    fn push(&mut self, bit: bool) {
        if bit {
            self.run = 0;
        }
        else {
            self.run += 1;
            // Count each overlong run once.
            if self.run == self.max + 1 {
                self.violations += 1;
            }
        }
    }
}

fn push_bits(bitvec: &mut BitVec, value: u64, len: usize) {
    for i in (0..len).rev() {
        bitvec.push((value >> i) & 1 != 0);
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct CommodoreGcrDemodulator;

impl CommodoreGcrDemodulator {
    pub fn new() -> Self {
        CommodoreGcrDemodulator
    }

    /// Encode a sync run followed by a block ID.
    pub fn encode_sync(&self, block_id: u8) -> BitVec {
        let mut bitvec = BitVec::from_elem(C64_SYNC_LEN, true);
        push_bits(&mut bitvec, encode_c64_byte(block_id) as u64, C64_GCR_BYTE_LEN);
        bitvec
    }
}

impl Demodulator for CommodoreGcrDemodulator {
    fn encoding(&self) -> DataEncoding {
        DataEncoding::Gcr(GcrScheme::Commodore)
    }

    fn markers(&self) -> &[MarkerEncoding] {
        &C64_MARKERS
    }

    fn read_bytes(&self, cells: &CellStream, offset: usize, count: usize) -> DecodedBytes {
        let mut decoded = DecodedBytes {
            bytes: Vec::with_capacity(count),
            end_offset: offset,
            ..DecodedBytes::default()
        };
        let mut zeros = ZeroRunCounter::new(self.encoding().max_zero_run());

        let mut cursor = offset;
        for byte_idx in 0..count {
            if cursor + C64_GCR_BYTE_LEN > cells.len() {
                log::trace!(
                    "CommodoreGcrDemodulator::read_bytes(): Stream ended after {} of {} bytes",
                    byte_idx,
                    count
                );
                break;
            }

            let mut byte = 0u8;
            for group in 0..2 {
                let mut code = 0usize;
                for i in 0..5 {
                    let bit = cells.bit(cursor + group * 5 + i);
                    zeros.push(bit);
                    code = (code << 1) | bit as usize;
                }
                let nibble = match C64_GCR_DECODE[code] {
                    0xFF => {
                        decoded.stats.invalid_groups += 1;
                        0
                    }
                    nibble => nibble,
                };
                byte = (byte << 4) | nibble;
            }

            if weak_byte(cells, cursor, C64_GCR_BYTE_LEN) {
                decoded.weak_offsets.push(byte_idx);
            }
            decoded.bytes.push(byte);
            cursor += C64_GCR_BYTE_LEN;
        }

        decoded.stats.missing_clocks = zeros.violations;
        decoded.end_offset = cursor;
        decoded
    }

    fn mark_crc_prefix(&self, _kind: MarkKind) -> &[u8] {
        // The block checksum does not cover the block ID.
        &[]
    }

    fn encode(&self, data: &[u8], _prev_bit: bool) -> BitVec {
        let mut bitvec = BitVec::with_capacity(data.len() * C64_GCR_BYTE_LEN);
        for &byte in data {
            push_bits(&mut bitvec, encode_c64_byte(byte) as u64, C64_GCR_BYTE_LEN);
        }
        bitvec
    }
}

/// Reads Apple disk nibbles. Bytes returned by [Demodulator::read_bytes] are raw
/// nibbles, to be decoded with [decode_apple_62] or [decode_apple_44].
#[derive(Copy, Clone, Debug, Default)]
pub struct AppleGcrDemodulator;

impl AppleGcrDemodulator {
    pub fn new() -> Self {
        AppleGcrDemodulator
    }
}

impl Demodulator for AppleGcrDemodulator {
    fn encoding(&self) -> DataEncoding {
        DataEncoding::Gcr(GcrScheme::Apple62)
    }

    fn markers(&self) -> &[MarkerEncoding] {
        &APPLE_MARKERS
    }

    fn read_bytes(&self, cells: &CellStream, offset: usize, count: usize) -> DecodedBytes {
        let mut decoded = DecodedBytes {
            bytes: Vec::with_capacity(count),
            end_offset: offset,
            ..DecodedBytes::default()
        };
        let mut zeros = ZeroRunCounter::new(self.encoding().max_zero_run());

        let mut cursor = offset;
        for byte_idx in 0..count {
            if cursor + APPLE_NIBBLE_LEN > cells.len() {
                log::trace!(
                    "AppleGcrDemodulator::read_bytes(): Stream ended after {} of {} nibbles",
                    byte_idx,
                    count
                );
                break;
            }

            let mut nibble = 0u8;
            for i in 0..APPLE_NIBBLE_LEN {
                let bit = cells.bit(cursor + i);
                zeros.push(bit);
                nibble = (nibble << 1) | bit as u8;
            }
            // A disk nibble always has its high bit set.
            if nibble & 0x80 == 0 {
                decoded.stats.invalid_groups += 1;
            }

            if weak_byte(cells, cursor, APPLE_NIBBLE_LEN) {
                decoded.weak_offsets.push(byte_idx);
            }
            decoded.bytes.push(nibble);
            cursor += APPLE_NIBBLE_LEN;
        }

        decoded.stats.missing_clocks = zeros.violations;
        decoded.end_offset = cursor;
        decoded
    }

    fn mark_crc_prefix(&self, _kind: MarkKind) -> &[u8] {
        &[]
    }

    fn encode(&self, data: &[u8], _prev_bit: bool) -> BitVec {
        BitVec::from_bytes(data)
    }
}
