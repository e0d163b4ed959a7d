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

    tests/common/mod.rs

    Common support routines for tests: synthetic System 34 tracks rendered to
    flux intervals with deterministic jitter.
*/
#![allow(dead_code)]

use bit_vec::BitVec;
use fluxsalvage::{
    bitstream_codec::{demodulator_for, Demodulator, MarkKind},
    crc::{CrcEngine, CrcPresetId},
    flux::{FluxSample, Revolution},
    types::{DataEncoding, SectorAddress},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Sample clock used for synthetic captures, matching a Greaseweazle.
pub const SAMPLE_CLOCK_HZ: f64 = 24e6;
/// Bit cell time of a 250Kbps MFM track.
pub const MFM_CELL_NS: f64 = 2000.0;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A sector to be written to a synthetic track.
#[derive(Clone, Debug)]
pub struct TestSector {
    pub address: SectorAddress,
    pub data: Vec<u8>,
    pub deleted: bool,
    /// XOR mask applied to the first data byte after the CRC has been computed.
    pub corrupt: u8,
}

impl TestSector {
    pub fn new(address: SectorAddress, data: Vec<u8>) -> Self {
        TestSector {
            address,
            data,
            deleted: false,
            corrupt: 0,
        }
    }

    pub fn corrupted(mut self, mask: u8) -> Self {
        self.corrupt = mask;
        self
    }
}

/// Recognizable data for a sector.
pub fn sector_pattern(address: &SectorAddress) -> Vec<u8> {
    (0..address.n_size())
        .map(|i| (i as u8).wrapping_mul(address.s()).wrapping_add(address.c() as u8))
        .collect()
}

/// A full track of sectors `1..=count` with patterned data.
pub fn standard_sectors(c: u16, h: u8, count: u8, n: u8) -> Vec<TestSector> {
    (1..=count)
        .map(|s| {
            let address = SectorAddress::new(c, h, s, n);
            TestSector::new(address, sector_pattern(&address))
        })
        .collect()
}

struct TrackWriter<'a> {
    demod: &'a dyn Demodulator,
    bits: BitVec,
}

impl TrackWriter<'_> {
    fn bytes(&mut self, bytes: &[u8]) {
        let prev = !self.bits.is_empty() && self.bits[self.bits.len() - 1];
        let encoded = self.demod.encode(bytes, prev);
        self.bits.extend(encoded.iter());
    }

    fn fill(&mut self, byte: u8, count: usize) {
        self.bytes(&vec![byte; count]);
    }

    fn mark(&mut self, kind: MarkKind) {
        if let Some(mark) = self.demod.encode_mark(kind) {
            self.bits.extend(mark.iter());
        }
    }
}

/// Render an IBM System 34 track to bit cells.
pub fn system34_track(encoding: DataEncoding, sectors: &[TestSector]) -> BitVec {
    let demod = demodulator_for(encoding);
    let crc = CrcEngine::from_preset(CrcPresetId::FLOPPY).unwrap();
    let (gap_byte, sync_len) = match encoding {
        DataEncoding::Fm => (0xFF, 6),
        _ => (0x4E, 12),
    };

    let mut w = TrackWriter {
        demod: demod.as_ref(),
        bits: BitVec::new(),
    };

    w.fill(gap_byte, 80);
    w.fill(0x00, sync_len);
    w.mark(MarkKind::Index);
    w.fill(gap_byte, 50);

    for sector in sectors {
        let a = &sector.address;
        w.fill(0x00, sync_len);
        w.mark(MarkKind::Id);
        let mut field = vec![a.c() as u8, a.h(), a.s(), a.n()];
        let mut digest = crc.digest();
        digest.update(demod.mark_crc_prefix(MarkKind::Id));
        digest.update(&field);
        field.extend(crc.model().to_recorded(digest.finalize()));
        w.bytes(&field);
        w.fill(gap_byte, 22);

        let kind = if sector.deleted { MarkKind::DeletedData } else { MarkKind::Data };
        w.fill(0x00, sync_len);
        w.mark(kind);
        let mut digest = crc.digest();
        digest.update(demod.mark_crc_prefix(kind));
        digest.update(&sector.data);
        let mut field = sector.data.clone();
        field[0] ^= sector.corrupt;
        field.extend(crc.model().to_recorded(digest.finalize()));
        w.bytes(&field);
        w.fill(gap_byte, 54);
    }
    w.fill(gap_byte, 200);
    w.bits
}

/// Convert bit cells to flux intervals in nanoseconds. Each interval is perturbed by a
/// uniform jitter of up to `jitter_fraction` of a cell.
pub fn cells_to_intervals(cells: &BitVec, cell_ns: f64, jitter_fraction: f64, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let jitter = cell_ns * jitter_fraction;
    let mut intervals = Vec::new();
    let mut run = 0usize;
    for cell in cells.iter() {
        run += 1;
        if cell {
            let noise = if jitter > 0.0 { rng.gen_range(-jitter..jitter) } else { 0.0 };
            intervals.push(run as f64 * cell_ns + noise);
            run = 0;
        }
    }
    intervals
}

/// Render cells into an index-bounded revolution.
pub fn revolution(cells: &BitVec, jitter_fraction: f64, seed: u64) -> Revolution {
    Revolution::from_intervals_ns(
        &cells_to_intervals(cells, MFM_CELL_NS, jitter_fraction, seed),
        SAMPLE_CLOCK_HZ,
        true,
    )
}

/// Concatenate revolutions into one continuous sample stream with index pulses, as a
/// capture device would report it. A lead-in sample carries the first index pulse.
pub fn continuous_capture(revolutions: &[Revolution]) -> Vec<FluxSample> {
    let mut samples = vec![FluxSample::with_index(1000)];
    for revolution in revolutions {
        let mut rev_samples = revolution.samples().to_vec();
        if let Some(last) = rev_samples.last_mut() {
            last.index = true;
        }
        samples.extend(rev_samples);
    }
    samples
}
