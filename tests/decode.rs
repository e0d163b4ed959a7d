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

    tests/decode.rs

    End-to-end decoding of synthetic flux tracks.
*/
mod common;

use common::*;
use fluxsalvage::{
    bitstream_codec::{demodulator_for, MarkKind},
    flux::{CellStream, PllParams},
    prelude::*,
    types::{DiskCh, QualityFlags},
};

fn mfm_decoder() -> TrackDecoder {
    TrackDecoder::new(DecodeConfig::new(DataEncoding::Mfm).unwrap()).unwrap()
}

#[test]
fn test_decode_clean_mfm_track() {
    init_logger();
    let sectors = standard_sectors(2, 1, 9, 2);
    let cells = system34_track(DataEncoding::Mfm, &sectors);
    let revolutions = (0..3).map(|seed| revolution(&cells, 0.04, seed)).collect();

    let report = mfm_decoder()
        .decode_track(&TrackCapture::new(DiskCh::new(2, 1), revolutions))
        .unwrap();

    assert_eq!(report.ch, DiskCh::new(2, 1));
    assert_eq!(report.sectors.len(), 9);
    for (sector, expected) in report.sectors.iter().zip(&sectors) {
        assert_eq!(sector.address, expected.address);
        assert_eq!(sector.status, SectorStatus::Ok, "{}", sector);
        assert_eq!(sector.data, expected.data);
        assert_eq!(sector.agreement, 3);
        assert_eq!(sector.candidates, 3);
        assert!(!sector.deleted);
    }

    assert_eq!(report.summary.ok, 9);
    assert_eq!(report.summary.candidates, 27);
    assert!(report.revolutions.iter().all(|r| r.is_ok()));
    assert!(report.revolutions.iter().all(|r| r.candidates == 9));
    assert!(report.quality.index_found);
    assert!(report.quality.signal_quality > 0.5);
    assert!(!report.quality.flags.intersects(QualityFlags::FAILED_SECTORS | QualityFlags::CLOCK_LOST));
}

#[test]
fn test_displaced_transition_is_reported_weak() {
    init_logger();
    let sectors = standard_sectors(1, 0, 3, 2);
    let cells = system34_track(DataEncoding::Mfm, &sectors);

    // Find the first data field in the rendered cells.
    let demod = demodulator_for(DataEncoding::Mfm);
    let stream = CellStream::from_bits(cells.clone());
    let mut cursor = 0;
    let data_offset = loop {
        let hit = demod.find_mark(&stream, cursor).unwrap();
        if hit.kind == MarkKind::Data {
            break hit.data_offset;
        }
        cursor = hit.data_offset;
    };

    // Move the first transition at or past the middle of data byte 100 a third of a
    // cell late, leaving every later transition where it was.
    let target = data_offset + 100 * 16 + 8;
    let mut intervals = cells_to_intervals(&cells, MFM_CELL_NS, 0.0, 0);
    let mut end = 0usize;
    let moved = intervals
        .iter()
        .position(|&interval| {
            end += (interval / MFM_CELL_NS).round() as usize;
            end > target
        })
        .unwrap();
    intervals[moved] += 0.3 * MFM_CELL_NS;
    intervals[moved + 1] -= 0.3 * MFM_CELL_NS;
    let revolution = Revolution::from_intervals_ns(&intervals, SAMPLE_CLOCK_HZ, true);

    let report = mfm_decoder()
        .decode_track(&TrackCapture::new(DiskCh::new(1, 0), vec![revolution]))
        .unwrap();

    let sector = report.sector(&sectors[0].address).unwrap();
    assert_eq!(sector.status, SectorStatus::Ok, "{}", sector);
    assert_eq!(sector.data, sectors[0].data);
    assert_eq!(sector.weak_offsets, vec![100]);
    assert!(sector.has_weak_bits());
    for sector in &report.sectors[1..] {
        assert!(sector.weak_offsets.is_empty(), "{}", sector);
    }
    assert!(report.quality.flags.contains(QualityFlags::WEAK_BITS));
    assert!(report.quality.weak_bit_count > 0);
}

#[test]
fn test_recovers_sector_corrupt_in_one_revolution() {
    init_logger();
    let sectors = standard_sectors(0, 0, 9, 2);
    let mut damaged = sectors.clone();
    damaged[3] = damaged[3].clone().corrupted(0x80);
    let address = sectors[3].address;

    let revolutions = vec![
        revolution(&system34_track(DataEncoding::Mfm, &damaged), 0.03, 1),
        revolution(&system34_track(DataEncoding::Mfm, &sectors), 0.03, 2),
        revolution(&system34_track(DataEncoding::Mfm, &sectors), 0.03, 3),
    ];

    let report = mfm_decoder()
        .decode_track(&TrackCapture::new(DiskCh::new(0, 0), revolutions))
        .unwrap();

    let sector = report.sector(&address).unwrap();
    assert_eq!(sector.status, SectorStatus::Ok);
    assert_eq!(sector.data, sectors[3].data);
    assert_eq!(sector.agreement, 2);
    assert_eq!(sector.candidates, 3);
    assert_eq!(sector.provenance.iter().filter(|p| !p.agrees).count(), 1);
    assert_eq!(sector.provenance.iter().filter(|p| !p.data_valid).count(), 1);

    let raw = &report.candidates[&address];
    assert_eq!(raw.len(), 3);
    assert_eq!(raw.iter().filter(|c| !c.data_valid()).count(), 1);
    assert_eq!(report.revolutions[0].framer.unwrap().data_errors, 1);
}

#[test]
fn test_unrecoverable_sector_fails_with_evidence() {
    init_logger();
    let sectors = standard_sectors(5, 0, 9, 2);
    let address = sectors[4].address;
    let revolutions = (0..3u64)
        .map(|rev| {
            let mut damaged = sectors.clone();
            damaged[4] = damaged[4].clone().corrupted(1 << rev);
            revolution(&system34_track(DataEncoding::Mfm, &damaged), 0.03, rev)
        })
        .collect();

    let report = mfm_decoder()
        .decode_track(&TrackCapture::new(DiskCh::new(5, 0), revolutions))
        .unwrap();

    let sector = report.sector(&address).unwrap();
    assert_eq!(sector.status, SectorStatus::Failed);
    assert!(sector.data.is_empty());
    assert_eq!(sector.agreement, 1);
    assert_eq!(report.candidates[&address].len(), 3);

    assert_eq!(report.summary.ok, 8);
    assert_eq!(report.summary.failed, 1);
    assert!(report.quality.flags.contains(QualityFlags::FAILED_SECTORS));
}

#[test]
fn test_deleted_data_mark() {
    init_logger();
    let mut sectors = standard_sectors(1, 0, 3, 2);
    sectors[1].deleted = true;
    let cells = system34_track(DataEncoding::Mfm, &sectors);

    let report = mfm_decoder()
        .decode_track(&TrackCapture::new(DiskCh::new(1, 0), vec![revolution(&cells, 0.02, 9)]))
        .unwrap();

    let deleted: Vec<bool> = report.sectors.iter().map(|s| s.deleted).collect();
    assert_eq!(deleted, vec![false, true, false]);
    assert!(report.sectors.iter().all(|s| s.is_ok()));
}

#[test]
fn test_decode_fm_track() {
    init_logger();
    let sectors = standard_sectors(7, 0, 5, 1);
    let cells = system34_track(DataEncoding::Fm, &sectors);
    let decoder = TrackDecoder::new(DecodeConfig::new(DataEncoding::Fm).unwrap()).unwrap();

    let report = decoder
        .decode_track(&TrackCapture::new(DiskCh::new(7, 0), vec![revolution(&cells, 0.03, 4)]))
        .unwrap();

    assert_eq!(report.sectors.len(), 5);
    for (sector, expected) in report.sectors.iter().zip(&sectors) {
        assert_eq!(sector.status, SectorStatus::Ok);
        assert_eq!(sector.data, expected.data);
        assert_eq!(sector.agreement, 1);
    }
}

#[test]
fn test_decode_tracks_in_order() {
    init_logger();
    let captures: Vec<TrackCapture> = (0..4u16)
        .map(|c| {
            let cells = system34_track(DataEncoding::Mfm, &standard_sectors(c, 0, 4, 2));
            let revolutions = (0..2).map(|seed| revolution(&cells, 0.03, seed + c as u64 * 10)).collect();
            TrackCapture::new(DiskCh::new(c, 0), revolutions)
        })
        .collect();

    let reports = mfm_decoder().decode_tracks(&captures).unwrap();
    assert_eq!(reports.len(), 4);
    for (c, report) in reports.iter().enumerate() {
        assert_eq!(report.ch, DiskCh::new(c as u16, 0));
        assert_eq!(report.sectors.len(), 4);
        assert_eq!(report.revolutions.len(), 2);
        assert_eq!(report.revolutions[1].index, 1);
        for sector in &report.sectors {
            assert_eq!(sector.address.c(), c as u16);
            assert_eq!(sector.status, SectorStatus::Ok);
            assert_eq!(sector.agreement, 2);
        }
    }
}

#[test]
fn test_continuous_capture_is_split_at_index() {
    init_logger();
    let sectors = standard_sectors(3, 1, 9, 2);
    let cells = system34_track(DataEncoding::Mfm, &sectors);
    let samples = continuous_capture(&[revolution(&cells, 0.03, 5), revolution(&cells, 0.03, 6)]);

    let capture = TrackCapture::from_samples(DiskCh::new(3, 1), &samples, SAMPLE_CLOCK_HZ, 0);
    assert_eq!(capture.revolutions.len(), 2);

    let report = mfm_decoder().decode_track(&capture).unwrap();
    assert_eq!(report.summary.ok, 9);
    assert!(report.sectors.iter().all(|s| s.agreement == 2));
    assert!(report.revolutions.iter().all(|r| r.rotation_time.is_some()));
}

#[test]
fn test_cell_time_from_histogram() {
    init_logger();
    let sectors = standard_sectors(0, 0, 4, 2);
    let cells = system34_track(DataEncoding::Mfm, &sectors);
    let config = DecodeConfig::new(DataEncoding::Mfm)
        .unwrap()
        .with_pll(PllParams::default().with_bit_cell_time_ns(2400.0))
        .with_auto_cell_time(true);

    let report = TrackDecoder::new(config)
        .unwrap()
        .decode_track(&TrackCapture::new(DiskCh::new(0, 0), vec![revolution(&cells, 0.02, 11)]))
        .unwrap();

    let cell_ns = report.revolutions[0].cell_time_ns.unwrap();
    assert!((cell_ns - MFM_CELL_NS).abs() < MFM_CELL_NS * 0.1, "estimated {}", cell_ns);
    assert_eq!(report.summary.ok, 4);
}

#[test]
fn test_cancelled_run() {
    init_logger();
    let cells = system34_track(DataEncoding::Mfm, &standard_sectors(0, 0, 2, 2));
    let token = CancelToken::new();
    let decoder = mfm_decoder().with_cancel_token(token.clone());

    token.cancel();
    let result = decoder.decode_tracks(&[TrackCapture::new(DiskCh::new(0, 0), vec![revolution(&cells, 0.0, 0)])]);
    assert_eq!(result, Err(DecodeError::Cancelled));
}

#[test]
fn test_recomputed_quality_is_identical() {
    init_logger();
    let cells = system34_track(DataEncoding::Mfm, &standard_sectors(0, 1, 9, 2));
    let revolutions = (0..2).map(|seed| revolution(&cells, 0.05, seed)).collect();
    let report = mfm_decoder()
        .decode_track(&TrackCapture::new(DiskCh::new(0, 1), revolutions))
        .unwrap();

    let first = report.recompute();
    let second = report.recompute();
    assert_eq!(first, second);
    assert_eq!(first.0, report.quality);
    assert_eq!(first.1, report.summary);
}
