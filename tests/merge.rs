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

    tests/merge.rs

    Merge engine behavior over hand-built candidate sets.
*/
mod common;

use fluxsalvage::{
    bitstream_codec::{Demodulator, MarkKind, MfmDemodulator},
    merge::{merge, merge_sector, merge_sector_verified, SectorAggregator},
    prelude::*,
    track_schema::FieldVerifier,
    types::{IntegrityCheck, IntegrityField},
};
use proptest::prelude::*;
use strum::IntoEnumIterator;

const ADDRESS: SectorAddress = SectorAddress::new(10, 1, 4, 1);

fn crc(valid: bool) -> IntegrityCheck {
    IntegrityCheck::Crc(IntegrityField::new(0x1D0F, if valid { 0x1D0F } else { 0xFFFF }))
}

fn read(revolution: u32, data: &[u8], data_valid: bool) -> SectorCandidate {
    SectorCandidate::new(ADDRESS, revolution, data.to_vec(), crc(true), crc(data_valid))
}

#[test]
fn test_majority_of_three() {
    common::init_logger();
    let candidates = vec![read(0, b"XXXX", true), read(1, b"XXXX", true), read(2, b"XYXX", false)];
    let config = MergeConfig::new(MergeStrategy::Majority).with_min_agreements(2);

    let merged = merge(&candidates, &config);
    assert_eq!(merged.data, b"XXXX");
    assert_eq!(merged.status, SectorStatus::Ok);
    assert_eq!(merged.agreement, 2);
    assert!(merged.agreement <= merged.candidates);
}

#[test]
fn test_insufficient_agreement_fails_and_keeps_candidates() {
    common::init_logger();
    let candidates = vec![read(0, b"AAAA", false), read(1, b"BBBB", false), read(2, b"CCCC", false)];

    for strategy in [MergeStrategy::Majority, MergeStrategy::CrcWins] {
        let config = MergeConfig::new(strategy).with_min_agreements(2);
        let merged = merge(&candidates, &config);
        assert_eq!(merged.status, SectorStatus::Failed, "{}", strategy);
        assert!(merged.reason.starts_with("insufficient agreement"));
        assert_eq!(merged.candidates, 3);
        assert_eq!(merged.provenance.len(), 3);
    }

    let mut aggregator = SectorAggregator::new();
    aggregator.extend(candidates.clone());
    let merged = aggregator.merge_all(&MergeConfig::default());
    assert!(merged[0].is_failed());
    assert_eq!(aggregator.candidates(&ADDRESS), &candidates[..]);
}

#[test]
fn test_crc_wins_over_agreement() {
    common::init_logger();
    let candidates = vec![
        read(0, b"XXXX", false),
        read(1, b"XXXX", false),
        read(2, b"XXXX", false),
        read(3, b"YYYY", true),
    ];
    let merged = merge(&candidates, &MergeConfig::new(MergeStrategy::CrcWins).with_min_agreements(3));
    assert_eq!(merged.data, b"YYYY");
    assert_eq!(merged.status, SectorStatus::Ok);
    assert_eq!(merged.strategy, MergeStrategy::CrcWins);
    assert_eq!(merged.source_revolution, Some(3));
    assert_eq!(merged.agreement, 1);
}

#[test]
fn test_weak_bits_survive_good_crc() {
    common::init_logger();
    let candidates = vec![
        read(0, b"WWWW", true).with_weak_offsets(vec![2]),
        read(1, b"ZZZZ", false),
    ];

    let merged = merge(&candidates, &MergeConfig::new(MergeStrategy::CrcWins));
    assert_eq!(merged.status, SectorStatus::Ok);
    assert_eq!(merged.weak_offsets, vec![2]);
    assert!(merged.has_weak_bits());

    let merged = merge(&candidates, &MergeConfig::new(MergeStrategy::CrcWins).with_preserve_weak_bits(false));
    assert!(!merged.has_weak_bits());
}

#[test]
fn test_recovered_sector_without_good_crc() {
    common::init_logger();
    let candidates = vec![read(0, b"QQQQ", false), read(4, b"QQQQ", false), read(2, b"QRQQ", false)];
    let merged = merge_sector(ADDRESS, &candidates, &MergeConfig::default());
    assert_eq!(merged.status, SectorStatus::Recovered);
    assert_eq!(merged.data, b"QQQQ");
    assert_eq!(merged.agreement, 2);
    assert!(merged.confidence > 0.6 && merged.confidence < 0.7);
}

/// The CRC of an MFM data field holding `data`.
fn data_field_crc(engine: &CrcEngine, data: &[u8]) -> u64 {
    let mut digest = engine.digest();
    digest.update(MfmDemodulator::new().mark_crc_prefix(MarkKind::Data));
    digest.update(data);
    digest.finalize()
}

/// A read of an MFM data field that was written holding `written`.
fn mfm_read(engine: &CrcEngine, revolution: u32, data: &[u8], written: &[u8]) -> SectorCandidate {
    let check = IntegrityCheck::Crc(IntegrityField::new(
        data_field_crc(engine, written),
        data_field_crc(engine, data),
    ));
    SectorCandidate::new(ADDRESS, revolution, data.to_vec(), crc(true), check)
}

fn flipped(data: &[u8], offset: usize, mask: u8) -> Vec<u8> {
    let mut data = data.to_vec();
    data[offset] ^= mask;
    data
}

#[test]
fn test_bit_vote_rebuilds_sector_no_read_got_right() {
    common::init_logger();
    let engine = CrcEngine::from_preset(CrcPresetId::FLOPPY).unwrap();
    let framer_config = FramerConfig::default();
    let verifier = FieldVerifier::for_encoding(DataEncoding::Mfm, &framer_config, &engine).unwrap();

    let good = common::sector_pattern(&ADDRESS);
    let candidates = vec![
        mfm_read(&engine, 0, &flipped(&good, 10, 0x04), &good),
        mfm_read(&engine, 1, &flipped(&good, 100, 0x80), &good),
        mfm_read(&engine, 2, &flipped(&good, 200, 0x01), &good),
    ];
    assert!(candidates.iter().all(|c| !c.data_valid()));

    // No two reads agree, so whole-sector strategies have nothing to go on.
    for strategy in [MergeStrategy::Majority, MergeStrategy::CrcWins] {
        let merged = merge_sector_verified(ADDRESS, &candidates, &MergeConfig::new(strategy), &verifier);
        assert!(merged.is_failed(), "{}", strategy);
    }

    let config = MergeConfig::new(MergeStrategy::BitVote);
    let merged = merge_sector_verified(ADDRESS, &candidates, &config, &verifier);
    assert_eq!(merged.status, SectorStatus::Ok, "{}", merged);
    assert_eq!(merged.data, good);
    assert_eq!(merged.strategy, MergeStrategy::BitVote);
    assert_eq!(merged.agreement, 0);
    assert_eq!(merged.source_revolution, None);
    assert_eq!(merged.repaired_bit, None);
    assert!(merged.provenance.iter().all(|p| !p.agrees));
    assert!(merged.confidence > 0.99 && merged.confidence < 1.0);

    // Without a way to check the fused data it is only recovered.
    let merged = merge_sector(ADDRESS, &candidates, &config);
    assert_eq!(merged.status, SectorStatus::Recovered);
    assert_eq!(merged.data, good);
}

#[test]
fn test_crc_repair_fixes_single_bit() {
    common::init_logger();
    let engine = CrcEngine::from_preset(CrcPresetId::FLOPPY).unwrap();
    let framer_config = FramerConfig::default();
    let verifier = FieldVerifier::for_encoding(DataEncoding::Mfm, &framer_config, &engine).unwrap();

    let good = common::sector_pattern(&ADDRESS);
    let candidates = vec![mfm_read(&engine, 3, &flipped(&good, 37, 0x10), &good)];
    let config = MergeConfig::new(MergeStrategy::CrcWins)
        .with_min_agreements(1)
        .with_crc_repair(true);

    let merged = merge_sector_verified(ADDRESS, &candidates, &config, &verifier);
    assert_eq!(merged.status, SectorStatus::Ok, "{}", merged);
    assert_eq!(merged.data, good);
    assert_eq!(merged.repaired_bit, Some(37 * 8 + 3));
    assert_eq!(merged.agreement, 1);
    assert_eq!(merged.source_revolution, Some(3));

    let mut aggregator = SectorAggregator::new();
    aggregator.extend(candidates.clone());
    assert_eq!(aggregator.merge_all_verified(&config, &verifier), vec![merged]);

    // Repair is off by default.
    let merged = merge_sector_verified(ADDRESS, &candidates, &config.clone().with_crc_repair(false), &verifier);
    assert_eq!(merged.status, SectorStatus::Recovered);
    assert_eq!(merged.repaired_bit, None);
}

#[test]
fn test_crc_repair_leaves_double_bit_errors() {
    common::init_logger();
    let engine = CrcEngine::from_preset(CrcPresetId::FLOPPY).unwrap();
    let framer_config = FramerConfig::default();
    let verifier = FieldVerifier::for_encoding(DataEncoding::Mfm, &framer_config, &engine).unwrap();

    let good = common::sector_pattern(&ADDRESS);
    let damaged = flipped(&flipped(&good, 12, 0x01), 90, 0x40);
    let candidates = vec![mfm_read(&engine, 0, &damaged, &good)];
    let config = MergeConfig::new(MergeStrategy::HighestScore).with_crc_repair(true);

    let merged = merge_sector_verified(ADDRESS, &candidates, &config, &verifier);
    assert_eq!(merged.status, SectorStatus::Recovered);
    assert_eq!(merged.data, damaged);
    assert_eq!(merged.repaired_bit, None);
}

fn mixed_candidates() -> Vec<SectorCandidate> {
    vec![
        read(0, b"AAAA", false),
        read(1, b"AAAA", true),
        read(2, b"BBBB", true),
        read(3, b"BBBB", false).with_weak_offsets(vec![1, 3]),
        read(4, b"CCCC", false),
        read(5, b"AAAA", false),
    ]
}

proptest! {
    #[test]
    fn merge_is_order_independent(order in Just(mixed_candidates()).prop_shuffle()) {
        for strategy in MergeStrategy::iter() {
            let config = MergeConfig::new(strategy).with_preserve_timing(true);
            prop_assert_eq!(merge(&order, &config), merge(&mixed_candidates(), &config));
        }
    }
}
