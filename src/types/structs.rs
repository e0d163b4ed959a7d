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

//! Defines common structs

use crate::types::{IntegrityCheck, SectorAddress};

/// Score of a read whose header and data both passed their checks.
pub const SCORE_VALID: u32 = 100;
/// Score of a read where exactly one of the header or data checks passed.
pub const SCORE_PARTIAL: u32 = 50;
/// Score of a read where both checks failed but the ID matched the track geometry.
pub const SCORE_GEOMETRY_ONLY: u32 = 10;
/// Maximum number of points deducted for weak bytes.
pub const WEAK_PENALTY_MAX: u32 = 5;

/// One read of a sector from one revolution.
///
/// Candidates are created by the sector framer and are never modified once
/// collected; the merge engine only ever reads them. Candidates sort by source
/// revolution first, then by position on the track, which gives the merge
/// engine a canonical order independent of the order reads arrived in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorCandidate {
    revolution: u32,
    id_offset: usize,
    data_offset: usize,
    address: SectorAddress,
    data: Vec<u8>,
    header_check: IntegrityCheck,
    data_check: IntegrityCheck,
    weak_offsets: Vec<usize>,
    deleted: bool,
}

impl SectorCandidate {
    pub fn new(
        address: SectorAddress,
        revolution: u32,
        data: Vec<u8>,
        header_check: IntegrityCheck,
        data_check: IntegrityCheck,
    ) -> Self {
        Self {
            revolution,
            id_offset: 0,
            data_offset: 0,
            address,
            data,
            header_check,
            data_check,
            weak_offsets: Vec::new(),
            deleted: false,
        }
    }

    /// Set the byte offsets within the data field that contain weak bits.
    pub fn with_weak_offsets(mut self, mut offsets: Vec<usize>) -> Self {
        offsets.sort_unstable();
        offsets.dedup();
        self.weak_offsets = offsets;
        self
    }

    /// Set the bit offsets of the ID and data address marks within the revolution's bitstream.
    pub fn with_offsets(mut self, id_offset: usize, data_offset: usize) -> Self {
        self.id_offset = id_offset;
        self.data_offset = data_offset;
        self
    }

    /// Mark the sector as written with a deleted data address mark.
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn address(&self) -> SectorAddress {
        self.address
    }
    pub fn revolution(&self) -> u32 {
        self.revolution
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    pub fn header_check(&self) -> IntegrityCheck {
        self.header_check
    }
    pub fn data_check(&self) -> IntegrityCheck {
        self.data_check
    }
    pub fn header_valid(&self) -> bool {
        self.header_check.is_valid()
    }
    pub fn data_valid(&self) -> bool {
        self.data_check.is_valid()
    }
    pub fn weak_offsets(&self) -> &[usize] {
        &self.weak_offsets
    }
    pub fn deleted(&self) -> bool {
        self.deleted
    }
    pub fn id_offset(&self) -> usize {
        self.id_offset
    }
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// The trustworthiness of this read. Higher is better.
    ///
    /// The score tier comes from the check outcomes, and weak bytes deduct up to
    /// [WEAK_PENALTY_MAX] points within the tier. Candidates with the same score
    /// are ordered by source revolution by the merge engine.
    pub fn score(&self) -> u32 {
        let base = match (self.header_valid(), self.data_valid()) {
            (true, true) => SCORE_VALID,
            (true, false) | (false, true) => SCORE_PARTIAL,
            (false, false) => SCORE_GEOMETRY_ONLY,
        };
        base - std::cmp::min(self.weak_offsets.len() as u32, WEAK_PENALTY_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntegrityField;

    fn check(valid: bool) -> IntegrityCheck {
        IntegrityCheck::Crc(IntegrityField::new(0x1234, if valid { 0x1234 } else { 0x4321 }))
    }

    #[test]
    fn test_score_tiers() {
        let addr = SectorAddress::new(0, 0, 1, 2);
        let both = SectorCandidate::new(addr, 0, vec![0; 512], check(true), check(true));
        let header = SectorCandidate::new(addr, 0, vec![0; 512], check(true), check(false));
        let data = SectorCandidate::new(addr, 0, vec![0; 512], check(false), check(true));
        let neither = SectorCandidate::new(addr, 0, vec![0; 512], check(false), check(false));
        assert_eq!(both.score(), 100);
        assert_eq!(header.score(), 50);
        assert_eq!(data.score(), 50);
        assert_eq!(neither.score(), 10);
    }

    #[test]
    fn test_weak_penalty_stays_within_tier() {
        let addr = SectorAddress::new(0, 0, 1, 2);
        let weak = SectorCandidate::new(addr, 0, vec![0; 512], check(true), check(true))
            .with_weak_offsets(vec![7, 3, 3]);
        assert_eq!(weak.weak_offsets(), &[3, 7]);
        assert_eq!(weak.score(), 98);

        let very_weak = SectorCandidate::new(addr, 0, vec![0; 512], check(false), check(false))
            .with_weak_offsets((0..100).collect());
        assert_eq!(very_weak.score(), 5);
    }
}
