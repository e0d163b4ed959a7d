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

//! Collects sector candidates from all revolutions of a track, keyed by address.

use crate::{
    merge::{merge_sector, merge_sector_verified, DataVerifier, MergeConfig, MergedSector},
    types::{SectorAddress, SectorCandidate},
};
use std::collections::BTreeMap;

/// No more than this many candidates are kept for one address.
pub const MAX_CANDIDATES_PER_SECTOR: usize = 256;

/// An append-only collection of sector candidates.
///
/// Addresses iterate in sorted order, so merging an aggregator always produces
/// sectors in the same order.
#[derive(Clone, Debug, Default)]
pub struct SectorAggregator {
    sectors: BTreeMap<SectorAddress, Vec<SectorCandidate>>,
    dropped: usize,
}

impl SectorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate. Returns false if the candidate's address is already at capacity.
    pub fn add(&mut self, candidate: SectorCandidate) -> bool {
        let entry = self.sectors.entry(candidate.address()).or_default();
        if entry.len() >= MAX_CANDIDATES_PER_SECTOR {
            log::warn!(
                "SectorAggregator::add(): Dropping candidate for {}, limit of {} reached",
                candidate.address(),
                MAX_CANDIDATES_PER_SECTOR
            );
            self.dropped += 1;
            return false;
        }
        entry.push(candidate);
        true
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = SectorCandidate>) {
        for candidate in candidates {
            self.add(candidate);
        }
    }

    /// The number of distinct sector addresses seen.
    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// The total number of candidates held.
    pub fn candidate_count(&self) -> usize {
        self.sectors.values().map(|v| v.len()).sum()
    }

    /// The number of candidates rejected because their address was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn addresses(&self) -> impl Iterator<Item = &SectorAddress> {
        self.sectors.keys()
    }

    pub fn candidates(&self, address: &SectorAddress) -> &[SectorCandidate] {
        self.sectors.get(address).map(|v| v.as_slice()).unwrap_or_default()
    }

    /// Merge every address.
    pub fn merge_all(&self, config: &MergeConfig) -> Vec<MergedSector> {
        self.sectors
            .iter()
            .map(|(address, candidates)| merge_sector(*address, candidates, config))
            .collect()
    }

    /// Merge every address, checking fused and repaired data with `verifier`.
    pub fn merge_all_verified(&self, config: &MergeConfig, verifier: &dyn DataVerifier) -> Vec<MergedSector> {
        self.sectors
            .iter()
            .map(|(address, candidates)| merge_sector_verified(*address, candidates, config, verifier))
            .collect()
    }

    pub fn into_inner(self) -> BTreeMap<SectorAddress, Vec<SectorCandidate>> {
        self.sectors
    }
}
