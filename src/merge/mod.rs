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

//! Merging multiple reads of a sector into one result.
//!
//! Each revolution of a track may yield a [SectorCandidate] for a sector. The
//! merge engine reconciles the candidates for one [SectorAddress] into a
//! single [MergedSector] according to a [MergeStrategy]. Merging is a pure
//! function of the candidate set: candidates are put in canonical order first,
//! so the same set always produces the same result regardless of the order in
//! which revolutions completed.

pub mod aggregator;

pub use aggregator::{SectorAggregator, MAX_CANDIDATES_PER_SECTOR};

use crate::{
    types::{IntegrityCheck, SectorAddress, SectorCandidate, SectorStatus},
    DecodeError,
};
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
};
use strum::{Display as StrumDisplay, EnumIter, EnumString};

/// Reason given when no candidates were available for a sector.
pub const REASON_NO_CANDIDATES: &str = "no candidates";
/// Prefix of the reason given when no group of identical reads was large enough.
pub const REASON_INSUFFICIENT_AGREEMENT: &str = "insufficient agreement";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, StrumDisplay, EnumIter, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MergeStrategy {
    /// The largest group of byte-identical reads wins, if it has at least `min_agreements` members.
    Majority,
    /// The best read that passed its data check wins. Falls back to [MergeStrategy::Majority].
    #[default]
    CrcWins,
    /// The read with the highest score wins.
    HighestScore,
    /// The read from the most recent revolution wins.
    Latest,
    /// Each bit is decided by a vote of the reads sharing the most common data length,
    /// weighted by read score. A read does not vote on bytes it marked weak.
    BitVote,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MergeConfig {
    pub strategy: MergeStrategy,
    pub min_agreements: u32,
    /// Report the weak byte offsets of the winning read, even for sectors that are OK.
    pub preserve_weak_bits: bool,
    /// Report the mark offsets of every read agreeing with the result.
    pub preserve_timing: bool,
    /// Only the reads from the newest `max_revolutions` revolutions are merged. 0 is unlimited.
    pub max_revolutions: u32,
    /// Try flipping each bit of a result that fails its data check, keeping the first
    /// flip that passes. Requires a [DataVerifier].
    pub crc_repair: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            strategy: MergeStrategy::CrcWins,
            min_agreements: 2,
            preserve_weak_bits: true,
            preserve_timing: false,
            max_revolutions: 0,
            crc_repair: false,
        }
    }
}

impl MergeConfig {
    pub fn new(strategy: MergeStrategy) -> Self {
        MergeConfig {
            strategy,
            ..MergeConfig::default()
        }
    }

    pub fn with_min_agreements(mut self, min: u32) -> Self {
        self.min_agreements = min;
        self
    }

    pub fn with_max_revolutions(mut self, max: u32) -> Self {
        self.max_revolutions = max;
        self
    }

    pub fn with_preserve_weak_bits(mut self, state: bool) -> Self {
        self.preserve_weak_bits = state;
        self
    }

    pub fn with_preserve_timing(mut self, state: bool) -> Self {
        self.preserve_timing = state;
        self
    }

    pub fn with_crc_repair(mut self, state: bool) -> Self {
        self.crc_repair = state;
        self
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.min_agreements == 0 {
            return Err(DecodeError::Parameter(
                "MergeConfig: min_agreements must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How one read contributed to a merged sector.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorProvenance {
    pub revolution: u32,
    pub score: u32,
    pub header_valid: bool,
    pub data_valid: bool,
    /// The read's data is identical to the merged data.
    pub agrees: bool,
}

/// Where the marks of an agreeing read were found, in cells from the start of its revolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorTiming {
    pub revolution: u32,
    pub id_offset: usize,
    pub data_offset: usize,
}

/// The result of merging every read of one sector.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MergedSector {
    pub address: SectorAddress,
    /// The selected data. Empty if the sector failed.
    pub data: Vec<u8>,
    pub status: SectorStatus,
    /// The number of reads identical to the selected data, before any bit repair.
    pub agreement: u32,
    /// The number of reads considered.
    pub candidates: u32,
    /// The strategy that produced the result. Differs from the configured strategy after a fallback.
    pub strategy: MergeStrategy,
    pub reason: String,
    pub weak_offsets: Vec<usize>,
    pub deleted: bool,
    /// The best read identical to the selected data. None if no read matches it.
    pub source_revolution: Option<u32>,
    /// `agreement / candidates`, or for [MergeStrategy::BitVote] the mean share of vote
    /// weight behind each winning bit.
    pub confidence: f32,
    /// SHA-1 of the selected data, as hex.
    pub fingerprint: Option<String>,
    pub provenance: Vec<SectorProvenance>,
    pub timing: Vec<SectorTiming>,
    /// Reads discarded by the `max_revolutions` limit.
    pub discarded: u32,
    /// The bit flipped to make the data pass its check, counted from the most significant
    /// bit of the first byte.
    pub repaired_bit: Option<usize>,
}

impl Display for MergedSector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}/{} agree, {}): {}",
            self.address, self.status, self.agreement, self.candidates, self.strategy, self.reason
        )
    }
}

impl MergedSector {
    pub fn is_ok(&self) -> bool {
        self.status == SectorStatus::Ok
    }

    pub fn is_failed(&self) -> bool {
        self.status == SectorStatus::Failed
    }

    pub fn has_weak_bits(&self) -> bool {
        !self.weak_offsets.is_empty()
    }
}

/// Checks replacement data for a sector against the integrity value recorded with a read.
pub trait DataVerifier {
    /// `data` is the same length as `candidate`'s data.
    fn recheck(&self, candidate: &SectorCandidate, data: &[u8]) -> IntegrityCheck;
}

/// The outcome of applying a strategy to a candidate set.
enum Selection<'a> {
    Winner {
        winner: &'a SectorCandidate,
        strategy: MergeStrategy,
        reason: String,
    },
    Fused(Fusion<'a>),
    Failed {
        agreement: u32,
        strategy: MergeStrategy,
        reason: String,
    },
}

/// Data assembled bit by bit from several reads.
struct Fusion<'a> {
    data: Vec<u8>,
    /// Bytes every voter marked weak.
    weak_offsets: Vec<usize>,
    /// The highest scoring voter.
    lead: &'a SectorCandidate,
    reason: String,
    support: f32,
}

/// What a selection resolves to before it is checked and reported.
struct Resolved {
    data: Vec<u8>,
    data_valid: bool,
    weak_offsets: Vec<usize>,
    deleted: bool,
    /// The winning read. None for fused data, whose source is the best agreeing read.
    source_revolution: Option<u32>,
    support: Option<f32>,
    strategy: MergeStrategy,
    reason: String,
}

/// The highest scoring read, earliest revolution first on ties. `candidates` must be in canonical order.
fn best_scored<'a>(candidates: impl Iterator<Item = &'a SectorCandidate>) -> Option<&'a SectorCandidate> {
    candidates.min_by_key(|c| (Reverse(c.score()), c.revolution()))
}

/// Groups rank by size, then summed score, then earliest revolution.
fn group_rank(group: &[&SectorCandidate]) -> (usize, u64, Reverse<u32>) {
    let score: u64 = group.iter().map(|c| c.score() as u64).sum();
    let earliest = group.iter().map(|c| c.revolution()).min().unwrap_or(u32::MAX);
    (group.len(), score, Reverse(earliest))
}

fn select_majority<'a>(candidates: &[&'a SectorCandidate], min_agreements: u32) -> Selection<'a> {
    let mut groups: BTreeMap<&[u8], Vec<&'a SectorCandidate>> = BTreeMap::new();
    for &c in candidates {
        groups.entry(c.data()).or_default().push(c);
    }

    // Iteration is in data order, so a complete tie goes to the lowest data.
    let mut best: Option<&Vec<&'a SectorCandidate>> = None;
    for group in groups.values() {
        best = match best {
            Some(b) if group_rank(b) >= group_rank(group) => best,
            _ => Some(group),
        };
    }

    let Some(group) = best
    else {
        return Selection::Failed {
            agreement: 0,
            strategy: MergeStrategy::Majority,
            reason: REASON_NO_CANDIDATES.to_string(),
        };
    };

    let agreement = group.len() as u32;
    if agreement < min_agreements {
        return Selection::Failed {
            agreement,
            strategy: MergeStrategy::Majority,
            reason: format!(
                "{}: largest group has {} of {} required reads",
                REASON_INSUFFICIENT_AGREEMENT, agreement, min_agreements
            ),
        };
    }

    match best_scored(group.iter().copied()) {
        Some(winner) => Selection::Winner {
            winner,
            strategy: MergeStrategy::Majority,
            reason: format!("{} of {} reads agree", agreement, candidates.len()),
        },
        None => Selection::Failed {
            agreement: 0,
            strategy: MergeStrategy::Majority,
            reason: REASON_NO_CANDIDATES.to_string(),
        },
    }
}

fn is_weak_at(candidate: &SectorCandidate, offset: usize) -> bool {
    candidate.weak_offsets().binary_search(&offset).is_ok()
}

/// Vote on every bit of the reads sharing the most common data length, the longer length
/// winning a tie. A bit vote split evenly by weight goes to the best scored voter.
fn fuse_bits<'a>(candidates: &[&'a SectorCandidate], min_agreements: u32) -> Selection<'a> {
    let mut lengths: BTreeMap<usize, Vec<&'a SectorCandidate>> = BTreeMap::new();
    for &c in candidates {
        lengths.entry(c.data().len()).or_default().push(c);
    }
    let Some((&len, voters)) = lengths.iter().max_by_key(|(len, group)| (group.len(), **len))
    else {
        return Selection::Failed {
            agreement: 0,
            strategy: MergeStrategy::BitVote,
            reason: REASON_NO_CANDIDATES.to_string(),
        };
    };

    let agreement = voters.len() as u32;
    if agreement < min_agreements {
        return Selection::Failed {
            agreement,
            strategy: MergeStrategy::BitVote,
            reason: format!(
                "{}: {} reads of {} bytes, {} required",
                REASON_INSUFFICIENT_AGREEMENT, agreement, len, min_agreements
            ),
        };
    }
    let Some(lead) = best_scored(voters.iter().copied())
    else {
        return Selection::Failed {
            agreement: 0,
            strategy: MergeStrategy::BitVote,
            reason: REASON_NO_CANDIDATES.to_string(),
        };
    };

    let mut data = vec![0u8; len];
    let mut weak_offsets = Vec::new();
    let mut contested = 0usize;
    let mut support_sum = 0.0f64;

    for (offset, byte) in data.iter_mut().enumerate() {
        let mut ballot: Vec<&SectorCandidate> = voters.iter().copied().filter(|c| !is_weak_at(c, offset)).collect();
        if ballot.is_empty() {
            weak_offsets.push(offset);
            ballot = voters.clone();
        }
        let tie_breaker = best_scored(ballot.iter().copied()).unwrap_or(lead).data()[offset];

        for bit in (0..8).rev() {
            let mask = 1u8 << bit;
            let (mut ones, mut zeros) = (0u64, 0u64);
            for c in &ballot {
                let weight = c.score().max(1) as u64;
                if c.data()[offset] & mask != 0 {
                    ones += weight;
                }
                else {
                    zeros += weight;
                }
            }
            if ones > 0 && zeros > 0 {
                contested += 1;
            }
            let set = match ones.cmp(&zeros) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => tie_breaker & mask != 0,
            };
            if set {
                *byte |= mask;
            }
            support_sum += ones.max(zeros) as f64 / (ones + zeros) as f64;
        }
    }

    let support = if len == 0 {
        1.0
    }
    else {
        (support_sum / (len * 8) as f64) as f32
    };
    log::trace!(
        "fuse_bits(): {} voters over {} bytes, {} contested bits, {} unresolved weak bytes",
        voters.len(),
        len,
        contested,
        weak_offsets.len()
    );

    Selection::Fused(Fusion {
        data,
        weak_offsets,
        lead,
        reason: format!(
            "{} of {} reads voted, {} contested bits",
            voters.len(),
            candidates.len(),
            contested
        ),
        support,
    })
}

/// Find the first single bit flip that makes `data` pass the check recorded with any of
/// `references`. `data` is restored if no flip passes.
fn repair_single_bit(data: &mut [u8], references: &[&SectorCandidate], verifier: &dyn DataVerifier) -> Option<usize> {
    for bit in 0..data.len() * 8 {
        let mask = 0x80u8 >> (bit % 8);
        data[bit / 8] ^= mask;
        if references.iter().any(|c| verifier.recheck(c, data).is_valid()) {
            return Some(bit);
        }
        data[bit / 8] ^= mask;
    }
    None
}

fn select<'a>(candidates: &[&'a SectorCandidate], config: &MergeConfig) -> Selection<'a> {
    match config.strategy {
        MergeStrategy::Majority => select_majority(candidates, config.min_agreements),
        MergeStrategy::CrcWins => match best_scored(candidates.iter().copied().filter(|c| c.data_valid())) {
            Some(winner) => Selection::Winner {
                winner,
                strategy: MergeStrategy::CrcWins,
                reason: format!("data check passed in revolution {}", winner.revolution()),
            },
            None => match select_majority(candidates, config.min_agreements) {
                Selection::Winner { winner, reason, .. } => Selection::Winner {
                    winner,
                    strategy: MergeStrategy::Majority,
                    reason: format!("no read passed its data check, fell back to majority: {}", reason),
                },
                Selection::Failed { agreement, reason, .. } => Selection::Failed {
                    agreement,
                    strategy: MergeStrategy::Majority,
                    reason,
                },
                f @ Selection::Fused(_) => f,
            },
        },
        MergeStrategy::HighestScore => match best_scored(candidates.iter().copied()) {
            Some(winner) => Selection::Winner {
                winner,
                strategy: MergeStrategy::HighestScore,
                reason: format!("highest score {} in revolution {}", winner.score(), winner.revolution()),
            },
            None => Selection::Failed {
                agreement: 0,
                strategy: MergeStrategy::HighestScore,
                reason: REASON_NO_CANDIDATES.to_string(),
            },
        },
        MergeStrategy::Latest => match candidates
            .iter()
            .copied()
            .min_by_key(|c| (Reverse(c.revolution()), Reverse(c.score())))
        {
            Some(winner) => Selection::Winner {
                winner,
                strategy: MergeStrategy::Latest,
                reason: format!("latest read, revolution {}", winner.revolution()),
            },
            None => Selection::Failed {
                agreement: 0,
                strategy: MergeStrategy::Latest,
                reason: REASON_NO_CANDIDATES.to_string(),
            },
        },
        MergeStrategy::BitVote => fuse_bits(candidates, config.min_agreements),
    }
}

/// Merge the reads of the sector at `address`.
///
/// Candidates for other addresses are ignored. The result depends only on the set of
/// candidates, never on their order. Without a [DataVerifier], fused data is only known
/// to be valid when it matches a read that passed its data check, and no bit repair is
/// attempted.
pub fn merge_sector(address: SectorAddress, candidates: &[SectorCandidate], config: &MergeConfig) -> MergedSector {
    merge_sector_with(address, candidates, config, None)
}

/// Merge the reads of the sector at `address`, checking fused and repaired data with `verifier`.
pub fn merge_sector_verified(
    address: SectorAddress,
    candidates: &[SectorCandidate],
    config: &MergeConfig,
    verifier: &dyn DataVerifier,
) -> MergedSector {
    merge_sector_with(address, candidates, config, Some(verifier))
}

fn merge_sector_with(
    address: SectorAddress,
    candidates: &[SectorCandidate],
    config: &MergeConfig,
    verifier: Option<&dyn DataVerifier>,
) -> MergedSector {
    let mut sorted: Vec<&SectorCandidate> = candidates.iter().filter(|c| c.address() == address).collect();
    if sorted.len() != candidates.len() {
        log::warn!(
            "merge_sector(): Ignoring {} candidates not addressed to {}",
            candidates.len() - sorted.len(),
            address
        );
    }
    sorted.sort();

    let mut discarded = 0;
    if config.max_revolutions > 0 {
        let revolutions: BTreeSet<u32> = sorted.iter().map(|c| c.revolution()).collect();
        let excess = revolutions.len().saturating_sub(config.max_revolutions as usize);
        if let Some(&oldest_kept) = revolutions.iter().nth(excess) {
            let before = sorted.len();
            sorted.retain(|c| c.revolution() >= oldest_kept);
            discarded = (before - sorted.len()) as u32;
        }
    }

    let total = sorted.len() as u32;
    let provenance_for = |data: Option<&[u8]>| -> Vec<SectorProvenance> {
        sorted
            .iter()
            .map(|c| SectorProvenance {
                revolution: c.revolution(),
                score: c.score(),
                header_valid: c.header_valid(),
                data_valid: c.data_valid(),
                agrees: data == Some(c.data()),
            })
            .collect()
    };

    if sorted.is_empty() {
        return MergedSector {
            address,
            data: Vec::new(),
            status: SectorStatus::Failed,
            agreement: 0,
            candidates: 0,
            strategy: config.strategy,
            reason: REASON_NO_CANDIDATES.to_string(),
            weak_offsets: Vec::new(),
            deleted: false,
            source_revolution: None,
            confidence: 0.0,
            fingerprint: None,
            provenance: Vec::new(),
            timing: Vec::new(),
            discarded,
            repaired_bit: None,
        };
    }

    let resolved = match select(&sorted, config) {
        Selection::Winner {
            winner,
            strategy,
            reason,
        } => Resolved {
            data: winner.data().to_vec(),
            data_valid: winner.data_valid(),
            weak_offsets: winner.weak_offsets().to_vec(),
            deleted: winner.deleted(),
            source_revolution: Some(winner.revolution()),
            support: None,
            strategy,
            reason,
        },
        Selection::Fused(fusion) => {
            let data_valid = sorted.iter().any(|c| c.data_valid() && c.data() == fusion.data.as_slice())
                || verifier.is_some_and(|v| {
                    sorted
                        .iter()
                        .filter(|c| c.data().len() == fusion.data.len())
                        .any(|c| v.recheck(c, &fusion.data).is_valid())
                });
            Resolved {
                data: fusion.data,
                data_valid,
                weak_offsets: fusion.weak_offsets,
                deleted: fusion.lead.deleted(),
                source_revolution: None,
                support: Some(fusion.support),
                strategy: MergeStrategy::BitVote,
                reason: fusion.reason,
            }
        }
        Selection::Failed {
            agreement,
            strategy,
            reason,
        } => {
            log::warn!("merge_sector(): {} failed: {}", address, reason);
            return MergedSector {
                address,
                data: Vec::new(),
                status: SectorStatus::Failed,
                agreement,
                candidates: total,
                strategy,
                reason,
                weak_offsets: Vec::new(),
                deleted: false,
                source_revolution: None,
                confidence: 0.0,
                fingerprint: None,
                provenance: provenance_for(None),
                timing: Vec::new(),
                discarded,
                repaired_bit: None,
            };
        }
    };

    let Resolved {
        mut data,
        data_valid,
        weak_offsets,
        deleted,
        source_revolution,
        support,
        strategy,
        mut reason,
    } = resolved;

    let agreeing: Vec<&SectorCandidate> = sorted.iter().copied().filter(|c| c.data() == data.as_slice()).collect();
    let agreement = agreeing.len() as u32;
    let source_revolution = source_revolution.or_else(|| best_scored(agreeing.iter().copied()).map(|c| c.revolution()));
    let provenance = provenance_for(Some(data.as_slice()));
    let timing = if config.preserve_timing {
        agreeing
            .iter()
            .map(|c| SectorTiming {
                revolution: c.revolution(),
                id_offset: c.id_offset(),
                data_offset: c.data_offset(),
            })
            .collect()
    }
    else {
        Vec::new()
    };

    let mut repaired_bit = None;
    if !data_valid && config.crc_repair {
        if let Some(verifier) = verifier {
            // One reference per distinct recorded value.
            let mut seen = BTreeSet::new();
            let references: Vec<&SectorCandidate> = sorted
                .iter()
                .copied()
                .filter(|c| c.data().len() == data.len() && seen.insert(c.data_check().recorded()))
                .collect();
            repaired_bit = repair_single_bit(&mut data, &references, verifier);
            match repaired_bit {
                Some(bit) => {
                    log::debug!("merge_sector(): {} repaired by flipping bit {}", address, bit);
                    reason = format!("{}, repaired bit {}", reason, bit);
                }
                None => log::debug!("merge_sector(): {} has no single bit repair", address),
            }
        }
        else {
            log::warn!("merge_sector(): {} bit repair requested without a data verifier", address);
        }
    }

    let status = if data_valid || repaired_bit.is_some() {
        SectorStatus::Ok
    }
    else {
        SectorStatus::Recovered
    };

    let mut hasher = sha1_smol::Sha1::new();
    hasher.update(&data);

    log::debug!(
        "merge_sector(): {} {} from {} of {} reads by {}",
        address,
        status,
        agreement,
        total,
        strategy
    );

    MergedSector {
        address,
        data,
        status,
        agreement,
        candidates: total,
        strategy,
        reason,
        weak_offsets: if config.preserve_weak_bits {
            weak_offsets
        }
        else {
            Vec::new()
        },
        deleted,
        source_revolution,
        confidence: support.unwrap_or(agreement as f32 / total as f32),
        fingerprint: Some(hasher.digest().to_string()),
        provenance,
        timing,
        discarded,
        repaired_bit,
    }
}

/// Merge a set of reads of one sector. The address is taken from the candidates; with no
/// candidates the result is a failed sector at the default address.
pub fn merge(candidates: &[SectorCandidate], config: &MergeConfig) -> MergedSector {
    let address = candidates.iter().min().map(|c| c.address()).unwrap_or_default();
    merge_sector(address, candidates, config)
}
