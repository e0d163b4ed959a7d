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

//! Per-revolution and per-track decode diagnostics.
//!
//! Everything here is derived from values already produced by the decode
//! stages and may be recomputed at any time with identical results.

use crate::{
    flux::{PllStats, Revolution},
    format_ms,
    merge::MergedSector,
    track_schema::FramerStats,
    types::{DiskRpm, QualityFlags, SectorCandidate, SectorStatus},
    DecodeError,
};
use std::fmt::{self, Display, Formatter};

/// RPM standard deviation, as a fraction of mean RPM, above which rotation is considered unstable.
pub const RPM_UNSTABLE_FRACTION: f64 = 0.01;

/// What happened while decoding one revolution.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RevolutionDiagnostics {
    pub index: u32,
    /// Time between the bounding index pulses, in seconds.
    pub rotation_time: Option<f64>,
    pub rpm: Option<f64>,
    pub rpm_class: Option<DiskRpm>,
    /// The nominal cell time the PLL started from, in nanoseconds.
    pub cell_time_ns: Option<f64>,
    pub pll: Option<PllStats>,
    pub framer: Option<FramerStats>,
    pub candidates: u32,
    /// The error that ended decoding of this revolution, if any.
    pub error: Option<DecodeError>,
}

impl RevolutionDiagnostics {
    pub fn new(index: u32, revolution: &Revolution) -> Self {
        let rotation_time = revolution.index_time();
        RevolutionDiagnostics {
            index,
            rotation_time,
            rpm: rotation_time.and_then(DiskRpm::rpm_from_index_time),
            rpm_class: rotation_time.and_then(DiskRpm::try_from_index_time),
            ..RevolutionDiagnostics::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl Display for RevolutionDiagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Revolution {}: ", self.index)?;
        match (self.rotation_time, self.rpm_class) {
            (Some(time), Some(class)) => write!(f, "{} ({}) ", format_ms!(time), class)?,
            (Some(time), None) => write!(f, "{} ", format_ms!(time))?,
            _ => write!(f, "no index ")?,
        }
        match &self.error {
            Some(e) => write!(f, "error: {}", e),
            None => write!(f, "{} candidates", self.candidates),
        }
    }
}

/// Signal and timing quality of a track, summarized over all of its revolutions.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackQuality {
    /// 0.0 (unusable) to 1.0 (every cell locked and centered).
    pub signal_quality: f64,
    /// Variance of the per-cell timing error, normalized to the cell time.
    pub timing_variance: f64,
    pub weak_bit_count: u32,
    pub missing_clocks: u32,
    pub extra_clocks: u32,
    pub index_found: bool,
    /// Mean rotation time in seconds.
    pub rotation_time: Option<f64>,
    pub rpm: Option<f64>,
    pub rpm_variance: f64,
    pub flags: QualityFlags,
}

impl TrackQuality {
    /// Summarize the diagnostics of a track's revolutions and its merged sectors.
    pub fn compute(revolutions: &[RevolutionDiagnostics], sectors: &[MergedSector]) -> TrackQuality {
        let mut quality = TrackQuality::default();

        let mut cells = 0u64;
        let mut locked_cells = 0u64;
        let mut measured = 0u64;
        let mut abs_phase_sum = 0.0;
        let mut variance_sum = 0.0;

        for rev in revolutions {
            if let Some(pll) = &rev.pll {
                cells += pll.cells as u64;
                locked_cells += pll.locked_cells as u64;
                measured += pll.measured() as u64;
                abs_phase_sum += pll.mean_abs_phase_error() * pll.measured() as f64;
                variance_sum += pll.phase_error_variance() * pll.measured() as f64;
                quality.weak_bit_count += pll.weak_cells;
                quality.extra_clocks += pll.extra_clocks;
            }
            if let Some(framer) = &rev.framer {
                quality.missing_clocks += framer.demod.missing_clocks;
                quality.extra_clocks += framer.demod.extra_clocks;
            }
            if matches!(rev.error, Some(DecodeError::ClockLost { .. })) {
                quality.flags |= QualityFlags::CLOCK_LOST;
            }
        }

        if cells > 0 && measured > 0 {
            let lock_ratio = locked_cells as f64 / cells as f64;
            let mean_abs_phase = abs_phase_sum / measured as f64;
            quality.signal_quality = lock_ratio * (1.0 - (2.0 * mean_abs_phase).min(1.0));
            quality.timing_variance = variance_sum / measured as f64;
        }

        let times: Vec<f64> = revolutions.iter().filter_map(|r| r.rotation_time).collect();
        let rpms: Vec<f64> = revolutions.iter().filter_map(|r| r.rpm).collect();
        quality.index_found = !times.is_empty();
        if !quality.index_found {
            quality.flags |= QualityFlags::NO_INDEX;
        }
        quality.rotation_time = mean(&times);
        quality.rpm = mean(&rpms);
        if let Some(mean_rpm) = quality.rpm {
            quality.rpm_variance = rpms.iter().map(|r| (r - mean_rpm).powi(2)).sum::<f64>() / rpms.len() as f64;
            if rpms.len() > 1 && quality.rpm_variance.sqrt() > mean_rpm * RPM_UNSTABLE_FRACTION {
                quality.flags |= QualityFlags::RPM_UNSTABLE;
            }
        }

        let attempted = revolutions.iter().filter(|r| r.pll.is_some()).count();
        let no_sync = revolutions
            .iter()
            .filter(|r| matches!(r.error, Some(DecodeError::SyncNotFound)))
            .count();
        if attempted > 0 && no_sync == attempted {
            quality.flags |= QualityFlags::NO_SYNC;
        }

        for sector in sectors {
            match sector.status {
                SectorStatus::Failed => quality.flags |= QualityFlags::FAILED_SECTORS,
                SectorStatus::Recovered => quality.flags |= QualityFlags::RECOVERED_SECTORS,
                SectorStatus::Ok => {}
            }
            if sector.has_weak_bits() {
                quality.flags |= QualityFlags::WEAK_BITS;
            }
        }

        quality
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    }
    else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sector outcome counts of a track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackSummary {
    pub ok: u32,
    pub recovered: u32,
    pub failed: u32,
    /// Sum of the scores of every candidate read from the track.
    pub total_score: u64,
    pub candidates: u32,
}

impl Display for TrackSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OK: {} Recovered: {} Failed: {} Candidates: {} Score: {}",
            self.ok, self.recovered, self.failed, self.candidates, self.total_score
        )
    }
}

impl TrackSummary {
    pub fn compute<'a>(
        sectors: &[MergedSector],
        candidates: impl IntoIterator<Item = &'a SectorCandidate>,
    ) -> TrackSummary {
        let mut summary = TrackSummary::default();
        for sector in sectors {
            match sector.status {
                SectorStatus::Ok => summary.ok += 1,
                SectorStatus::Recovered => summary.recovered += 1,
                SectorStatus::Failed => summary.failed += 1,
            }
        }
        for candidate in candidates {
            summary.candidates += 1;
            summary.total_score += candidate.score() as u64;
        }
        summary
    }

    pub fn sectors(&self) -> u32 {
        self.ok + self.recovered + self.failed
    }
}
