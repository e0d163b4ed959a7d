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

//! Bit cell time estimation from the distribution of flux intervals.
//!
//! Used to seed the PLL when the nominal data rate is unknown, or when the
//! drive ran far enough off speed that the PLL would never acquire lock.

use crate::{flux::Revolution, types::DataEncoding, DecodeError};
use histogram::Histogram;
use std::ops::RangeInclusive;

/// Buckets within 2^-3 (12.5%) of their value. Finer grouping splits jittered
/// transition peaks into false maxima.
const GROUPING_POWER: u8 = 3;
/// 2^15ns covers the longest GCR runs at the slowest data rates.
const MAX_VALUE_POWER: u8 = 15;
/// Minimum share of all intervals a bucket must hold to count as a peak.
const PEAK_THRESHOLD: f64 = 0.005;

/// A transition peak: interval count and the bucket's range in nanoseconds.
pub type FluxPeak = (u64, RangeInclusive<u64>);

pub struct FluxHistogram {
    histogram: Histogram,
    peaks: Option<Vec<FluxPeak>>,
    sampled_ns: f64,
}

impl FluxHistogram {
    /// Build a histogram over the leading `fraction` of `deltas`, given in nanoseconds.
    pub fn new(deltas: &[f64], fraction: f64) -> Result<Self, DecodeError> {
        let mut histogram = Histogram::new(GROUPING_POWER, MAX_VALUE_POWER)
            .map_err(|e| DecodeError::Parameter(format!("FluxHistogram::new(): {:?}", e)))?;

        let count = (deltas.len() as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
        log::debug!("FluxHistogram::new(): Sampling {} of {} intervals", count, deltas.len());

        let sampled = &deltas[..count.min(deltas.len())];
        for &delta in sampled {
            // Values past the top bucket are dropped.
            let _ = histogram.increment(delta.max(0.0) as u64);
        }

        Ok(FluxHistogram {
            histogram,
            peaks: None,
            sampled_ns: sampled.iter().sum(),
        })
    }

    /// Build a histogram over every interval of a revolution.
    pub fn from_revolution(revolution: &Revolution) -> Result<Self, DecodeError> {
        let deltas: Vec<f64> = revolution.intervals_ns().collect();
        Self::new(&deltas, 1.0)
    }

    /// Sum of the sampled intervals, in nanoseconds.
    pub fn total_time(&self) -> f64 {
        self.sampled_ns
    }

    /// Local maxima in bucket order. A bucket is a peak when it is at least as full as
    /// the bucket before it, strictly fuller than the one after it, and above the
    /// noise threshold.
    pub fn peaks(&mut self) -> &[FluxPeak] {
        if self.peaks.is_none() {
            self.peaks = Some(self.scan_peaks());
        }
        self.peaks.as_deref().unwrap_or_default()
    }

    fn scan_peaks(&self) -> Vec<FluxPeak> {
        let buckets: Vec<(u64, u64, u64)> = self
            .histogram
            .into_iter()
            .map(|b| (b.count(), b.start(), b.end()))
            .collect();
        let total: u64 = buckets.iter().map(|b| b.0).sum();
        let threshold = (total as f64 * PEAK_THRESHOLD).round() as u64;

        let peaks: Vec<FluxPeak> = buckets
            .windows(3)
            .filter(|w| {
                let (prev, curr, next) = (w[0].0, w[1].0, w[2].0);
                curr >= prev && curr > next && curr >= threshold
            })
            .map(|w| (w[1].0, w[1].1..=w[1].2))
            .collect();

        for (count, range) in &peaks {
            log::trace!("FluxHistogram::scan_peaks(): {:?} count {}", range, count);
        }
        peaks
    }

    /// Center of the shortest transition peak, in nanoseconds. Requires at least two
    /// peaks, since a lone peak gives no way to tell which run length it represents.
    pub fn base_transition_time(&mut self) -> Option<f64> {
        match self.peaks() {
            [(_, first), _, ..] => Some(((first.start() + first.end()) / 2) as f64),
            _ => {
                log::warn!("FluxHistogram::base_transition_time(): Fewer than two peaks found");
                None
            }
        }
    }

    /// Estimate the bit cell time in nanoseconds for the given encoding, from the
    /// shortest transition peak.
    pub fn estimate_cell_time(&mut self, encoding: DataEncoding) -> Option<f64> {
        let base = self.base_transition_time()?;
        let cell = base / encoding.min_run() as f64;
        log::debug!(
            "FluxHistogram::estimate_cell_time(): Base transition {:.1}ns, {} cell time {:.1}ns",
            base,
            encoding,
            cell
        );
        Some(cell)
    }
}
