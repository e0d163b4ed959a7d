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

use crate::{flux::FluxSample, format_ms, format_us, DecodeError};
use std::fmt::{Display, Formatter};

/// A struct containing timing statistics about a flux revolution.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RevolutionStats {
    /// The number of flux transitions in the revolution.
    pub ft_ct: usize,
    /// The total time of all transitions in seconds.
    pub total_time: f64,
    /// The time between index pulses in seconds, if the revolution is index-bounded.
    pub index_time: Option<f64>,
    /// The shortest flux interval in seconds.
    pub shortest_flux: f64,
    /// The longest flux interval in seconds.
    pub longest_flux: f64,
}

impl Display for RevolutionStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transitions: {} Time: {} Shortest: {} Longest: {}",
            self.ft_ct,
            format_ms!(self.total_time),
            format_us!(self.shortest_flux),
            format_us!(self.longest_flux)
        )
    }
}

/// A struct representing one revolution of a flux capture.
///
/// A revolution is normally the span between two index pulses. Captures taken
/// without an index signal are split into fixed-size chunks instead, in which
/// case no rotation time can be derived.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Revolution {
    samples: Vec<FluxSample>,
    sample_clock_hz: f64,
    index_bounded: bool,
}

impl Revolution {
    pub fn new(samples: Vec<FluxSample>, sample_clock_hz: f64, index_bounded: bool) -> Self {
        Revolution {
            samples,
            sample_clock_hz,
            index_bounded,
        }
    }

    /// Create a new `Revolution` from a list of durations between flux transitions, given
    /// in integer ticks of a sample clock running at `sample_clock_hz`.
    pub fn from_ticks(ticks: &[u32], sample_clock_hz: f64, index_bounded: bool) -> Self {
        log::debug!(
            "Revolution::from_ticks(): Using sample clock of {:.3}MHz",
            sample_clock_hz / 1e6
        );
        Self::new(
            ticks.iter().map(|&t| FluxSample::new(t)).collect(),
            sample_clock_hz,
            index_bounded,
        )
    }

    /// Create a new `Revolution` from flux intervals in nanoseconds, quantized to ticks of
    /// `sample_clock_hz`. Rounding error is carried forward so that the total time is preserved.
    pub fn from_intervals_ns(intervals: &[f64], sample_clock_hz: f64, index_bounded: bool) -> Self {
        let ticks_per_ns = sample_clock_hz / 1e9;
        let mut carry = 0.0;
        let samples = intervals
            .iter()
            .map(|&ns| {
                let exact = ns * ticks_per_ns + carry;
                let ticks = exact.round().max(0.0);
                carry = exact - ticks;
                FluxSample::new(ticks as u32)
            })
            .collect();
        Self::new(samples, sample_clock_hz, index_bounded)
    }

    pub fn samples(&self) -> &[FluxSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_clock_hz(&self) -> f64 {
        self.sample_clock_hz
    }

    pub fn is_index_bounded(&self) -> bool {
        self.index_bounded
    }

    /// Check that this revolution can be decoded at all.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if !(self.sample_clock_hz.is_finite() && self.sample_clock_hz > 0.0) {
            return Err(DecodeError::FluxData(format!(
                "invalid sample clock: {}",
                self.sample_clock_hz
            )));
        }
        if self.samples.is_empty() {
            return Err(DecodeError::FluxData("revolution contains no flux transitions".to_string()));
        }
        Ok(())
    }

    /// Iterate over the flux intervals in nanoseconds.
    pub fn intervals_ns(&self) -> impl Iterator<Item = f64> + '_ {
        let ns_per_tick = 1e9 / self.sample_clock_hz;
        self.samples.iter().map(move |s| s.ticks as f64 * ns_per_tick)
    }

    /// The sum of all flux intervals, in seconds.
    pub fn total_time(&self) -> f64 {
        let ticks: u64 = self.samples.iter().map(|s| s.ticks as u64).sum();
        ticks as f64 / self.sample_clock_hz
    }

    /// The time between the index pulses bounding this revolution, in seconds.
    pub fn index_time(&self) -> Option<f64> {
        if self.index_bounded && !self.samples.is_empty() {
            Some(self.total_time())
        }
        else {
            None
        }
    }

    /// Retrieve timing statistics for this revolution.
    pub fn stats(&self) -> RevolutionStats {
        let tick = 1.0 / self.sample_clock_hz;
        let shortest = self.samples.iter().map(|s| s.ticks).min().unwrap_or(0);
        let longest = self.samples.iter().map(|s| s.ticks).max().unwrap_or(0);
        RevolutionStats {
            ft_ct: self.samples.len(),
            total_time: self.total_time(),
            index_time: self.index_time(),
            shortest_flux: shortest as f64 * tick,
            longest_flux: longest as f64 * tick,
        }
    }
}

/// Split a continuous capture into revolutions.
///
/// An index flag on a sample means the index pulse arrived during that interval.
/// Each revolution runs from the sample after one index pulse up to and
/// including the sample carrying the next, and partial revolutions before the
/// first and after the last index pulse are discarded.
///
/// If the capture has fewer than two index pulses, it is split into chunks of
/// `budget` samples (or returned whole if `budget` is zero), none of which are
/// index-bounded.
pub fn split_revolutions(samples: &[FluxSample], sample_clock_hz: f64, budget: usize) -> Vec<Revolution> {
    let index_positions: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.index.then_some(i))
        .collect();

    if index_positions.len() >= 2 {
        let revolutions: Vec<Revolution> = index_positions
            .windows(2)
            .map(|w| Revolution::new(samples[w[0] + 1..=w[1]].to_vec(), sample_clock_hz, true))
            .collect();
        log::debug!(
            "split_revolutions(): Found {} index pulses, {} revolutions",
            index_positions.len(),
            revolutions.len()
        );
        return revolutions;
    }

    log::warn!("split_revolutions(): No index signal, splitting capture into {} sample chunks", budget);
    if samples.is_empty() {
        return Vec::new();
    }
    if budget == 0 {
        return vec![Revolution::new(samples.to_vec(), sample_clock_hz, false)];
    }
    samples
        .chunks(budget)
        .map(|chunk| Revolution::new(chunk.to_vec(), sample_clock_hz, false))
        .collect()
}
