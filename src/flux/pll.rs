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

//! A software phase-locked loop recovering the bit cell clock from flux intervals.
//!
//! Each flux interval is classified as a whole number of bit cells using the
//! current estimate of the cell time. The per-cell timing error of the
//! interval drives a PI(D) loop filter that refines the estimate. Lock is
//! tracked with hysteresis, and cells decoded while the loop is unlocked, or
//! whose transition lands far from the cell center, are marked weak.

use crate::{flux::Revolution, DecodeError};
use bit_vec::BitVec;
use std::{collections::VecDeque, fmt::Display};
use strum::{Display as StrumDisplay, EnumIter};

/// The estimated cell time may never drift further than this fraction from nominal.
const MAX_CLOCK_ADJUST: f64 = 0.25;
/// Upper bound on the number of cells a single interval may expand to.
const MAX_RUN_CELLS: f64 = 4096.0;

/// Parameters of the clock recovery loop.
///
/// `bit_cell_time_ns` is the encoded (channel) bit cell: 2000ns for a 250Kbps
/// MFM disk spinning at 300RPM, 1000ns for 500Kbps.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllParams {
    /// Sample clock of the capture device, in Hz. Informational.
    pub clock_rate_hz: f64,
    /// Nominal bit cell time in nanoseconds.
    pub bit_cell_time_ns: f64,
    /// Largest per-cell timing error, as a fraction of the cell time, considered in tolerance.
    pub tolerance_fraction: f64,
    pub p_gain: f64,
    pub i_gain: f64,
    pub d_gain: f64,
    /// 1 for a proportional loop, 2 to add the integral term.
    pub filter_order: u8,
    /// Consecutive in-tolerance intervals required to enter lock.
    pub lock_threshold: u32,
    /// Consecutive out-of-tolerance intervals required to lose lock.
    pub unlock_threshold: u32,
    /// Number of recent phase errors averaged into the loop filter input.
    pub history_depth: u32,
    /// Raise loop gains while acquiring lock and lower them once locked.
    pub adaptive_mode: bool,
    pub weak_bit_detect: bool,
    /// Distance of a transition from the nearest cell boundary, as a fraction of a cell,
    /// beyond which its cells are considered weak.
    pub weak_bit_threshold_fraction: f64,
}

impl Default for PllParams {
    fn default() -> Self {
        PllParams {
            clock_rate_hz: 24e6,
            bit_cell_time_ns: 2000.0,
            tolerance_fraction: 0.15,
            p_gain: 0.08,
            i_gain: 0.004,
            d_gain: 0.0,
            filter_order: 2,
            lock_threshold: 6,
            unlock_threshold: 3,
            history_depth: 8,
            adaptive_mode: false,
            weak_bit_detect: true,
            weak_bit_threshold_fraction: 0.15,
        }
    }
}

impl PllParams {
    pub fn from_preset(preset: PllPreset) -> Self {
        let default = PllParams::default();
        match preset {
            PllPreset::Default => default,
            PllPreset::Aggressive => PllParams {
                tolerance_fraction: 0.25,
                p_gain: 0.15,
                i_gain: 0.008,
                d_gain: 0.001,
                lock_threshold: 4,
                unlock_threshold: 2,
                history_depth: 4,
                adaptive_mode: true,
                weak_bit_threshold_fraction: 0.20,
                ..default
            },
            PllPreset::Conservative => PllParams {
                tolerance_fraction: 0.10,
                p_gain: 0.04,
                i_gain: 0.002,
                lock_threshold: 10,
                unlock_threshold: 5,
                history_depth: 16,
                weak_bit_threshold_fraction: 0.10,
                ..default
            },
            PllPreset::Forensic => PllParams {
                tolerance_fraction: 0.05,
                p_gain: 0.02,
                i_gain: 0.001,
                lock_threshold: 16,
                unlock_threshold: 8,
                history_depth: 32,
                weak_bit_threshold_fraction: 0.05,
                ..default
            },
            PllPreset::IbmPcDd | PllPreset::AtariSt => default,
            PllPreset::IbmPcHd => PllParams {
                bit_cell_time_ns: 1000.0,
                ..default
            },
            PllPreset::AmigaDd => PllParams {
                tolerance_fraction: 0.12,
                p_gain: 0.06,
                i_gain: 0.003,
                lock_threshold: 8,
                unlock_threshold: 4,
                history_depth: 12,
                ..default
            },
            PllPreset::AmigaHd => PllParams {
                bit_cell_time_ns: 1000.0,
                ..PllParams::from_preset(PllPreset::AmigaDd)
            },
            PllPreset::C64 => PllParams {
                clock_rate_hz: 16e6,
                bit_cell_time_ns: 3333.0,
                tolerance_fraction: 0.18,
                p_gain: 0.10,
                i_gain: 0.005,
                lock_threshold: 5,
                unlock_threshold: 3,
                history_depth: 6,
                adaptive_mode: true,
                weak_bit_threshold_fraction: 0.18,
                ..default
            },
            PllPreset::Apple2 => PllParams {
                clock_rate_hz: 16e6,
                bit_cell_time_ns: 4000.0,
                tolerance_fraction: 0.20,
                p_gain: 0.12,
                i_gain: 0.006,
                lock_threshold: 5,
                unlock_threshold: 3,
                history_depth: 6,
                adaptive_mode: true,
                weak_bit_threshold_fraction: 0.20,
                ..default
            },
            PllPreset::MacGcr => PllParams {
                clock_rate_hz: 20e6,
                bit_cell_time_ns: 2000.0,
                ..PllParams::from_preset(PllPreset::C64)
            },
            PllPreset::Greaseweazle => PllParams {
                clock_rate_hz: 24e6,
                ..default
            },
            PllPreset::KryoFlux => PllParams {
                clock_rate_hz: 24_027_428.571_428_5,
                ..default
            },
            PllPreset::Scp => PllParams {
                clock_rate_hz: 40e6,
                ..default
            },
        }
    }

    pub fn with_bit_cell_time_ns(mut self, ns: f64) -> Self {
        self.bit_cell_time_ns = ns;
        self
    }

    pub fn with_clock_rate_hz(mut self, hz: f64) -> Self {
        self.clock_rate_hz = hz;
        self
    }

    /// Check that the parameters describe a loop that can run.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let fail = |msg: &str| Err(DecodeError::Parameter(format!("PllParams: {}", msg)));
        if !(self.bit_cell_time_ns.is_finite() && self.bit_cell_time_ns > 0.0) {
            return fail("bit cell time must be positive");
        }
        if !(0.0 < self.tolerance_fraction && self.tolerance_fraction < 0.5) {
            return fail("tolerance must be between 0 and 0.5");
        }
        if !(self.filter_order == 1 || self.filter_order == 2) {
            return fail("filter order must be 1 or 2");
        }
        if self.p_gain < 0.0 || self.i_gain < 0.0 || self.d_gain < 0.0 {
            return fail("loop gains must not be negative");
        }
        if self.lock_threshold == 0 || self.unlock_threshold == 0 {
            return fail("lock and unlock thresholds must be at least 1");
        }
        if self.history_depth == 0 {
            return fail("history depth must be at least 1");
        }
        if !(0.0..=0.5).contains(&self.weak_bit_threshold_fraction) {
            return fail("weak bit threshold must be between 0 and 0.5");
        }
        Ok(())
    }
}

/// Named sets of [PllParams].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, StrumDisplay, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PllPreset {
    #[default]
    Default,
    /// Fast acquisition and wide tolerance for badly degraded media.
    Aggressive,
    /// Slow, stable tracking for healthy media.
    Conservative,
    /// Very narrow tolerance, for characterizing weak bits rather than recovering data.
    Forensic,
    IbmPcDd,
    IbmPcHd,
    AmigaDd,
    AmigaHd,
    AtariSt,
    C64,
    Apple2,
    MacGcr,
    Greaseweazle,
    KryoFlux,
    Scp,
}

/// Lock state of the loop.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PllLockState {
    #[default]
    Unlocked,
    Locked,
}

/// One decoded bit cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BitCell {
    /// True if a flux transition fell in this cell.
    pub value: bool,
    /// Distance of the interval's transition from the nearest cell boundary, in cells.
    pub deviation: f32,
    /// The cell's timing could not be trusted.
    pub weak: bool,
}

/// The cells produced by one flux interval: `len - 1` empty cells followed by
/// the cell holding the transition. All cells of a run share its timing.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CellRun {
    pub len: u32,
    pub deviation: f32,
    pub weak: bool,
}

impl CellRun {
    pub fn cells(&self) -> impl Iterator<Item = BitCell> + '_ {
        (0..self.len).map(move |i| BitCell {
            value: i + 1 == self.len,
            deviation: self.deviation,
            weak: self.weak,
        })
    }
}

/// A decoded stream of bit cells with a parallel weak cell mask.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellStream {
    bits: BitVec,
    weak: BitVec,
}

impl CellStream {
    pub fn with_capacity(capacity: usize) -> Self {
        CellStream {
            bits: BitVec::with_capacity(capacity),
            weak: BitVec::with_capacity(capacity),
        }
    }

    /// Create a stream of cells with no weak cells.
    pub fn from_bits(bits: BitVec) -> Self {
        let weak = BitVec::from_elem(bits.len(), false);
        CellStream { bits, weak }
    }

    pub fn push(&mut self, cell: BitCell) {
        self.bits.push(cell.value);
        self.weak.push(cell.weak);
    }

    pub fn push_run(&mut self, run: &CellRun) {
        for cell in run.cells() {
            self.push(cell);
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn bits(&self) -> &BitVec {
        &self.bits
    }

    pub fn weak_mask(&self) -> &BitVec {
        &self.weak
    }

    #[inline]
    pub fn bit(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(false)
    }

    #[inline]
    pub fn is_weak(&self, index: usize) -> bool {
        self.weak.get(index).unwrap_or(false)
    }

    /// Set the weak flag of a range of cells.
    pub fn mark_weak(&mut self, range: std::ops::Range<usize>) {
        for i in range.start..range.end.min(self.weak.len()) {
            self.weak.set(i, true);
        }
    }

    pub fn weak_count(&self) -> usize {
        self.weak.iter().filter(|w| *w).count()
    }
}

/// Statistics gathered over one run of the loop.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PllStats {
    pub intervals: u32,
    pub cells: u32,
    pub locked_cells: u32,
    pub weak_cells: u32,
    /// Intervals shorter than half a cell. These produce no cells.
    pub extra_clocks: u32,
    /// Non-positive or non-finite intervals.
    pub rejected: u32,
    pub out_of_tolerance: u32,
    pub lock_events: u32,
    pub unlock_events: u32,
    pub min_cell_ns: f64,
    pub max_cell_ns: f64,
    cell_ns_sum: f64,
    phase_error_sum: f64,
    phase_error_abs_sum: f64,
    phase_error_sq_sum: f64,
    measured: u32,
}

impl Display for PllStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Intervals: {} Cells: {} Locked: {:.1}% Weak: {} Extra clocks: {} Out of tolerance: {} Cell: {:.1}-{:.1}ns",
            self.intervals,
            self.cells,
            self.lock_ratio() * 100.0,
            self.weak_cells,
            self.extra_clocks,
            self.out_of_tolerance,
            self.min_cell_ns,
            self.max_cell_ns
        )
    }
}

impl PllStats {
    fn record(&mut self, cell_ns: f64, rel_error: f64) {
        if self.measured == 0 {
            self.min_cell_ns = cell_ns;
            self.max_cell_ns = cell_ns;
        }
        else {
            self.min_cell_ns = self.min_cell_ns.min(cell_ns);
            self.max_cell_ns = self.max_cell_ns.max(cell_ns);
        }
        self.measured += 1;
        self.cell_ns_sum += cell_ns;
        self.phase_error_sum += rel_error;
        self.phase_error_abs_sum += rel_error.abs();
        self.phase_error_sq_sum += rel_error * rel_error;
    }

    /// Fraction of cells decoded while locked.
    pub fn lock_ratio(&self) -> f64 {
        if self.cells == 0 {
            0.0
        }
        else {
            self.locked_cells as f64 / self.cells as f64
        }
    }

    /// Mean estimated cell time in nanoseconds.
    pub fn mean_cell_ns(&self) -> f64 {
        if self.measured == 0 {
            0.0
        }
        else {
            self.cell_ns_sum / self.measured as f64
        }
    }

    /// Mean absolute per-cell timing error, as a fraction of the cell time.
    pub fn mean_abs_phase_error(&self) -> f64 {
        if self.measured == 0 {
            0.0
        }
        else {
            self.phase_error_abs_sum / self.measured as f64
        }
    }

    /// Variance of the per-cell timing error, normalized to the cell time.
    pub fn phase_error_variance(&self) -> f64 {
        if self.measured == 0 {
            return 0.0;
        }
        let n = self.measured as f64;
        let mean = self.phase_error_sum / n;
        (self.phase_error_sq_sum / n - mean * mean).max(0.0)
    }

    /// Number of intervals that were classified and measured.
    pub fn measured(&self) -> u32 {
        self.measured
    }
}

pub struct PllDecodeResult {
    pub cells: CellStream,
    pub stats: PllStats,
    /// Estimated cell time at the end of the revolution, in nanoseconds.
    pub final_cell_ns: f64,
}

pub struct Pll {
    params: PllParams,
    nominal_cell: f64,
    cell_time: f64,
    min_cell: f64,
    max_cell: f64,
    integral: f64,
    last_phase: f64,
    history: VecDeque<f64>,
    state: PllLockState,
    good_run: u32,
    bad_run: u32,
    stats: PllStats,
}

impl Pll {
    pub fn new(params: PllParams) -> Self {
        let mut pll = Pll {
            nominal_cell: params.bit_cell_time_ns,
            cell_time: params.bit_cell_time_ns,
            min_cell: 0.0,
            max_cell: 0.0,
            integral: 0.0,
            last_phase: 0.0,
            history: VecDeque::with_capacity(params.history_depth.max(1) as usize),
            state: PllLockState::Unlocked,
            good_run: 0,
            bad_run: 0,
            stats: PllStats::default(),
            params,
        };
        pll.set_cell_time(pll.nominal_cell);
        pll
    }

    pub fn from_preset(preset: PllPreset) -> Pll {
        Pll::new(PllParams::from_preset(preset))
    }

    pub fn params(&self) -> &PllParams {
        &self.params
    }

    pub fn state(&self) -> PllLockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == PllLockState::Locked
    }

    /// The current estimated cell time in nanoseconds.
    pub fn cell_time(&self) -> f64 {
        self.cell_time
    }

    pub fn stats(&self) -> &PllStats {
        &self.stats
    }

    /// Change the nominal cell time, for example from a histogram estimate, and reset the loop.
    pub fn set_cell_time(&mut self, ns: f64) {
        self.nominal_cell = ns;
        self.min_cell = ns * (1.0 - MAX_CLOCK_ADJUST);
        self.max_cell = ns * (1.0 + MAX_CLOCK_ADJUST);
        log::debug!(
            "Pll::set_cell_time(): Setting nominal cell to {:.1}ns, range {:.1}-{:.1}ns",
            ns,
            self.min_cell,
            self.max_cell
        );
        self.reset();
    }

    /// Return the loop to its initial state. Called at every revolution boundary.
    pub fn reset(&mut self) {
        self.cell_time = self.nominal_cell;
        self.integral = 0.0;
        self.last_phase = 0.0;
        self.history.clear();
        self.state = PllLockState::Unlocked;
        self.good_run = 0;
        self.bad_run = 0;
        self.stats = PllStats::default();
    }

    /// Process one flux interval, in nanoseconds.
    ///
    /// Returns the run of cells the interval represents, or None if the interval
    /// was too short to contain a cell or was not a valid time.
    pub fn advance(&mut self, interval_ns: f64) -> Option<CellRun> {
        self.stats.intervals += 1;
        if !interval_ns.is_finite() || interval_ns <= 0.0 {
            self.stats.rejected += 1;
            return None;
        }

        let ratio = interval_ns / self.cell_time;
        let k = ratio.round().min(MAX_RUN_CELLS);
        if k < 1.0 {
            // A transition closer than half a cell to the previous one.
            self.stats.extra_clocks += 1;
            log::trace!(
                "Pll::advance(): Extra clock: {:.1}ns interval at {:.1}ns cell",
                interval_ns,
                self.cell_time
            );
            return None;
        }

        let slip = ratio - k;
        let error = interval_ns / k - self.cell_time;
        let rel_error = error / self.cell_time;
        let in_tolerance = rel_error.abs() <= self.params.tolerance_fraction;
        if !in_tolerance {
            self.stats.out_of_tolerance += 1;
        }

        self.stats.record(self.cell_time, rel_error);
        self.update_lock(in_tolerance);
        self.update_clock(error);

        let len = k as u32;
        let off_center = self.params.weak_bit_detect && slip.abs() > self.params.weak_bit_threshold_fraction;
        let weak = off_center || !self.is_locked();

        self.stats.cells += len;
        if self.is_locked() {
            self.stats.locked_cells += len;
        }
        if weak {
            self.stats.weak_cells += len;
        }

        Some(CellRun {
            len,
            deviation: slip as f32,
            weak,
        })
    }

    fn update_lock(&mut self, in_tolerance: bool) {
        match self.state {
            PllLockState::Unlocked => {
                if in_tolerance {
                    self.good_run += 1;
                    if self.good_run >= self.params.lock_threshold {
                        self.state = PllLockState::Locked;
                        self.bad_run = 0;
                        self.stats.lock_events += 1;
                        log::trace!(
                            "Pll::update_lock(): Locked at interval {} with cell {:.1}ns",
                            self.stats.intervals,
                            self.cell_time
                        );
                    }
                }
                else {
                    self.good_run = 0;
                }
            }
            PllLockState::Locked => {
                if in_tolerance {
                    self.bad_run = 0;
                }
                else {
                    self.bad_run += 1;
                    if self.bad_run >= self.params.unlock_threshold {
                        self.state = PllLockState::Unlocked;
                        self.good_run = 0;
                        self.stats.unlock_events += 1;
                        log::trace!(
                            "Pll::update_lock(): Lost lock at interval {} with cell {:.1}ns",
                            self.stats.intervals,
                            self.cell_time
                        );
                    }
                }
            }
        }
    }

    fn update_clock(&mut self, error: f64) {
        if self.history.len() >= self.params.history_depth as usize {
            self.history.pop_front();
        }
        self.history.push_back(error);
        let phase = self.history.iter().sum::<f64>() / self.history.len() as f64;

        let gain_factor = match (self.params.adaptive_mode, self.state) {
            (false, _) => 1.0,
            (true, PllLockState::Unlocked) => 2.0,
            (true, PllLockState::Locked) => 0.5,
        };

        let limit = self.params.tolerance_fraction * self.cell_time;
        let mut delta = self.params.p_gain * gain_factor * phase;
        if self.params.filter_order >= 2 {
            let integral_limit = self.params.tolerance_fraction * self.nominal_cell;
            self.integral =
                (self.integral + self.params.i_gain * gain_factor * phase).clamp(-integral_limit, integral_limit);
            delta += self.integral;
        }
        delta += self.params.d_gain * gain_factor * (phase - self.last_phase);
        self.last_phase = phase;

        self.cell_time = (self.cell_time + delta.clamp(-limit, limit)).clamp(self.min_cell, self.max_cell);
    }

    /// Decode a full revolution into bit cells.
    ///
    /// The loop is reset first. Fails with [DecodeError::FluxData] if the revolution
    /// holds no transitions and with [DecodeError::ClockLost] if lock was never acquired.
    pub fn decode_revolution(&mut self, revolution: &Revolution) -> Result<PllDecodeResult, DecodeError> {
        self.reset();
        revolution.validate()?;

        let mut cells = CellStream::with_capacity(revolution.len() * 3);
        for interval in revolution.intervals_ns() {
            if let Some(run) = self.advance(interval) {
                cells.push_run(&run);
            }
        }

        if self.stats.lock_events == 0 {
            log::warn!(
                "Pll::decode_revolution(): Clock never locked over {} intervals",
                self.stats.intervals
            );
            return Err(DecodeError::ClockLost {
                intervals: self.stats.intervals,
                cells: self.stats.cells,
            });
        }

        log::debug!("Pll::decode_revolution(): {}", self.stats);
        Ok(PllDecodeResult {
            cells,
            stats: self.stats.clone(),
            final_cell_ns: self.cell_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_jitter_free_stream_locks_and_stays_locked() {
        let params = PllParams::default();
        let lock_threshold = params.lock_threshold;
        let mut pll = Pll::new(params.clone());

        let mut locked_at = None;
        for i in 0..10_000u32 {
            let run = pll.advance(params.bit_cell_time_ns).unwrap();
            assert_eq!(run.len, 1);
            if pll.is_locked() && locked_at.is_none() {
                locked_at = Some(i + 1);
            }
            if locked_at.is_some() {
                assert!(pll.is_locked(), "lost lock at cell {}", i);
                assert!(!run.weak);
            }
            else {
                assert!(run.weak);
            }
        }
        assert!(locked_at.unwrap() <= lock_threshold);
        assert_eq!(pll.stats().unlock_events, 0);
        assert!((pll.cell_time() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_classifies_multiples() {
        let mut pll = Pll::new(PllParams::default());
        let runs: Vec<u32> = [4000.0, 6000.0, 8000.0, 4000.0]
            .iter()
            .filter_map(|&i| pll.advance(i))
            .map(|r| r.len)
            .collect();
        assert_eq!(runs, vec![2, 3, 4, 2]);

        let bits: Vec<bool> = pll.advance(6000.0).unwrap().cells().map(|c| c.value).collect();
        assert_eq!(bits, vec![false, false, true]);
    }

    #[test]
    fn test_tracks_slow_drive() {
        // A drive running 4% slow stretches every cell.
        let mut pll = Pll::new(PllParams::default());
        let actual_cell = 2080.0;
        for i in 0..20_000 {
            let k = [2.0, 3.0, 4.0, 2.0, 3.0][i % 5];
            pll.advance(actual_cell * k);
        }
        assert!(pll.is_locked());
        assert!((pll.cell_time() - actual_cell).abs() < 5.0, "cell time {}", pll.cell_time());
    }

    /// A loop that responds to the last interval only, with the given gains.
    fn single_step(p_gain: f64, i_gain: f64, d_gain: f64, filter_order: u8, adaptive_mode: bool) -> PllParams {
        PllParams {
            p_gain,
            i_gain,
            d_gain,
            filter_order,
            adaptive_mode,
            history_depth: 1,
            ..PllParams::default()
        }
    }

    #[test]
    fn test_adaptive_gain_follows_lock_state() {
        // Unlocked: a 100ns error moves the cell by p * 2 instead of p.
        let mut fixed = Pll::new(single_step(0.1, 0.0, 0.0, 2, false));
        let mut adaptive = Pll::new(single_step(0.1, 0.0, 0.0, 2, true));
        fixed.advance(2100.0);
        adaptive.advance(2100.0);
        assert!(!adaptive.is_locked());
        assert!((fixed.cell_time() - 2010.0).abs() < 1e-9, "cell time {}", fixed.cell_time());
        assert!((adaptive.cell_time() - 2020.0).abs() < 1e-9, "cell time {}", adaptive.cell_time());

        // Locked: the same error moves the cell by p * 0.5.
        let mut fixed = Pll::new(single_step(0.1, 0.0, 0.0, 2, false));
        let mut adaptive = Pll::new(single_step(0.1, 0.0, 0.0, 2, true));
        for _ in 0..10 {
            fixed.advance(2000.0);
            adaptive.advance(2000.0);
        }
        assert!(adaptive.is_locked());
        fixed.advance(2100.0);
        adaptive.advance(2100.0);
        assert!(adaptive.is_locked());
        assert!((fixed.cell_time() - 2010.0).abs() < 1e-9, "cell time {}", fixed.cell_time());
        assert!((adaptive.cell_time() - 2005.0).abs() < 1e-9, "cell time {}", adaptive.cell_time());
    }

    #[test]
    fn test_first_order_loop_has_no_integral() {
        let mut first = Pll::new(single_step(0.0, 0.01, 0.0, 1, false));
        let mut second = Pll::new(single_step(0.0, 0.01, 0.0, 2, false));
        first.advance(2100.0);
        second.advance(2100.0);
        assert!((first.cell_time() - 2000.0).abs() < 1e-9, "cell time {}", first.cell_time());
        assert!((second.cell_time() - 2001.0).abs() < 1e-9, "cell time {}", second.cell_time());
    }

    #[test]
    fn test_derivative_gain_reacts_to_error_change() {
        let mut pll = Pll::new(single_step(0.0, 0.0, 0.1, 1, false));
        pll.advance(2100.0);
        assert!((pll.cell_time() - 2010.0).abs() < 1e-9, "cell time {}", pll.cell_time());
        // The same 100ns error again: no change in error, no correction.
        pll.advance(2110.0);
        assert!((pll.cell_time() - 2010.0).abs() < 1e-9, "cell time {}", pll.cell_time());
    }

    #[test]
    fn test_tracks_slow_drive_with_alternate_loops() {
        let actual_cell = 2080.0;
        let variants = [
            PllParams {
                adaptive_mode: true,
                ..PllParams::default()
            },
            PllParams {
                filter_order: 1,
                ..PllParams::default()
            },
        ];
        for params in variants {
            let mut pll = Pll::new(params.clone());
            for i in 0..20_000 {
                let k = [2.0, 3.0, 4.0, 2.0, 3.0][i % 5];
                pll.advance(actual_cell * k);
            }
            assert!(pll.is_locked(), "{:?} did not lock", params);
            assert!(
                (pll.cell_time() - actual_cell).abs() < 5.0,
                "{:?} cell time {}",
                params,
                pll.cell_time()
            );
        }
    }

    #[test]
    fn test_off_center_transitions_are_weak() {
        let mut pll = Pll::new(PllParams::default());
        for _ in 0..100 {
            pll.advance(4000.0);
        }
        assert!(pll.is_locked());
        // 2.3 cells from the previous transition
        let run = pll.advance(4600.0).unwrap();
        assert_eq!(run.len, 2);
        assert!(run.weak);
        let run = pll.advance(4000.0).unwrap();
        assert!(!run.weak);
    }

    #[test]
    fn test_short_and_invalid_intervals() {
        let mut pll = Pll::new(PllParams::default());
        assert!(pll.advance(400.0).is_none());
        assert!(pll.advance(0.0).is_none());
        assert!(pll.advance(f64::NAN).is_none());
        assert_eq!(pll.stats().extra_clocks, 1);
        assert_eq!(pll.stats().rejected, 2);
    }

    #[test]
    fn test_unlock_after_consecutive_bad_intervals() {
        let params = PllParams::default();
        let mut pll = Pll::new(params.clone());
        for _ in 0..50 {
            pll.advance(4000.0);
        }
        assert!(pll.is_locked());
        // 30% long per cell is out of tolerance, but still rounds to the same cell count
        for i in 0..params.unlock_threshold {
            assert!(pll.is_locked(), "unlocked early at {}", i);
            pll.advance(2.0 * 2000.0 * 1.22);
        }
        assert!(!pll.is_locked());
        assert_eq!(pll.stats().unlock_events, 1);
    }

    #[test]
    fn test_clock_lost_on_noise() {
        // Alternate intervals that are far out of tolerance.
        let intervals: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 2700.0 } else { 5300.0 }).collect();
        let rev = Revolution::from_intervals_ns(&intervals, 1e9, true);
        let mut pll = Pll::new(PllParams {
            tolerance_fraction: 0.05,
            p_gain: 0.0,
            i_gain: 0.0,
            ..PllParams::default()
        });
        assert!(matches!(
            pll.decode_revolution(&rev),
            Err(DecodeError::ClockLost { .. })
        ));
    }

    #[test]
    fn test_empty_revolution() {
        let mut pll = Pll::new(PllParams::default());
        let rev = Revolution::new(Vec::new(), 24e6, true);
        assert!(matches!(pll.decode_revolution(&rev), Err(DecodeError::FluxData(_))));
    }

    #[test]
    fn test_presets_are_valid() {
        for preset in PllPreset::iter() {
            let params = PllParams::from_preset(preset);
            assert!(params.validate().is_ok(), "{} preset is invalid", preset);
        }
        assert_eq!(PllParams::from_preset(PllPreset::IbmPcHd).bit_cell_time_ns, 1000.0);
        assert!(PllParams {
            filter_order: 3,
            ..PllParams::default()
        }
        .validate()
        .is_err());
    }
}
