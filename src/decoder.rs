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

//! The decode pipeline.
//!
//! A [TrackDecoder] takes the captured revolutions of one or more tracks and
//! produces a [TrackReport] per track. Each revolution is decoded as an
//! independent task (PLL, demodulator, framer); the candidates of a track are
//! then merged once every revolution of that track has finished.
//!
//! Errors confined to one revolution are recorded in that revolution's
//! [RevolutionDiagnostics] and never abort the track. Only cancellation aborts
//! a decode run.

use crate::{
    bitstream_codec::demodulator_for,
    crc::{CrcEngine, CrcPresetId},
    diagnostics::{RevolutionDiagnostics, TrackQuality, TrackSummary},
    flux::{split_revolutions, FluxHistogram, FluxSample, Pll, PllParams, Revolution},
    merge::{MergeConfig, MergedSector, SectorAggregator},
    track_schema::{FieldVerifier, FrameError, FramerConfig, TrackSchema},
    types::{DataEncoding, DiskCh, SectorAddress, SectorCandidate},
    DecodeError,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

impl From<FrameError> for DecodeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::SyncNotFound => DecodeError::SyncNotFound,
            FrameError::CrcMismatch(candidate) => DecodeError::CrcMismatch(candidate.address()),
            FrameError::GeometryMismatch { found, .. } => DecodeError::GeometryMismatch { found },
            e @ (FrameError::OrphanData(_) | FrameError::Truncated) => DecodeError::FluxData(e.to_string()),
        }
    }
}

/// Everything needed to decode a set of tracks. Shared read-only by all decode tasks.
#[derive(Clone, Debug)]
pub struct DecodeConfig {
    pub encoding: DataEncoding,
    pub pll: PllParams,
    pub framer: FramerConfig,
    pub merge: MergeConfig,
    pub crc: CrcEngine,
    /// Estimate the bit cell time of each revolution from its flux histogram,
    /// instead of using `pll.bit_cell_time_ns` as given.
    pub auto_cell_time: bool,
}

impl DecodeConfig {
    /// Create a configuration with default loop, framing and merge parameters and
    /// the standard floppy CRC.
    pub fn new(encoding: DataEncoding) -> Result<Self, DecodeError> {
        Ok(DecodeConfig {
            encoding,
            pll: PllParams::default(),
            framer: FramerConfig::default(),
            merge: MergeConfig::default(),
            crc: CrcEngine::from_preset(CrcPresetId::FLOPPY)?,
            auto_cell_time: false,
        })
    }

    pub fn with_pll(mut self, pll: PllParams) -> Self {
        self.pll = pll;
        self
    }

    pub fn with_framer(mut self, framer: FramerConfig) -> Self {
        self.framer = framer;
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_crc(mut self, crc: CrcEngine) -> Self {
        self.crc = crc;
        self
    }

    pub fn with_auto_cell_time(mut self, state: bool) -> Self {
        self.auto_cell_time = state;
        self
    }

    pub fn schema(&self) -> Option<TrackSchema> {
        TrackSchema::for_encoding(self.encoding)
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        self.pll.validate()?;
        self.framer.validate()?;
        self.merge.validate()?;
        if self.schema().is_none() {
            return Err(DecodeError::Parameter(format!(
                "DecodeConfig: no sector layout is defined for {} tracks",
                self.encoding
            )));
        }
        Ok(())
    }
}

/// A cooperative cancellation flag shared between a decode run and its caller.
///
/// Cancellation is observed between revolutions and before each merge. A
/// revolution already being decoded always runs to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<(), DecodeError> {
        if self.is_cancelled() {
            Err(DecodeError::Cancelled)
        }
        else {
            Ok(())
        }
    }
}

/// The captured revolutions of one physical track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackCapture {
    pub ch: DiskCh,
    pub revolutions: Vec<Revolution>,
}

impl TrackCapture {
    pub fn new(ch: DiskCh, revolutions: Vec<Revolution>) -> Self {
        TrackCapture { ch, revolutions }
    }

    /// Build a capture from a continuous sample stream, split at index pulses.
    /// See [split_revolutions].
    pub fn from_samples(ch: DiskCh, samples: &[FluxSample], sample_clock_hz: f64, budget: usize) -> Self {
        TrackCapture {
            ch,
            revolutions: split_revolutions(samples, sample_clock_hz, budget),
        }
    }
}

/// The result of decoding a single revolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RevolutionOutcome {
    pub diagnostics: RevolutionDiagnostics,
    pub candidates: Vec<SectorCandidate>,
}

/// The decoded sectors of a track along with the evidence they were merged from.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackReport {
    pub ch: DiskCh,
    /// One merged sector per address found, in address order.
    pub sectors: Vec<MergedSector>,
    pub quality: TrackQuality,
    pub summary: TrackSummary,
    pub revolutions: Vec<RevolutionDiagnostics>,
    /// Every raw candidate read, by address.
    pub candidates: BTreeMap<SectorAddress, Vec<SectorCandidate>>,
}

impl TrackReport {
    pub fn sector(&self, address: &SectorAddress) -> Option<&MergedSector> {
        self.sectors.iter().find(|s| s.address == *address)
    }

    /// Recompute the quality and summary from the stored evidence.
    pub fn recompute(&self) -> (TrackQuality, TrackSummary) {
        (
            TrackQuality::compute(&self.revolutions, &self.sectors),
            TrackSummary::compute(&self.sectors, self.candidates.values().flatten()),
        )
    }
}

#[derive(Clone, Debug)]
pub struct TrackDecoder {
    config: Arc<DecodeConfig>,
    cancel: CancelToken,
}

impl TrackDecoder {
    pub fn new(config: DecodeConfig) -> Result<Self, DecodeError> {
        if let Err(e) = config.validate() {
            log::error!("TrackDecoder::new(): Invalid configuration: {}", e);
            return Err(e);
        }
        Ok(TrackDecoder {
            config: Arc::new(config),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Decode one revolution into sector candidates. Failures are recorded in the
    /// outcome's diagnostics.
    pub fn decode_revolution(&self, index: u32, revolution: &Revolution) -> RevolutionOutcome {
        let mut diagnostics = RevolutionDiagnostics::new(index, revolution);
        let candidates = match self.run_revolution(index, revolution, &mut diagnostics) {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("TrackDecoder::decode_revolution(): Revolution {}: {}", index, e);
                diagnostics.error = Some(e);
                Vec::new()
            }
        };
        diagnostics.candidates = candidates.len() as u32;
        RevolutionOutcome {
            diagnostics,
            candidates,
        }
    }

    fn run_revolution(
        &self,
        index: u32,
        revolution: &Revolution,
        diagnostics: &mut RevolutionDiagnostics,
    ) -> Result<Vec<SectorCandidate>, DecodeError> {
        let config = &self.config;
        revolution.validate()?;

        let mut params = config.pll.clone();
        if config.auto_cell_time {
            match FluxHistogram::from_revolution(revolution)?.estimate_cell_time(config.encoding) {
                Some(cell) => params = params.with_bit_cell_time_ns(cell),
                None => log::debug!(
                    "TrackDecoder::run_revolution(): No histogram peak, using nominal cell time {:.1}ns",
                    params.bit_cell_time_ns
                ),
            }
        }
        diagnostics.cell_time_ns = Some(params.bit_cell_time_ns);

        let mut pll = Pll::new(params);
        let decoded = match pll.decode_revolution(revolution) {
            Ok(decoded) => decoded,
            Err(e) => {
                diagnostics.pll = Some(pll.stats().clone());
                return Err(e);
            }
        };
        diagnostics.pll = Some(decoded.stats);

        let schema = config
            .schema()
            .ok_or_else(|| DecodeError::Parameter(format!("no sector layout for {}", config.encoding)))?;
        let demod = demodulator_for(config.encoding);
        let framer = schema.framer(&config.framer, &config.crc);
        let framed = framer.frame_track(demod.as_ref(), &decoded.cells, index)?;

        log::debug!(
            "TrackDecoder::run_revolution(): Revolution {}: {} candidates, {} ID marks",
            index,
            framed.candidates.len(),
            framed.stats.id_marks
        );
        diagnostics.framer = Some(framed.stats);
        Ok(framed.candidates)
    }

    fn run_task(&self, index: u32, revolution: &Revolution) -> Result<RevolutionOutcome, DecodeError> {
        self.cancel.check()?;
        Ok(self.decode_revolution(index, revolution))
    }

    /// Decode and merge a single track.
    pub fn decode_track(&self, capture: &TrackCapture) -> Result<TrackReport, DecodeError> {
        let mut reports = self.decode_tracks(std::slice::from_ref(capture))?;
        reports
            .pop()
            .ok_or_else(|| DecodeError::Parameter("no report produced".to_string()))
    }

    /// Decode and merge a set of tracks. Every revolution of every track is an
    /// independent task. Reports are returned in the order of `captures`.
    pub fn decode_tracks(&self, captures: &[TrackCapture]) -> Result<Vec<TrackReport>, DecodeError> {
        let tasks: Vec<(usize, u32, &Revolution)> = captures
            .iter()
            .enumerate()
            .flat_map(|(t, capture)| {
                capture
                    .revolutions
                    .iter()
                    .enumerate()
                    .map(move |(r, revolution)| (t, r as u32, revolution))
            })
            .collect();

        log::debug!(
            "TrackDecoder::decode_tracks(): Decoding {} tracks, {} revolutions",
            captures.len(),
            tasks.len()
        );

        #[cfg(feature = "parallel")]
        let outcomes: Vec<Result<RevolutionOutcome, DecodeError>> = tasks
            .par_iter()
            .map(|&(_, index, revolution)| self.run_task(index, revolution))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Result<RevolutionOutcome, DecodeError>> = tasks
            .iter()
            .map(|&(_, index, revolution)| self.run_task(index, revolution))
            .collect();

        let mut per_track: Vec<Vec<RevolutionOutcome>> = captures.iter().map(|_| Vec::new()).collect();
        for (&(track, _, _), outcome) in tasks.iter().zip(outcomes) {
            per_track[track].push(outcome?);
        }

        captures
            .iter()
            .zip(per_track)
            .map(|(capture, outcomes)| self.reduce_track(capture.ch, outcomes))
            .collect()
    }

    /// Merge the candidates of all revolutions of a track.
    fn reduce_track(&self, ch: DiskCh, outcomes: Vec<RevolutionOutcome>) -> Result<TrackReport, DecodeError> {
        self.cancel.check()?;

        let mut aggregator = SectorAggregator::new();
        let mut revolutions = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            aggregator.extend(outcome.candidates);
            revolutions.push(outcome.diagnostics);
        }

        let sectors = match FieldVerifier::for_encoding(self.config.encoding, &self.config.framer, &self.config.crc) {
            Some(verifier) => aggregator.merge_all_verified(&self.config.merge, &verifier),
            None => aggregator.merge_all(&self.config.merge),
        };
        let candidates = aggregator.into_inner();
        let quality = TrackQuality::compute(&revolutions, &sectors);
        let summary = TrackSummary::compute(&sectors, candidates.values().flatten());
        log::debug!("TrackDecoder::reduce_track(): Track {}: {}", ch, summary);

        Ok(TrackReport {
            ch,
            sectors,
            quality,
            summary,
            revolutions,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GcrScheme;

    #[test]
    fn test_config_rejects_apple() {
        let config = DecodeConfig::new(DataEncoding::Gcr(GcrScheme::Apple62)).unwrap();
        assert!(matches!(config.validate(), Err(DecodeError::Parameter(_))));
        assert!(TrackDecoder::new(config).is_err());
    }

    #[test]
    fn test_empty_revolution_is_recorded() {
        let decoder = TrackDecoder::new(DecodeConfig::new(DataEncoding::Mfm).unwrap()).unwrap();
        let outcome = decoder.decode_revolution(0, &Revolution::new(Vec::new(), 24e6, false));
        assert!(outcome.candidates.is_empty());
        assert!(matches!(outcome.diagnostics.error, Some(DecodeError::FluxData(_))));
    }

    #[test]
    fn test_track_without_marks_still_reports() {
        let decoder = TrackDecoder::new(DecodeConfig::new(DataEncoding::Mfm).unwrap()).unwrap();
        // A steady 2-cell pattern locks the clock but holds no address marks.
        let revolution = Revolution::from_intervals_ns(&vec![4000.0; 2000], 24e6, true);
        let report = decoder
            .decode_track(&TrackCapture::new(DiskCh::new(0, 0), vec![revolution]))
            .unwrap();
        assert!(report.sectors.is_empty());
        assert_eq!(report.revolutions.len(), 1);
        assert_eq!(report.revolutions[0].error, Some(DecodeError::SyncNotFound));
        assert!(report.revolutions[0].pll.is_some());
        assert!(report.quality.flags.contains(crate::types::QualityFlags::NO_SYNC));
        assert_eq!(report.summary.sectors(), 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let decoder = TrackDecoder::new(DecodeConfig::new(DataEncoding::Mfm).unwrap()).unwrap();
        decoder.cancel_token().cancel();
        let revolution = Revolution::from_intervals_ns(&[4000.0; 100], 24e6, true);
        let result = decoder.decode_track(&TrackCapture::new(DiskCh::new(0, 0), vec![revolution]));
        assert_eq!(result, Err(DecodeError::Cancelled));
    }

    #[test]
    fn test_cancel_with_no_revolutions_is_seen_at_merge() {
        let token = CancelToken::new();
        let decoder = TrackDecoder::new(DecodeConfig::new(DataEncoding::Mfm).unwrap())
            .unwrap()
            .with_cancel_token(token.clone());
        token.cancel();
        let result = decoder.decode_tracks(&[TrackCapture::new(DiskCh::new(1, 0), Vec::new())]);
        assert_eq!(result, Err(DecodeError::Cancelled));
    }

    #[test]
    fn test_frame_error_conversion() {
        use crate::types::{IntegrityCheck, IntegrityField};

        let address = SectorAddress::new(2, 1, 5, 2);
        let bad = IntegrityCheck::Crc(IntegrityField::new(0x1234, 0x4321));
        let candidate = SectorCandidate::new(address, 0, vec![0; 512], bad, bad);
        assert_eq!(
            DecodeError::from(FrameError::CrcMismatch(Box::new(candidate))),
            DecodeError::CrcMismatch(address)
        );
        assert_eq!(
            DecodeError::from(FrameError::GeometryMismatch {
                found: address,
                reason: "cylinder"
            }),
            DecodeError::GeometryMismatch { found: address }
        );
        assert_eq!(DecodeError::from(FrameError::SyncNotFound), DecodeError::SyncNotFound);
        assert!(matches!(
            DecodeError::from(FrameError::Truncated),
            DecodeError::FluxData(_)
        ));
    }
}
