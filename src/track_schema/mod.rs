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

//! The `track_schema` module interprets the layout of address marks and fields on a track.
//!
//! A track schema relies on a [Demodulator] to locate marks and decode the
//! underlying bytes, and turns the fields that follow each mark into sector
//! headers and [SectorCandidate]s. The schema also defines the integrity check
//! applied to each field: a CRC for IBM System 34 tracks, an XOR checksum for
//! Commodore tracks.
//!
//! A schema holds no state between tracks. The [SectorFramer::frame_track]
//! walk is shared by all schemas; each schema only describes its field layouts.

pub mod commodore;
pub mod system34;

use crate::{
    bitstream_codec::{demodulator_for, BoxedDemodulator, DecodedBytes, DemodStats, Demodulator, MarkHit, MarkKind},
    crc::CrcEngine,
    flux::CellStream,
    merge::DataVerifier,
    types::{DataEncoding, GcrScheme, IntegrityCheck, SectorAddress, SectorCandidate},
};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

pub use commodore::CommodoreFramer;
pub use system34::System34Framer;

/// The largest size code a sector header may carry.
pub const MAX_SIZE_CODE: u8 = 7;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackSchema {
    /// IBM System 34, used with FM and MFM encodings.
    System34,
    /// Commodore 1541 block layout, used with Commodore GCR.
    Commodore,
}

impl Display for TrackSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrackSchema::System34 => write!(f, "IBM System34"),
            TrackSchema::Commodore => write!(f, "Commodore 1541"),
        }
    }
}

impl TrackSchema {
    /// Return the schema used with a data encoding, if sector framing is supported for it.
    pub fn for_encoding(encoding: DataEncoding) -> Option<TrackSchema> {
        match encoding {
            DataEncoding::Fm | DataEncoding::Mfm => Some(TrackSchema::System34),
            DataEncoding::Gcr(GcrScheme::Commodore) => Some(TrackSchema::Commodore),
            DataEncoding::Gcr(GcrScheme::Apple62) => None,
        }
    }

    /// Create a framer for this schema.
    pub fn framer<'a>(&self, config: &'a FramerConfig, crc: &'a CrcEngine) -> Box<dyn SectorFramer + 'a> {
        match self {
            TrackSchema::System34 => Box::new(System34Framer::new(config, crc)),
            TrackSchema::Commodore => Box::new(CommodoreFramer::new(config)),
        }
    }
}

/// The expected layout of a track, used to reject headers that cannot belong to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackGeometry {
    /// The cylinder number recorded in sector headers.
    pub cylinder: u16,
    pub head: u8,
    pub first_sector: u8,
    pub last_sector: u8,
    pub max_size_code: u8,
}

impl TrackGeometry {
    pub fn new(cylinder: u16, head: u8, first_sector: u8, last_sector: u8) -> Self {
        TrackGeometry {
            cylinder,
            head,
            first_sector,
            last_sector,
            max_size_code: MAX_SIZE_CODE,
        }
    }

    pub fn with_max_size_code(mut self, n: u8) -> Self {
        self.max_size_code = n;
        self
    }

    /// Return a description of the first way `address` fails to match this geometry.
    pub fn mismatch(&self, address: &SectorAddress) -> Option<&'static str> {
        if address.c() != self.cylinder {
            Some("cylinder")
        }
        else if address.h() != self.head {
            Some("head")
        }
        else if !(self.first_sector..=self.last_sector).contains(&address.s()) {
            Some("sector number")
        }
        else if address.n() > self.max_size_code {
            Some("size code")
        }
        else {
            None
        }
    }
}

/// How strictly sector headers are checked against the expected track geometry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GeometryCheck {
    /// Headers must match the configured [TrackGeometry].
    Strict,
    /// Only headers with an impossible size code are rejected.
    #[default]
    Lenient,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FramerConfig {
    pub geometry: Option<TrackGeometry>,
    pub check: GeometryCheck,
    /// A data mark further than this many bytes past the end of the preceding
    /// ID field does not belong to it.
    pub max_id_gap_bytes: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        FramerConfig {
            geometry: None,
            check: GeometryCheck::Lenient,
            max_id_gap_bytes: 64,
        }
    }
}

impl FramerConfig {
    pub fn strict(geometry: TrackGeometry) -> Self {
        FramerConfig {
            geometry: Some(geometry),
            check: GeometryCheck::Strict,
            ..FramerConfig::default()
        }
    }

    pub fn with_max_id_gap_bytes(mut self, bytes: usize) -> Self {
        self.max_id_gap_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), crate::DecodeError> {
        if self.check == GeometryCheck::Strict && self.geometry.is_none() {
            return Err(crate::DecodeError::Parameter(
                "FramerConfig: strict geometry checking requires a geometry".to_string(),
            ));
        }
        if self.max_id_gap_bytes == 0 {
            return Err(crate::DecodeError::Parameter(
                "FramerConfig: max_id_gap_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("No address mark found")]
    SyncNotFound,
    /// The field failed its integrity check. The candidate is still evidence for the merge engine.
    #[error("Integrity check failed for sector {}", .0.address())]
    CrcMismatch(Box<SectorCandidate>),
    #[error("Sector header {found} does not match the track geometry: {reason}")]
    GeometryMismatch { found: SectorAddress, reason: &'static str },
    #[error("Data mark at cell {0} has no preceding sector header")]
    OrphanData(usize),
    #[error("Track ended inside a field")]
    Truncated,
}

/// A decoded sector ID field.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorHeader {
    pub address: SectorAddress,
    pub check: IntegrityCheck,
    /// Cell offset of the ID mark.
    pub id_offset: usize,
    /// Cell offset following the ID field.
    pub end_offset: usize,
}

/// The result of framing one field.
#[derive(Clone, Debug, PartialEq)]
pub enum Framed {
    Header(SectorHeader),
    Sector(SectorCandidate),
    /// A mark that carries no sector information, such as an index mark.
    Skipped,
}

/// Counts of marks and framing outcomes over one revolution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FramerStats {
    pub index_marks: u32,
    pub id_marks: u32,
    pub data_marks: u32,
    pub header_errors: u32,
    pub data_errors: u32,
    pub geometry_drops: u32,
    pub orphan_data: u32,
    pub truncated: u32,
    pub demod: DemodStats,
}

/// The sector candidates framed from one revolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FramedTrack {
    pub candidates: Vec<SectorCandidate>,
    pub stats: FramerStats,
}

pub trait SectorFramer {
    fn schema(&self) -> TrackSchema;
    fn config(&self) -> &FramerConfig;
    /// The number of bytes following a mark of the given kind. Data field lengths depend on the header.
    fn field_length(&self, kind: MarkKind, header: Option<&SectorHeader>) -> usize;
    /// Interpret the field following a mark.
    fn frame(
        &self,
        demod: &dyn Demodulator,
        hit: &MarkHit,
        field: &DecodedBytes,
        header: Option<&SectorHeader>,
        revolution: u32,
    ) -> Result<Framed, FrameError>;

    /// Check replacement data for a framed sector against the integrity value recorded
    /// with it. `data` must be the length of the candidate's data field.
    fn recheck_data(&self, demod: &dyn Demodulator, candidate: &SectorCandidate, data: &[u8]) -> IntegrityCheck;

    /// Reject headers that cannot belong to the track being decoded.
    fn check_geometry(&self, address: &SectorAddress) -> Result<(), FrameError> {
        if address.n() > MAX_SIZE_CODE {
            return Err(FrameError::GeometryMismatch {
                found: *address,
                reason: "size code",
            });
        }
        let config = self.config();
        if let (GeometryCheck::Strict, Some(geometry)) = (config.check, config.geometry) {
            if let Some(reason) = geometry.mismatch(address) {
                return Err(FrameError::GeometryMismatch { found: *address, reason });
            }
        }
        Ok(())
    }

    /// Walk every mark in a revolution's cell stream and frame the sectors found.
    ///
    /// Scanning resumes after a field whose check passed, and one cell after the
    /// mark otherwise, so a corrupted length can never hide a following mark.
    /// Fails with [FrameError::SyncNotFound] if no ID mark is found at all.
    fn frame_track(
        &self,
        demod: &dyn Demodulator,
        cells: &CellStream,
        revolution: u32,
    ) -> Result<FramedTrack, FrameError> {
        let mut framed = FramedTrack::default();
        let stats = &mut framed.stats;
        let max_gap = self.config().max_id_gap_bytes * demod.cells_per_byte();
        let mut header: Option<SectorHeader> = None;
        let mut cursor = 0;

        while let Some(hit) = demod.find_mark(cells, cursor) {
            log::trace!(
                "SectorFramer::frame_track(): Found {} at cell {}",
                hit.kind,
                hit.bit_offset
            );
            cursor = hit.data_offset;

            match hit.kind {
                MarkKind::Index => {
                    stats.index_marks += 1;
                    continue;
                }
                MarkKind::Id => stats.id_marks += 1,
                MarkKind::Data | MarkKind::DeletedData => {
                    stats.data_marks += 1;
                    // A data mark belongs only to the nearest preceding header.
                    let owned = header
                        .take()
                        .filter(|h| hit.bit_offset.saturating_sub(h.end_offset) <= max_gap);
                    if owned.is_none() {
                        log::debug!(
                            "SectorFramer::frame_track(): {}",
                            FrameError::OrphanData(hit.bit_offset)
                        );
                        stats.orphan_data += 1;
                        continue;
                    }
                    header = owned;
                }
            }

            let len = self.field_length(hit.kind, header.as_ref());
            let field = demod.read_bytes(cells, hit.data_offset, len);
            stats.demod.merge(&field.stats);

            let result = self.frame(demod, &hit, &field, header.as_ref(), revolution);
            if hit.kind.is_data() {
                header = None;
            }

            match result {
                Ok(Framed::Header(h)) => {
                    if h.check.is_valid() {
                        cursor = field.end_offset;
                    }
                    else {
                        stats.header_errors += 1;
                    }
                    header = Some(h);
                }
                Ok(Framed::Sector(candidate)) => {
                    cursor = field.end_offset;
                    framed.candidates.push(candidate);
                }
                Ok(Framed::Skipped) => {}
                Err(FrameError::CrcMismatch(candidate)) => {
                    log::debug!(
                        "SectorFramer::frame_track(): Data check failed for {} in revolution {}",
                        candidate.address(),
                        revolution
                    );
                    stats.data_errors += 1;
                    framed.candidates.push(*candidate);
                }
                Err(e @ FrameError::GeometryMismatch { .. }) => {
                    log::warn!("SectorFramer::frame_track(): Dropping header: {}", e);
                    stats.geometry_drops += 1;
                    header = None;
                }
                Err(FrameError::Truncated) => {
                    log::debug!(
                        "SectorFramer::frame_track(): {} at cell {} runs past end of track",
                        hit.kind,
                        hit.bit_offset
                    );
                    stats.truncated += 1;
                    header = None;
                }
                Err(e) => {
                    log::debug!("SectorFramer::frame_track(): {}", e);
                }
            }
        }

        if framed.stats.id_marks == 0 {
            log::debug!(
                "SectorFramer::frame_track(): No ID marks found in revolution {}",
                revolution
            );
            return Err(FrameError::SyncNotFound);
        }
        Ok(framed)
    }
}

/// Rechecks merged sector data the way a framer checked the data field it was read from.
pub struct FieldVerifier<'a> {
    framer: Box<dyn SectorFramer + 'a>,
    demod: BoxedDemodulator,
}

impl<'a> FieldVerifier<'a> {
    pub fn new(framer: Box<dyn SectorFramer + 'a>, demod: BoxedDemodulator) -> Self {
        FieldVerifier { framer, demod }
    }

    /// Create a verifier for the schema used with `encoding`, if there is one.
    pub fn for_encoding(encoding: DataEncoding, config: &'a FramerConfig, crc: &'a CrcEngine) -> Option<Self> {
        let schema = TrackSchema::for_encoding(encoding)?;
        Some(FieldVerifier::new(schema.framer(config, crc), demodulator_for(encoding)))
    }
}

impl DataVerifier for FieldVerifier<'_> {
    fn recheck(&self, candidate: &SectorCandidate, data: &[u8]) -> IntegrityCheck {
        self.framer.recheck_data(self.demod.as_ref(), candidate, data)
    }
}

/// Collect the weak byte offsets of a field that fall within its first `len` bytes.
pub(crate) fn weak_offsets_within(field: &DecodedBytes, len: usize) -> Vec<usize> {
    field.weak_offsets.iter().copied().filter(|&o| o < len).collect()
}
