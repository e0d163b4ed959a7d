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

//! # fluxsalvage
//!
//! fluxsalvage recovers sector data from raw flux captures of floppy disks.
//!
//! Each captured revolution of a track is run through a software PLL to
//! recover bit cells, demodulated according to its encoding (FM, MFM or GCR),
//! and framed into sector candidates. The candidates read from every
//! revolution are then merged, per sector address, into a single best answer
//! with a record of how it was reached.
//!
//! The main entry point is [TrackDecoder], configured with a [DecodeConfig].
//! Each stage can also be used on its own:
//! * [flux::Pll] for clock recovery
//! * [bitstream_codec::Demodulator] for mark search and byte decoding
//! * [track_schema::SectorFramer] for sector framing
//! * [crc::CrcEngine] for CRC computation against any catalogued model
//! * [merge::merge_sector] for reconciling reads of one sector

pub mod bitstream_codec;
pub mod crc;
pub mod decoder;
pub mod diagnostics;
pub mod fdc;
#[macro_use]
pub mod flux;
pub mod merge;
pub mod track_schema;
pub mod types;

use thiserror::Error;

use crate::{crc::CrcModelError, types::SectorAddress};

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;

#[derive(Clone, Debug, Error, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecodeError {
    #[error("Flux data is unusable: {0}")]
    FluxData(String),
    #[error("The clock never locked ({intervals} intervals, {cells} cells)")]
    ClockLost { intervals: u32, cells: u32 },
    #[error("No address mark was found")]
    SyncNotFound,
    /// Converted from [track_schema::FrameError::CrcMismatch]. A track decode never returns
    /// it: failed reads stay candidates and are counted in the revolution diagnostics.
    #[error("Integrity check failed for sector {0}")]
    CrcMismatch(SectorAddress),
    /// Converted from [track_schema::FrameError::GeometryMismatch], for callers driving a
    /// [track_schema::SectorFramer] directly. A track decode counts dropped headers instead.
    #[error("Sector header {found} does not belong to this track")]
    GeometryMismatch { found: SectorAddress },
    #[error("Invalid CRC model: {0}")]
    CrcModelConfig(#[from] CrcModelError),
    #[error("Invalid parameters were specified to a library function: {0}")]
    Parameter(String),
    #[error("The operation was cancelled")]
    Cancelled,
}

pub use crate::{
    decoder::{CancelToken, DecodeConfig, RevolutionOutcome, TrackCapture, TrackDecoder, TrackReport},
    diagnostics::{RevolutionDiagnostics, TrackQuality, TrackSummary},
    fdc::FdcPort,
    merge::{MergeConfig, MergeStrategy, MergedSector},
    types::{DataEncoding, DiskCh, GcrScheme, QualityFlags, SectorCandidate, SectorStatus},
};

pub mod prelude {
    pub use crate::{
        crc::{CrcEngine, CrcModel, CrcPresetId},
        flux::{FluxSample, PllParams, PllPreset, Revolution},
        track_schema::{FramerConfig, GeometryCheck, TrackGeometry},
        types::{DataEncoding, DiskCh, SectorAddress, SectorCandidate, SectorStatus},
        CancelToken,
        DecodeConfig,
        DecodeError,
        MergeConfig,
        MergeStrategy,
        MergedSector,
        TrackCapture,
        TrackDecoder,
        TrackReport,
    };
}
