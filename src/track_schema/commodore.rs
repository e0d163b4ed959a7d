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

//! Framing of Commodore 1541 GCR tracks.
//!
//! A header block is `[checksum, sector, track, id2, id1]` and a data block is
//! 256 bytes followed by a checksum. Both checksums are the XOR of the bytes
//! they cover. Track numbers are recorded starting at 1.

use crate::{
    bitstream_codec::{DecodedBytes, Demodulator, MarkHit, MarkKind},
    track_schema::{weak_offsets_within, FrameError, Framed, FramerConfig, SectorFramer, SectorHeader, TrackSchema},
    types::{IntegrityCheck, IntegrityField, SectorAddress, SectorCandidate},
};

pub const C64_HEADER_LEN: usize = 5;
pub const C64_SECTOR_SIZE: usize = 256;
/// The size code of a 256 byte sector.
pub const C64_SIZE_CODE: u8 = 1;

pub(crate) fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, &b| acc ^ b)
}

pub struct CommodoreFramer<'a> {
    config: &'a FramerConfig,
}

impl<'a> CommodoreFramer<'a> {
    pub fn new(config: &'a FramerConfig) -> Self {
        CommodoreFramer { config }
    }
}

impl SectorFramer for CommodoreFramer<'_> {
    fn schema(&self) -> TrackSchema {
        TrackSchema::Commodore
    }

    fn config(&self) -> &FramerConfig {
        self.config
    }

    fn field_length(&self, kind: MarkKind, _header: Option<&SectorHeader>) -> usize {
        match kind {
            MarkKind::Id => C64_HEADER_LEN,
            MarkKind::Data | MarkKind::DeletedData => C64_SECTOR_SIZE + 1,
            MarkKind::Index => 0,
        }
    }

    fn frame(
        &self,
        _demod: &dyn Demodulator,
        hit: &MarkHit,
        field: &DecodedBytes,
        header: Option<&SectorHeader>,
        revolution: u32,
    ) -> Result<Framed, FrameError> {
        let len = self.field_length(hit.kind, header);
        if field.len() < len {
            return Err(FrameError::Truncated);
        }
        let b = &field.bytes;

        match hit.kind {
            MarkKind::Index => Ok(Framed::Skipped),
            MarkKind::Id => {
                let check = IntegrityCheck::Checksum(IntegrityField::new(b[0] as u64, xor_checksum(&b[1..5]) as u64));
                let address = SectorAddress::new(b[2] as u16, 0, b[1], C64_SIZE_CODE);
                self.check_geometry(&address)?;
                log::trace!(
                    "CommodoreFramer::frame(): Header {} disk id {:02X}{:02X} checksum {}",
                    address,
                    b[4],
                    b[3],
                    check
                );
                Ok(Framed::Header(SectorHeader {
                    address,
                    check,
                    id_offset: hit.bit_offset,
                    end_offset: field.end_offset,
                }))
            }
            MarkKind::Data | MarkKind::DeletedData => {
                let header = header.ok_or(FrameError::OrphanData(hit.bit_offset))?;
                let data = &b[..C64_SECTOR_SIZE];
                let check = IntegrityCheck::Checksum(IntegrityField::new(
                    b[C64_SECTOR_SIZE] as u64,
                    xor_checksum(data) as u64,
                ));
                let candidate = SectorCandidate::new(header.address, revolution, data.to_vec(), header.check, check)
                    .with_offsets(header.id_offset, hit.bit_offset)
                    .with_weak_offsets(weak_offsets_within(field, C64_SECTOR_SIZE));

                if check.is_valid() {
                    Ok(Framed::Sector(candidate))
                }
                else {
                    Err(FrameError::CrcMismatch(Box::new(candidate)))
                }
            }
        }
    }

    fn recheck_data(&self, _demod: &dyn Demodulator, candidate: &SectorCandidate, data: &[u8]) -> IntegrityCheck {
        candidate.data_check().with_calculated(xor_checksum(data) as u64)
    }
}
