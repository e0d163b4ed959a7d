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

//! Framing of IBM System 34 tracks.
//!
//! An ID field is four bytes (cylinder, head, sector, size code) followed by a
//! CRC. A data field holds `128 << n` bytes followed by a CRC. On MFM tracks
//! both CRCs also cover the three 0xA1 sync bytes and the mark byte; on FM
//! tracks they cover the mark byte only.

use crate::{
    bitstream_codec::{DecodedBytes, Demodulator, MarkHit, MarkKind},
    crc::CrcEngine,
    track_schema::{weak_offsets_within, FrameError, Framed, FramerConfig, SectorFramer, SectorHeader, TrackSchema},
    types::{IntegrityCheck, IntegrityField, SectorAddress, SectorCandidate},
};

/// Length of the address fields of a System 34 ID field, excluding the CRC.
pub const IDAM_ADDRESS_LEN: usize = 4;

pub struct System34Framer<'a> {
    config: &'a FramerConfig,
    crc: &'a CrcEngine,
}

impl<'a> System34Framer<'a> {
    pub fn new(config: &'a FramerConfig, crc: &'a CrcEngine) -> Self {
        System34Framer { config, crc }
    }

    /// Check a field against the CRC recorded after it. `len` is the length of the field
    /// excluding the CRC.
    fn check_field(&self, prefix: &[u8], field: &[u8], len: usize) -> Result<IntegrityCheck, FrameError> {
        let crc_len = self.crc.model().byte_len();
        if field.len() < len + crc_len {
            return Err(FrameError::Truncated);
        }
        let recorded = self
            .crc
            .model()
            .read_recorded(&field[len..len + crc_len])
            .ok_or(FrameError::Truncated)?;

        let mut digest = self.crc.digest();
        digest.update(prefix);
        digest.update(&field[..len]);
        Ok(IntegrityCheck::Crc(IntegrityField::new(recorded, digest.finalize())))
    }
}

impl SectorFramer for System34Framer<'_> {
    fn schema(&self) -> TrackSchema {
        TrackSchema::System34
    }

    fn config(&self) -> &FramerConfig {
        self.config
    }

    fn field_length(&self, kind: MarkKind, header: Option<&SectorHeader>) -> usize {
        let crc_len = self.crc.model().byte_len();
        match kind {
            MarkKind::Index => 0,
            MarkKind::Id => IDAM_ADDRESS_LEN + crc_len,
            MarkKind::Data | MarkKind::DeletedData => match header {
                Some(header) => header.address.n_size() + crc_len,
                None => 0,
            },
        }
    }

    fn frame(
        &self,
        demod: &dyn Demodulator,
        hit: &MarkHit,
        field: &DecodedBytes,
        header: Option<&SectorHeader>,
        revolution: u32,
    ) -> Result<Framed, FrameError> {
        let prefix = demod.mark_crc_prefix(hit.kind);
        match hit.kind {
            MarkKind::Index => Ok(Framed::Skipped),
            MarkKind::Id => {
                let check = self.check_field(prefix, &field.bytes, IDAM_ADDRESS_LEN)?;
                let b = &field.bytes;
                let address = SectorAddress::new(b[0] as u16, b[1], b[2], b[3]);
                self.check_geometry(&address)?;
                log::trace!(
                    "System34Framer::frame(): ID {} at cell {} CRC {}",
                    address,
                    hit.bit_offset,
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
                let size = header.address.n_size();
                let check = self.check_field(prefix, &field.bytes, size)?;

                let candidate = SectorCandidate::new(
                    header.address,
                    revolution,
                    field.bytes[..size].to_vec(),
                    header.check,
                    check,
                )
                .with_offsets(header.id_offset, hit.bit_offset)
                .with_weak_offsets(weak_offsets_within(field, size))
                .with_deleted(hit.kind == MarkKind::DeletedData);

                if check.is_valid() {
                    Ok(Framed::Sector(candidate))
                }
                else {
                    Err(FrameError::CrcMismatch(Box::new(candidate)))
                }
            }
        }
    }

    fn recheck_data(&self, demod: &dyn Demodulator, candidate: &SectorCandidate, data: &[u8]) -> IntegrityCheck {
        let kind = if candidate.deleted() {
            MarkKind::DeletedData
        }
        else {
            MarkKind::Data
        };
        let mut digest = self.crc.digest();
        digest.update(demod.mark_crc_prefix(kind));
        digest.update(data);
        candidate.data_check().with_calculated(digest.finalize())
    }
}
