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

//! Table-driven CRC computation.
//!
//! Non-reflected models are processed with the register left-aligned in a
//! `u64`, reflected models with the register right-aligned and a reflected
//! polynomial. Both forms handle any register width with one 256-entry table.

use super::{reflect, width_mask, CrcModel, CrcModelError, CrcPresetId, CRC_CHECK_INPUT};

/// A validated [CrcModel] with its lookup table.
///
/// Creating an engine runs the model's self-test, so an engine that exists is
/// known to reproduce its catalogue check value. Engines are immutable and
/// can be shared freely between decode threads.
#[derive(Clone)]
pub struct CrcEngine {
    model: CrcModel,
    table: Box<[u64; 256]>,
}

impl std::fmt::Debug for CrcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrcEngine").field("model", &self.model).finish()
    }
}

impl CrcEngine {
    pub fn new(model: CrcModel) -> Result<Self, CrcModelError> {
        model.validate()?;
        let engine = CrcEngine {
            table: Box::new(Self::build_table(&model)),
            model,
        };

        if let Some(expected) = engine.model.check {
            // Both paths must reproduce the check value.
            for computed in [engine.model.compute(CRC_CHECK_INPUT), engine.compute(CRC_CHECK_INPUT)] {
                if computed != expected {
                    log::error!(
                        "CrcEngine::new(): Model {} failed self-test: expected {:#X}, computed {:#X}",
                        engine.model.name,
                        expected,
                        computed
                    );
                    return Err(CrcModelError::CheckMismatch {
                        name: engine.model.name.to_string(),
                        expected,
                        computed,
                    });
                }
            }
        }
        log::debug!("CrcEngine::new(): Loaded CRC model {}", engine.model.name);
        Ok(engine)
    }

    /// Create an engine from the static preset table.
    pub fn from_preset(id: CrcPresetId) -> Result<Self, CrcModelError> {
        Self::new(id.model().clone())
    }

    /// Create an engine from a preset name or alias.
    pub fn by_name(name: &str) -> Result<Self, CrcModelError> {
        let model = super::find_preset(name).ok_or_else(|| CrcModelError::UnknownPreset(name.to_string()))?;
        Self::new(model.clone())
    }

    pub fn model(&self) -> &CrcModel {
        &self.model
    }

    /// Start an incremental CRC computation.
    pub fn digest(&self) -> CrcDigest<'_> {
        let register = if self.model.refin {
            reflect(self.model.init, self.model.width)
        }
        else {
            self.model.init << (64 - self.model.width as u32)
        };
        CrcDigest { engine: self, register }
    }

    /// Compute the CRC of `data`.
    pub fn compute(&self, data: &[u8]) -> u64 {
        let mut digest = self.digest();
        digest.update(data);
        digest.finalize()
    }

    /// Verify `data` against the CRC bytes recorded after it.
    pub fn verify(&self, data: &[u8], trailing_crc_bytes: &[u8]) -> bool {
        match self.model.read_recorded(trailing_crc_bytes) {
            Some(recorded) => self.compute(data) == recorded,
            None => false,
        }
    }

    fn build_table(model: &CrcModel) -> [u64; 256] {
        let mut table = [0u64; 256];
        if model.refin {
            let poly = reflect(model.poly, model.width);
            for (i, entry) in table.iter_mut().enumerate() {
                let mut crc = i as u64;
                for _ in 0..8 {
                    crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
                }
                *entry = crc;
            }
        }
        else {
            let poly = model.poly << (64 - model.width as u32);
            for (i, entry) in table.iter_mut().enumerate() {
                let mut crc = (i as u64) << 56;
                for _ in 0..8 {
                    crc = if crc & (1 << 63) != 0 { (crc << 1) ^ poly } else { crc << 1 };
                }
                *entry = crc;
            }
        }
        table
    }
}

/// An in-progress CRC computation over one or more byte slices.
///
/// Address marks and their fields are covered by a single CRC on IBM formats,
/// so a field can be checked without copying the mark and data into one buffer.
#[derive(Clone)]
pub struct CrcDigest<'a> {
    engine: &'a CrcEngine,
    register: u64,
}

impl CrcDigest<'_> {
    pub fn update(&mut self, data: &[u8]) {
        let table = &self.engine.table;
        if self.engine.model.refin {
            for &byte in data {
                self.register = table[((self.register ^ byte as u64) & 0xFF) as usize] ^ (self.register >> 8);
            }
        }
        else {
            for &byte in data {
                self.register = table[(((self.register >> 56) as u8) ^ byte) as usize] ^ (self.register << 8);
            }
        }
    }

    pub fn finalize(&self) -> u64 {
        let model = &self.engine.model;
        let register = if model.refin {
            if model.refout {
                self.register
            }
            else {
                reflect(self.register, model.width)
            }
        }
        else {
            let register = self.register >> (64 - model.width as u32);
            if model.refout {
                reflect(register, model.width)
            }
            else {
                register
            }
        };
        (register ^ model.xorout) & width_mask(model.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn custom(width: u8, poly: u64, refin: bool, refout: bool) -> CrcModel {
        CrcModel {
            name: Cow::Borrowed("CUSTOM"),
            width,
            poly,
            init: 0,
            refin,
            refout,
            xorout: 0,
            check: None,
        }
    }

    #[test]
    fn test_engine_check_values() {
        let engine = CrcEngine::from_preset(CrcPresetId::Crc16Ibm3740).unwrap();
        assert_eq!(engine.compute(CRC_CHECK_INPUT), 0x29B1);
        let engine = CrcEngine::from_preset(CrcPresetId::Crc32IsoHdlc).unwrap();
        assert_eq!(engine.compute(CRC_CHECK_INPUT), 0xCBF4_3926);
    }

    #[test]
    fn test_digest_is_incremental() {
        let engine = CrcEngine::from_preset(CrcPresetId::Crc16Ibm3740).unwrap();
        let mut digest = engine.digest();
        digest.update(&[0xA1, 0xA1, 0xA1]);
        digest.update(&[0xFE, 0x00, 0x00, 0x01, 0x02]);
        assert_eq!(
            digest.finalize(),
            engine.compute(&[0xA1, 0xA1, 0xA1, 0xFE, 0x00, 0x00, 0x01, 0x02])
        );
    }

    #[test]
    fn test_narrow_and_mixed_reflection_models() {
        let data = b"\x00\x5A\xFF flux transitions";
        for model in [
            custom(3, 0x3, false, false),
            custom(5, 0x15, true, true),
            custom(7, 0x09, false, true),
            custom(12, 0x80F, true, false),
            custom(64, 0x42F0_E1EB_A9EA_3693, false, false),
            custom(64, 0x42F0_E1EB_A9EA_3693, true, true),
        ] {
            let engine = CrcEngine::new(model.clone()).unwrap();
            assert_eq!(engine.compute(data), model.compute(data), "width {}", model.width);
        }
    }

    #[test]
    fn test_broken_preset_is_rejected() {
        let mut model = CrcPresetId::Crc16Ibm3740.model().clone();
        model.init = 0x0000;
        assert!(matches!(
            CrcEngine::new(model),
            Err(CrcModelError::CheckMismatch { .. })
        ));
    }

    #[test]
    fn test_by_name() {
        assert!(CrcEngine::by_name("crc-16/ccitt-false").is_ok());
        assert!(matches!(
            CrcEngine::by_name("CRC-17/NOPE"),
            Err(CrcModelError::UnknownPreset(_))
        ));
    }
}
